//! Extraction of a strict-JSON array from raw generation output.
//!
//! Models rarely return bare JSON: the array is usually wrapped in prose
//! ("Sure! Here's the result: ...") or a fenced code block. The parser strips
//! fences, locates the bracketed substring, and parses it strictly. No
//! opening bracket at all is the documented "no changes needed" outcome, not
//! an error; a bracketed blob that fails strict parsing is.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\n?|\n?```").expect("fence regex"));

/// A bracketed blob was present but could not be parsed as a JSON array.
/// Carries the offending text for operator logs; never shown to end users.
#[derive(Debug, Error)]
#[error("generation output contained an unparseable array: {raw}")]
pub struct ParseError {
    pub raw: String,
}

/// Outcome of array extraction.
#[derive(Debug)]
pub enum Extraction {
    /// No bracketed substring found: the oracle had nothing to suggest.
    Empty,
    /// The parsed array, element schemas unchecked.
    Array(Vec<serde_json::Value>),
}

/// Extract the JSON array from raw oracle output.
pub fn extract_array(raw: &str) -> Result<Extraction, ParseError> {
    let cleaned = FENCE.replace_all(raw, "");
    let cleaned = cleaned.trim();

    let Some(start) = cleaned.find('[') else {
        return Ok(Extraction::Empty);
    };

    // Widest candidate: first '[' to last ']'. A missing closing bracket is
    // a truncated response and must surface as a parse failure, not silence.
    let blob = match cleaned.rfind(']') {
        Some(end) if end > start => &cleaned[start..=end],
        _ => &cleaned[start..],
    };

    match serde_json::from_str::<serde_json::Value>(blob) {
        Ok(serde_json::Value::Array(items)) => Ok(Extraction::Array(items)),
        _ => Err(ParseError {
            raw: blob.to_string(),
        }),
    }
}

/// Deserialize array elements into `T`, discarding elements that do not fit.
/// The oracle is untrusted; a misshapen element is dropped rather than
/// failing the whole suggestion list.
pub fn deserialize_lenient<T: DeserializeOwned>(items: Vec<serde_json::Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn parses_fenced_json_with_commentary() {
        let raw = "Sure! Here's the result: ```json\n[{\"year\":40,\"event\":\"X\"}]\n```";
        let Extraction::Array(items) = extract_array(raw).unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["year"], 40);
        assert_eq!(items[0]["event"], "X");
    }

    #[test]
    fn parses_bare_array() {
        let Extraction::Array(items) = extract_array("[1, 2, 3]").unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn parses_multiline_array_embedded_in_prose() {
        let raw = "Based on the edit, here are my suggestions:\n[\n  {\"id\": \"a\", \"newText\": \"b\"}\n]\nHope this helps.";
        let Extraction::Array(items) = extract_array(raw).unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn refusal_text_is_empty_not_an_error() {
        assert!(matches!(
            extract_array("I cannot help with that.").unwrap(),
            Extraction::Empty
        ));
    }

    #[test]
    fn empty_array_literal_is_an_empty_array() {
        let Extraction::Array(items) = extract_array("[]").unwrap() else {
            panic!("expected an array");
        };
        assert!(items.is_empty());
    }

    #[test]
    fn truncated_array_is_a_parse_error() {
        let err = extract_array("[invalid json").unwrap_err();
        assert_eq!(err.raw, "[invalid json");
    }

    #[test]
    fn invalid_bracketed_blob_is_a_parse_error() {
        let err = extract_array("[not, valid, json]").unwrap_err();
        assert!(err.raw.contains("not"));
    }

    #[test]
    fn fences_without_language_tag_are_stripped() {
        let raw = "```\n[\"a\"]\n```";
        let Extraction::Array(items) = extract_array(raw).unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(items[0], "a");
    }

    #[test]
    fn lenient_deserialization_drops_misshapen_elements() {
        #[derive(Deserialize)]
        struct Suggestion {
            id: String,
        }
        let items = vec![
            serde_json::json!({"id": "keep"}),
            serde_json::json!({"no_id": true}),
            serde_json::json!(42),
        ];
        let parsed: Vec<Suggestion> = deserialize_lenient(items);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "keep");
    }
}
