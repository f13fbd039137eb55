//! Adapter for the generative text service.
//!
//! One contract for callers: prompt in, raw text out, explicit failure on
//! transport or shape problems. No retries and no caching at this layer;
//! retry policy belongs to whoever triggered the call. The endpoint speaks
//! the Gemini `generateContent` protocol; the base URL is configurable so
//! tests and self-hosted gateways can point elsewhere.

use serde::Serialize;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("generation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("generation service returned status {status}")]
    Transport { status: u16, body: String },
    #[error("generation response missing expected text content")]
    Malformed { payload: String },
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_k: i32,
    pub top_p: f64,
    pub max_output_tokens: i32,
}

impl GenerationConfig {
    /// Fresh milestone predictions: a little more adventurous.
    pub const PREDICTIONS: Self = Self {
        temperature: 0.8,
        top_k: 40,
        top_p: 0.95,
        max_output_tokens: 1024,
    };

    /// Step breakdowns and both adaptation flows.
    pub const ADAPTATION: Self = Self {
        temperature: 0.7,
        top_k: 40,
        top_p: 0.95,
        max_output_tokens: 2048,
    };

    /// Language classification side-call: deterministic, tiny output.
    const LANGUAGE_DETECTION: Self = Self {
        temperature: 0.0,
        top_k: 1,
        top_p: 1.0,
        max_output_tokens: 8,
    };
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn from_env() -> Result<Self, String> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "GEMINI_API_KEY must be configured".to_string())?;
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        })
    }

    /// Send one prompt and return the raw text of the first candidate.
    pub async fn generate(
        &self,
        prompt: &str,
        config: GenerationConfig,
    ) -> Result<String, OracleError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: config,
        };

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        extract_candidate_text(&payload).ok_or_else(|| OracleError::Malformed {
            payload: payload.to_string(),
        })
    }

    /// Classify the dominant language of the user's existing text into a
    /// two-letter code. Best effort: any failure returns `fallback` and the
    /// primary flow proceeds.
    pub async fn detect_language(&self, samples: &[&str], fallback: &str) -> String {
        let sample: String = samples
            .iter()
            .filter(|s| !s.trim().is_empty())
            .take(20)
            .map(|s| s.trim())
            .collect::<Vec<_>>()
            .join("\n");
        if sample.is_empty() {
            return fallback.to_string();
        }

        let prompt = format!(
            "Identify the dominant language of the following text. \
             Reply with only its two-letter ISO 639-1 code, nothing else.\n\n{sample}"
        );

        match self
            .generate(&prompt, GenerationConfig::LANGUAGE_DETECTION)
            .await
        {
            Ok(text) => normalize_language_code(&text).unwrap_or_else(|| {
                tracing::debug!(raw = %text, "language detection returned no usable code");
                fallback.to_string()
            }),
            Err(err) => {
                tracing::debug!(error = %err, "language detection failed, using fallback");
                fallback.to_string()
            }
        }
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a generateContent
/// response. Defensive field access: upstream contract drift must surface as
/// `Malformed`, not a panic.
fn extract_candidate_text(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

/// Reduce a model reply to a two-letter lowercase language code, if any.
fn normalize_language_code(raw: &str) -> Option<String> {
    let code: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .take(2)
        .flat_map(|c| c.to_lowercase())
        .collect();
    (code.len() == 2).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_candidate_text_from_wellformed_payload() {
        let payload = serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": "[{\"year\": 40}]"}]}}
            ]
        });
        assert_eq!(
            extract_candidate_text(&payload).as_deref(),
            Some("[{\"year\": 40}]")
        );
    }

    #[test]
    fn missing_nested_fields_are_malformed_not_panics() {
        for payload in [
            serde_json::json!({}),
            serde_json::json!({"candidates": []}),
            serde_json::json!({"candidates": [{"content": {}}]}),
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": 7}]}}]}),
        ] {
            assert!(extract_candidate_text(&payload).is_none());
        }
    }

    #[test]
    fn generation_config_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(GenerationConfig::PREDICTIONS).unwrap();
        assert_eq!(json["temperature"], 0.8);
        assert_eq!(json["topK"], 40);
        assert_eq!(json["topP"], 0.95);
        assert_eq!(json["maxOutputTokens"], 1024);
    }

    #[test]
    fn language_codes_normalize() {
        assert_eq!(normalize_language_code(" EN \n").as_deref(), Some("en"));
        assert_eq!(normalize_language_code("de-DE").as_deref(), Some("de"));
        assert_eq!(normalize_language_code("français").as_deref(), Some("fr"));
        // A verbose reply gives no usable code; callers fall back.
        assert!(normalize_language_code("I think it is Spanish").is_none());
        assert!(normalize_language_code("").is_none());
        assert!(normalize_language_code("x").is_none());
        assert!(normalize_language_code("12").is_none());
    }
}
