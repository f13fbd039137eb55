//! Prompt templates for the four generation flows.
//!
//! Each flow has a default template with named `{{placeholder}}` slots. Users
//! may override a template per flow (the CustomPrompt feature); overrides are
//! validated on save so a template missing a required placeholder is rejected
//! before it can produce a broken prompt.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// The four prompt-customizable flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    TimelinePrediction,
    MissionSteps,
    TimelineAdaptation,
    StepsAdaptation,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        PromptKind::TimelinePrediction,
        PromptKind::MissionSteps,
        PromptKind::TimelineAdaptation,
        PromptKind::StepsAdaptation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::TimelinePrediction => "timeline_prediction",
            PromptKind::MissionSteps => "mission_steps",
            PromptKind::TimelineAdaptation => "timeline_adaptation",
            PromptKind::StepsAdaptation => "steps_adaptation",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "timeline_prediction" => Some(PromptKind::TimelinePrediction),
            "mission_steps" => Some(PromptKind::MissionSteps),
            "timeline_adaptation" => Some(PromptKind::TimelineAdaptation),
            "steps_adaptation" => Some(PromptKind::StepsAdaptation),
            _ => None,
        }
    }

    pub fn default_template(self) -> &'static str {
        match self {
            PromptKind::TimelinePrediction => TIMELINE_PREDICTION_TEMPLATE,
            PromptKind::MissionSteps => MISSION_STEPS_TEMPLATE,
            PromptKind::TimelineAdaptation => TIMELINE_ADAPTATION_TEMPLATE,
            PromptKind::StepsAdaptation => STEPS_ADAPTATION_TEMPLATE,
        }
    }

    /// Placeholders a custom template for this flow must contain.
    pub fn required_placeholders(self) -> &'static [&'static str] {
        match self {
            PromptKind::TimelinePrediction => {
                &["branch_name", "current_age", "past_events", "user_entries"]
            }
            PromptKind::MissionSteps => &["branch_name", "mission_text", "metrics"],
            PromptKind::TimelineAdaptation => &[
                "branch_name",
                "mission_text",
                "metrics",
                "past_events",
                "timeline",
                "edited_year",
                "edited_text",
                "min_year",
                "max_year",
            ],
            PromptKind::StepsAdaptation => &[
                "branch_name",
                "mission_text",
                "metrics",
                "steps",
                "edited_position",
                "edited_text",
            ],
        }
    }
}

#[derive(Debug, Error)]
#[error("template is missing required placeholders: {missing:?}")]
pub struct TemplateError {
    pub missing: Vec<&'static str>,
}

/// Validate a custom template override for a flow.
pub fn validate_template(kind: PromptKind, template: &str) -> Result<(), TemplateError> {
    let missing: Vec<&'static str> = kind
        .required_placeholders()
        .iter()
        .copied()
        .filter(|name| !template.contains(&slot(name)))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TemplateError { missing })
    }
}

/// Substitute `{{name}}` slots. Unknown slots in the template are left
/// untouched so a bad override degrades visibly rather than silently.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in values {
        out = out.replace(&slot(name), value);
    }
    out
}

/// Instruction injected when the user's content is not in the default
/// language. Empty for "en" so the default templates stay unchanged.
pub fn language_instruction(code: &str) -> String {
    if code.eq_ignore_ascii_case("en") {
        String::new()
    } else {
        format!("Respond only in the language with ISO 639-1 code \"{code}\".\n")
    }
}

fn slot(name: &str) -> String {
    format!("{{{{{name}}}}}")
}

const TIMELINE_PREDICTION_TEMPLATE: &str = r#"You are a thoughtful life coach helping someone explore their future possibilities.

Life Path Theme: "{{branch_name}}"
Current Age: {{current_age}}

Recent Past (Last 7 years):
{{past_events}}

User's Plans for This Path:
{{user_entries}}

Based on the theme "{{branch_name}}", the person's recent past, and their stated plans, generate 3-5 important milestone events that could realistically happen in their future on this life path.

Requirements:
- Events should be between age {{current_age}} and 100
- Each event should be a single concise sentence (max 15 words)
- Events should align with the theme and build upon their past and stated plans
- Be realistic and thoughtful, not overly optimistic or pessimistic
- Spread events across different life stages (don't cluster them)
{{language_instruction}}
Return ONLY a JSON array of objects with this exact format:
[
  {"year": 35, "event": "Launch successful startup after years of preparation"},
  {"year": 42, "event": "Achieve financial independence milestone"}
]

Do not include any other text, explanations, or markdown formatting."#;

const MISSION_STEPS_TEMPLATE: &str = r#"You are a strategic life planning expert helping someone break down their ultimate life mission into actionable steps.

Life Path: "{{branch_name}}"
Ultimate Life Mission: "{{mission_text}}"

Success Metrics:
- {{metrics}}

Create a comprehensive, hierarchical breakdown of key steps needed to achieve this mission. Include:
- Major milestones (top-level steps)
- Sub-steps for each milestone (nested steps)
- Be specific and actionable
- Consider short-term, medium-term, and long-term actions
- Align with the success metrics provided
{{language_instruction}}
Return ONLY a JSON array with this exact structure:
[
  {
    "step": "Build foundational skills and knowledge",
    "substeps": [
      "Complete relevant education or certifications",
      "Gain practical experience through projects"
    ]
  }
]

Generate 5-8 major steps with 2-5 substeps each. Be thoughtful and realistic.
Do not include any other text, explanations, or markdown formatting."#;

const TIMELINE_ADAPTATION_TEMPLATE: &str = r#"You are a life planning assistant. A user just edited an event in their future timeline.

**Context:**
- Branch/Possibility: {{branch_name}}
- Life Mission: {{mission_text}}
- Success Metrics: {{metrics}}
- Recent Past:
{{past_events}}

**Full timeline for this branch:**
{{timeline}}

**Recent Edit:**
Year {{edited_year}}: {{edited_text}}

**Task:**
Based on this new edit at Year {{edited_year}}, analyze how the change affects the timeline and suggest updated predictions for the surrounding AI-generated events.

IMPORTANT RULES:
1. DO NOT modify or suggest changes to events marked [USER] or [EDITED]
2. ONLY suggest updates to unmarked (AI-generated) events
3. Stay between Year {{min_year}} and Year {{max_year}}, and never suggest Year {{edited_year}} itself
4. Ensure predictions align with the mission, metrics, and the new context
5. Keep predictions realistic and specific (max 15 words each)
6. If a prediction no longer makes sense, simply leave it out of your response (omission means "no change")
{{language_instruction}}
Return your response as a JSON array of updates:
[
  {"id": "<event id>", "newText": "<prediction text>", "reason": "<why this makes sense>"}
]

To add a prediction in an empty year inside the window, omit "id" and include "year":
  {"year": <number>, "newText": "<prediction text>", "reason": "<why>"}

Only include events that should be updated or added. Return empty array [] if no changes are needed."#;

const STEPS_ADAPTATION_TEMPLATE: &str = r#"You are a life planning assistant. A user just edited a step in their mission plan.

**Context:**
- Branch/Possibility: {{branch_name}}
- Life Mission: {{mission_text}}
- Success Metrics: {{metrics}}

**Current Steps:**
{{steps}}

**Recent Edit:**
Step {{edited_position}}: "{{edited_text}}" [EDITED]

**Task:**
The user edited step {{edited_position}}. Analyze how this change affects the overall plan and suggest updates to OTHER steps (both before and after) to maintain coherence and alignment with the mission.

IMPORTANT RULES:
1. DO NOT modify steps marked with [USER] or [EDITED] - these are user-controlled
2. ONLY suggest updates to AI-generated steps (unmarked ones)
3. Focus on steps within 2 positions before and 3 positions after the edited step
4. Ensure the flow makes logical sense: earlier steps should lead to later steps
5. Keep suggestions specific and actionable
6. Consider both main steps and substeps
7. To remove a step that no longer makes sense, return it with an empty "newText"
{{language_instruction}}
Return your response as a JSON array of suggested updates:
[
  {
    "stepId": "<step id to update>",
    "newText": "<updated step text>",
    "reason": "<why this update makes sense>"
  }
]

Only include steps that need updates. Return empty array [] if no changes needed."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in PromptKind::ALL {
            assert_eq!(PromptKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(PromptKind::from_str("unknown"), None);
    }

    #[test]
    fn default_templates_pass_their_own_validation() {
        for kind in PromptKind::ALL {
            validate_template(kind, kind.default_template())
                .unwrap_or_else(|e| panic!("{}: {e}", kind.as_str()));
        }
    }

    #[test]
    fn validation_reports_missing_placeholders() {
        let err = validate_template(PromptKind::MissionSteps, "mission: {{mission_text}}")
            .unwrap_err();
        assert!(err.missing.contains(&"branch_name"));
        assert!(err.missing.contains(&"metrics"));
        assert!(!err.missing.contains(&"mission_text"));
    }

    #[test]
    fn render_substitutes_all_occurrences() {
        let out = render(
            "Theme {{branch_name}}, again {{branch_name}}, age {{current_age}}",
            &[("branch_name", "Artist"), ("current_age", "30")],
        );
        assert_eq!(out, "Theme Artist, again Artist, age 30");
    }

    #[test]
    fn render_leaves_unknown_slots_visible() {
        let out = render("{{known}} {{unknown}}", &[("known", "x")]);
        assert_eq!(out, "x {{unknown}}");
    }

    #[test]
    fn language_instruction_is_empty_for_default_language() {
        assert!(language_instruction("en").is_empty());
        assert!(language_instruction("EN").is_empty());
        let de = language_instruction("de");
        assert!(de.contains("\"de\""));
    }
}
