//! Reconciliation of oracle suggestions against stored state.
//!
//! The oracle is untrusted: it may hallucinate ids, reference user-owned
//! items, or ignore the window it was given. Planning happens here, against
//! the eligible-id set computed by the window builder; the api crate applies
//! the resulting plan in a single transaction. A suggestion referencing
//! anything outside the eligible set is silently discarded, so user-authored
//! and user-edited rows can never be touched regardless of what came back.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Upper bound on a timeline year (age 100).
pub const MAX_YEAR: i32 = 100;

/// One suggested revision to a timeline event.
/// `{"id": "...", "newText": "...", "reason": "..."}` for updates;
/// additions carry a `year` instead of an `id`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventSuggestion {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default, rename = "newText", alias = "event")]
    pub new_text: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One suggested revision to a mission step.
/// An empty `newText` is the deletion sentinel.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepSuggestion {
    #[serde(default, rename = "stepId")]
    pub step_id: Option<Uuid>,
    #[serde(default, rename = "newText", alias = "suggestedText")]
    pub new_text: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A fresh prediction from the bulk generation flow: `{"year": 35, "event": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionCandidate {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub event: Option<String>,
}

/// A top-level step with substeps from the bulk steps flow.
#[derive(Debug, Clone, Deserialize)]
pub struct StepTreeNode {
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub substeps: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub struct EventUpdate {
    pub id: Uuid,
    pub new_text: String,
}

#[derive(Debug, PartialEq)]
pub struct EventInsert {
    pub year: i32,
    pub text: String,
}

#[derive(Debug, PartialEq)]
pub struct StepUpdate {
    pub id: Uuid,
    pub new_text: String,
}

/// Plan produced by the events-adaptation merge.
#[derive(Debug, Default)]
pub struct EventMergePlan {
    pub updates: Vec<EventUpdate>,
    pub inserts: Vec<EventInsert>,
    /// Suggestions that survived filtering, kept for UI "reason" display.
    pub applied: Vec<EventSuggestion>,
    pub discarded: usize,
}

impl EventMergePlan {
    pub fn change_count(&self) -> usize {
        self.updates.len() + self.inserts.len()
    }
}

/// Plan produced by the steps-adaptation merge.
#[derive(Debug, Default)]
pub struct StepMergePlan {
    pub updates: Vec<StepUpdate>,
    /// Steps to delete, each cascading to its substeps.
    pub deletions: Vec<Uuid>,
    pub applied: Vec<StepSuggestion>,
    pub discarded: usize,
}

impl StepMergePlan {
    pub fn change_count(&self) -> usize {
        self.updates.len() + self.deletions.len()
    }
}

/// Reconcile events-adaptation suggestions.
///
/// Suggestions are resolved by row id; an id outside `eligible_ids` is
/// discarded. A suggestion with no id may insert a new prediction when its
/// year lies inside the window, is not the edited year, and does not collide
/// with any occupied year. Absence of an event from the suggestion list
/// means "leave as is", never deletion, so empty replacement text is also
/// discarded here.
pub fn plan_event_adaptation(
    suggestions: Vec<EventSuggestion>,
    eligible_ids: &HashSet<Uuid>,
    occupied_years: &HashSet<i32>,
    edited_year: i32,
    min_year: i32,
    max_year: i32,
) -> EventMergePlan {
    let mut plan = EventMergePlan::default();
    let mut inserted_years: HashSet<i32> = HashSet::new();

    for suggestion in suggestions {
        let text = suggestion
            .new_text
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            plan.discarded += 1;
            continue;
        }

        match suggestion.id {
            Some(id) if eligible_ids.contains(&id) => {
                plan.updates.push(EventUpdate {
                    id,
                    new_text: text.to_string(),
                });
                plan.applied.push(suggestion);
            }
            Some(_) => plan.discarded += 1,
            None => match suggestion.year {
                Some(year)
                    if year != edited_year
                        && year >= min_year
                        && year <= max_year
                        && !occupied_years.contains(&year)
                        && !inserted_years.contains(&year) =>
                {
                    inserted_years.insert(year);
                    plan.inserts.push(EventInsert {
                        year,
                        text: text.to_string(),
                    });
                    plan.applied.push(suggestion);
                }
                _ => plan.discarded += 1,
            },
        }
    }

    plan
}

/// Reconcile steps-adaptation suggestions. Empty `newText` deletes the step
/// (and, at apply time, its substeps); non-empty updates the text and leaves
/// the step's AI-generated provenance unchanged.
pub fn plan_step_adaptation(
    suggestions: Vec<StepSuggestion>,
    eligible_ids: &HashSet<Uuid>,
) -> StepMergePlan {
    let mut plan = StepMergePlan::default();
    let mut seen: HashSet<Uuid> = HashSet::new();

    for suggestion in suggestions {
        let Some(id) = suggestion.step_id else {
            plan.discarded += 1;
            continue;
        };
        if !eligible_ids.contains(&id) || !seen.insert(id) {
            plan.discarded += 1;
            continue;
        }

        let text = suggestion
            .new_text
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            plan.deletions.push(id);
        } else {
            plan.updates.push(StepUpdate {
                id,
                new_text: text.to_string(),
            });
        }
        plan.applied.push(suggestion);
    }

    plan
}

/// Filter bulk prediction candidates before insertion. The caller has
/// already deleted the AI-owned predictions for the branch; `occupied_years`
/// holds the years still taken by user entries and user-edited predictions.
/// Years outside `[current_age, 100]`, colliding years, duplicates, and
/// empty texts are dropped.
pub fn plan_prediction_replacement(
    candidates: Vec<PredictionCandidate>,
    occupied_years: &HashSet<i32>,
    current_age: i32,
) -> Vec<EventInsert> {
    let mut inserted_years: HashSet<i32> = HashSet::new();
    let mut inserts = Vec::new();

    for candidate in candidates {
        let Some(year) = candidate.year else { continue };
        let text = candidate.event.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty()
            || year < current_age
            || year > MAX_YEAR
            || occupied_years.contains(&year)
            || !inserted_years.insert(year)
        {
            continue;
        }
        inserts.push(EventInsert {
            year,
            text: text.to_string(),
        });
    }

    inserts
}

/// Clean a generated step tree: trim texts, drop empty steps and substeps.
pub fn sanitize_step_tree(nodes: Vec<StepTreeNode>) -> Vec<(String, Vec<String>)> {
    nodes
        .into_iter()
        .filter_map(|node| {
            let step = node.step.as_deref().map(str::trim).unwrap_or_default();
            if step.is_empty() {
                return None;
            }
            let substeps: Vec<String> = node
                .substeps
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            Some((step.to_string(), substeps))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_suggestion(id: Option<u128>, year: Option<i32>, text: &str) -> EventSuggestion {
        EventSuggestion {
            id: id.map(Uuid::from_u128),
            new_text: Some(text.to_string()),
            year,
            reason: Some("test".to_string()),
        }
    }

    fn step_suggestion(id: Option<u128>, text: &str) -> StepSuggestion {
        StepSuggestion {
            step_id: id.map(Uuid::from_u128),
            new_text: Some(text.to_string()),
            reason: None,
        }
    }

    #[test]
    fn event_suggestion_outside_eligible_set_is_discarded() {
        let eligible: HashSet<Uuid> = [Uuid::from_u128(1)].into();
        let plan = plan_event_adaptation(
            vec![
                event_suggestion(Some(1), None, "updated"),
                event_suggestion(Some(2), None, "hallucinated id"),
            ],
            &eligible,
            &HashSet::new(),
            40,
            37,
            45,
        );
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].id, Uuid::from_u128(1));
        assert_eq!(plan.discarded, 1);
        assert_eq!(plan.change_count(), 1);
    }

    #[test]
    fn event_insertions_respect_window_and_occupancy() {
        let occupied: HashSet<i32> = [42].into();
        let plan = plan_event_adaptation(
            vec![
                event_suggestion(None, Some(41), "new prediction"),
                event_suggestion(None, Some(42), "collides with occupied year"),
                event_suggestion(None, Some(40), "targets the edited year"),
                event_suggestion(None, Some(50), "outside the window"),
                event_suggestion(None, Some(41), "duplicate year"),
            ],
            &HashSet::new(),
            &occupied,
            40,
            37,
            45,
        );
        assert_eq!(plan.inserts, vec![EventInsert { year: 41, text: "new prediction".into() }]);
        assert_eq!(plan.discarded, 4);
    }

    #[test]
    fn empty_event_text_is_not_a_deletion() {
        // Events flow has no deletion sentinel: absence means "leave as is",
        // and empty replacement text is just dropped.
        let eligible: HashSet<Uuid> = [Uuid::from_u128(1)].into();
        let plan = plan_event_adaptation(
            vec![EventSuggestion {
                id: Some(Uuid::from_u128(1)),
                new_text: Some("   ".to_string()),
                year: None,
                reason: None,
            }],
            &eligible,
            &HashSet::new(),
            40,
            37,
            45,
        );
        assert_eq!(plan.change_count(), 0);
        assert_eq!(plan.discarded, 1);
    }

    #[test]
    fn step_deletion_sentinel_is_empty_text() {
        let eligible: HashSet<Uuid> = [Uuid::from_u128(1), Uuid::from_u128(2)].into();
        let plan = plan_step_adaptation(
            vec![
                step_suggestion(Some(1), ""),
                step_suggestion(Some(2), "refined step"),
            ],
            &eligible,
        );
        assert_eq!(plan.deletions, vec![Uuid::from_u128(1)]);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].new_text, "refined step");
    }

    #[test]
    fn step_suggestions_for_user_owned_ids_are_ignored() {
        // Eligible set already excludes user-authored and user-edited steps;
        // anything else the oracle references must be dropped.
        let eligible: HashSet<Uuid> = [Uuid::from_u128(1)].into();
        let plan = plan_step_adaptation(
            vec![
                step_suggestion(Some(7), "touches a user step"),
                step_suggestion(None, "no id at all"),
            ],
            &eligible,
        );
        assert_eq!(plan.change_count(), 0);
        assert_eq!(plan.discarded, 2);
    }

    #[test]
    fn duplicate_step_suggestions_apply_once() {
        let eligible: HashSet<Uuid> = [Uuid::from_u128(1)].into();
        let plan = plan_step_adaptation(
            vec![
                step_suggestion(Some(1), "first wins"),
                step_suggestion(Some(1), "second is dropped"),
            ],
            &eligible,
        );
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].new_text, "first wins");
        assert_eq!(plan.discarded, 1);
    }

    #[test]
    fn empty_suggestion_list_plans_nothing() {
        let plan = plan_step_adaptation(Vec::new(), &HashSet::new());
        assert_eq!(plan.change_count(), 0);
        assert_eq!(plan.discarded, 0);
    }

    #[test]
    fn prediction_replacement_filters_range_collisions_and_duplicates() {
        let occupied: HashSet<i32> = [40].into();
        let candidates = vec![
            PredictionCandidate { year: Some(35), event: Some("ok".into()) },
            PredictionCandidate { year: Some(40), event: Some("occupied".into()) },
            PredictionCandidate { year: Some(25), event: Some("in the past".into()) },
            PredictionCandidate { year: Some(120), event: Some("beyond 100".into()) },
            PredictionCandidate { year: Some(35), event: Some("duplicate".into()) },
            PredictionCandidate { year: None, event: Some("no year".into()) },
            PredictionCandidate { year: Some(50), event: Some("  ".into()) },
        ];
        let inserts = plan_prediction_replacement(candidates, &occupied, 30);
        assert_eq!(inserts, vec![EventInsert { year: 35, text: "ok".into() }]);
    }

    #[test]
    fn prediction_replacement_is_idempotent_per_year() {
        // Re-running the flow always deletes AI-owned rows first, so a
        // second pass with the same candidates plans the same single insert
        // per year.
        let candidates = || {
            vec![
                PredictionCandidate { year: Some(45), event: Some("a".into()) },
                PredictionCandidate { year: Some(60), event: Some("b".into()) },
            ]
        };
        let first = plan_prediction_replacement(candidates(), &HashSet::new(), 30);
        let second = plan_prediction_replacement(candidates(), &HashSet::new(), 30);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn step_tree_sanitization_drops_blanks() {
        let nodes = vec![
            StepTreeNode {
                step: Some("Build skills".into()),
                substeps: vec!["Learn".into(), "  ".into(), "Practice".into()],
            },
            StepTreeNode { step: Some("   ".into()), substeps: vec!["orphan".into()] },
            StepTreeNode { step: None, substeps: vec![] },
        ];
        let tree = sanitize_step_tree(nodes);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].0, "Build skills");
        assert_eq!(tree[0].1, vec!["Learn".to_string(), "Practice".to_string()]);
    }

    #[test]
    fn suggestion_shapes_deserialize_from_oracle_json() {
        let raw = serde_json::json!({
            "stepId": "00000000-0000-0000-0000-000000000001",
            "newText": "Updated",
            "reason": "edit shifted priorities"
        });
        let suggestion: StepSuggestion = serde_json::from_value(raw).unwrap();
        assert_eq!(suggestion.step_id, Some(Uuid::from_u128(1)));

        // The older route variant returned `suggestedText`.
        let raw = serde_json::json!({
            "stepId": "00000000-0000-0000-0000-000000000002",
            "suggestedText": "Also accepted"
        });
        let suggestion: StepSuggestion = serde_json::from_value(raw).unwrap();
        assert_eq!(suggestion.new_text.as_deref(), Some("Also accepted"));
    }
}
