//! Shared row types and queries used by several route modules.
//!
//! Routes that own a single table keep their queries inline; the rows here
//! are the ones the generation and adaptation flows all need to load.

use chrono::{DateTime, Utc};
use lifemap_core::prompts::PromptKind;
use lifemap_core::provenance::Provenance;
use lifemap_core::window::{EventItem, StepItem};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct TimelineRow {
    pub id: Uuid,
    pub current_age: i32,
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct BranchRow {
    pub branch_index: i32,
    pub branch_name: String,
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub branch_index: Option<i32>,
    pub year: i32,
    pub event_text: String,
    pub is_prediction: bool,
    pub is_user_edited: bool,
    pub created_at: DateTime<Utc>,
}

impl EventRow {
    pub fn provenance(&self) -> Provenance {
        Provenance::from_flags(self.is_prediction, self.is_user_edited)
    }

    pub fn to_item(&self) -> EventItem {
        EventItem {
            id: self.id,
            year: self.year,
            text: self.event_text.clone(),
            provenance: self.provenance(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct MissionRow {
    pub id: Uuid,
    pub timeline_id: Uuid,
    pub branch_index: i32,
    pub mission_text: String,
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct MetricRow {
    pub id: Uuid,
    pub metric_text: String,
    pub display_order: i32,
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct StepRow {
    pub id: Uuid,
    pub parent_step_id: Option<Uuid>,
    pub step_text: String,
    pub display_order: i32,
    pub is_ai_generated: bool,
    pub is_user_edited: bool,
}

impl StepRow {
    pub fn provenance(&self) -> Provenance {
        Provenance::from_flags(self.is_ai_generated, self.is_user_edited)
    }

    pub fn to_item(&self) -> StepItem {
        StepItem {
            id: self.id,
            parent_step_id: self.parent_step_id,
            display_order: self.display_order,
            text: self.step_text.clone(),
            provenance: self.provenance(),
        }
    }
}

pub async fn timeline_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<TimelineRow>, sqlx::Error> {
    sqlx::query_as::<_, TimelineRow>("SELECT id, current_age FROM timelines WHERE user_id = $1")
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn branch(
    pool: &PgPool,
    timeline_id: Uuid,
    branch_index: i32,
) -> Result<Option<BranchRow>, sqlx::Error> {
    sqlx::query_as::<_, BranchRow>(
        "SELECT branch_index, branch_name FROM possibility_branches \
         WHERE timeline_id = $1 AND branch_index = $2",
    )
    .bind(timeline_id)
    .bind(branch_index)
    .fetch_optional(pool)
    .await
}

/// All events attached to one branch (user entries and predictions),
/// ordered by year.
pub async fn branch_events(
    pool: &PgPool,
    timeline_id: Uuid,
    branch_index: i32,
) -> Result<Vec<EventRow>, sqlx::Error> {
    sqlx::query_as::<_, EventRow>(
        "SELECT id, branch_index, year, event_text, is_prediction, is_user_edited, created_at \
         FROM events \
         WHERE timeline_id = $1 AND branch_index = $2 \
         ORDER BY year, id",
    )
    .bind(timeline_id)
    .bind(branch_index)
    .fetch_all(pool)
    .await
}

/// Shared past history (branch_index null) within an inclusive year range.
pub async fn past_events(
    pool: &PgPool,
    timeline_id: Uuid,
    from_year: i32,
    to_year: i32,
) -> Result<Vec<EventRow>, sqlx::Error> {
    sqlx::query_as::<_, EventRow>(
        "SELECT id, branch_index, year, event_text, is_prediction, is_user_edited, created_at \
         FROM events \
         WHERE timeline_id = $1 AND branch_index IS NULL \
           AND year >= $2 AND year <= $3 \
         ORDER BY year, id",
    )
    .bind(timeline_id)
    .bind(from_year)
    .bind(to_year)
    .fetch_all(pool)
    .await
}

pub async fn mission_for_branch(
    pool: &PgPool,
    timeline_id: Uuid,
    branch_index: i32,
) -> Result<Option<MissionRow>, sqlx::Error> {
    sqlx::query_as::<_, MissionRow>(
        "SELECT id, timeline_id, branch_index, mission_text FROM life_missions \
         WHERE timeline_id = $1 AND branch_index = $2",
    )
    .bind(timeline_id)
    .bind(branch_index)
    .fetch_optional(pool)
    .await
}

/// Mission by id, only when its timeline belongs to `user_id`.
pub async fn mission_owned(
    pool: &PgPool,
    mission_id: Uuid,
    user_id: Uuid,
) -> Result<Option<MissionRow>, sqlx::Error> {
    sqlx::query_as::<_, MissionRow>(
        "SELECT m.id, m.timeline_id, m.branch_index, m.mission_text \
         FROM life_missions m \
         JOIN timelines t ON t.id = m.timeline_id \
         WHERE m.id = $1 AND t.user_id = $2",
    )
    .bind(mission_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn metrics_for_mission(
    pool: &PgPool,
    mission_id: Uuid,
) -> Result<Vec<MetricRow>, sqlx::Error> {
    sqlx::query_as::<_, MetricRow>(
        "SELECT id, metric_text, display_order FROM success_metrics \
         WHERE mission_id = $1 \
         ORDER BY display_order, id",
    )
    .bind(mission_id)
    .fetch_all(pool)
    .await
}

pub async fn steps_for_mission(
    pool: &PgPool,
    mission_id: Uuid,
) -> Result<Vec<StepRow>, sqlx::Error> {
    sqlx::query_as::<_, StepRow>(
        "SELECT id, parent_step_id, step_text, display_order, is_ai_generated, is_user_edited \
         FROM mission_steps \
         WHERE mission_id = $1 \
         ORDER BY display_order, id",
    )
    .bind(mission_id)
    .fetch_all(pool)
    .await
}

/// The caller's template override for a flow, if any.
pub async fn custom_template(
    pool: &PgPool,
    user_id: Uuid,
    kind: PromptKind,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT template FROM custom_prompts WHERE user_id = $1 AND prompt_type = $2",
    )
    .bind(user_id)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await
}

/// Serialize events as "Year N: text" lines for prompt context.
pub fn format_event_lines(events: &[EventRow], fallback: &str) -> String {
    if events.is_empty() {
        return fallback.to_string();
    }
    events
        .iter()
        .map(|e| format!("Year {}: {}", e.year, e.event_text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Serialize metrics as a comma-separated list for prompt context.
pub fn format_metric_list(metrics: &[MetricRow], fallback: &str) -> String {
    if metrics.is_empty() {
        return fallback.to_string();
    }
    metrics
        .iter()
        .map(|m| m.metric_text.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(year: i32, text: &str) -> EventRow {
        EventRow {
            id: Uuid::now_v7(),
            branch_index: None,
            year,
            event_text: text.to_string(),
            is_prediction: false,
            is_user_edited: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn event_lines_fall_back_when_empty() {
        assert_eq!(format_event_lines(&[], "No past events"), "No past events");
        let lines = format_event_lines(&[event(28, "Graduated"), event(29, "First job")], "-");
        assert_eq!(lines, "Year 28: Graduated\nYear 29: First job");
    }

    #[test]
    fn metric_list_joins_with_commas() {
        assert_eq!(format_metric_list(&[], "No metrics defined"), "No metrics defined");
        let metrics = vec![
            MetricRow { id: Uuid::now_v7(), metric_text: "Savings".into(), display_order: 0 },
            MetricRow { id: Uuid::now_v7(), metric_text: "Health".into(), display_order: 1 },
        ];
        assert_eq!(format_metric_list(&metrics, "-"), "Savings, Health");
    }

    #[test]
    fn rows_map_to_window_items_with_provenance() {
        let row = EventRow {
            id: Uuid::from_u128(1),
            branch_index: Some(0),
            year: 45,
            event_text: "Prediction".into(),
            is_prediction: true,
            is_user_edited: false,
            created_at: Utc::now(),
        };
        let item = row.to_item();
        assert_eq!(item.year, 45);
        assert!(item.provenance.is_adaptable());

        let step = StepRow {
            id: Uuid::from_u128(2),
            parent_step_id: None,
            step_text: "Step".into(),
            display_order: 0,
            is_ai_generated: true,
            is_user_edited: true,
        };
        assert!(!step.to_item().provenance.is_adaptable());
    }
}
