//! Edit-propagation flows. The user's edit is persisted first (with its
//! provenance transition), then the surrounding AI-generated items are
//! offered to the generation service for revision inside a bounded window.
//! Whatever comes back is reconciled against the eligible-id set, so the
//! oracle can never touch user-owned rows.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use lifemap_core::error::ApiError;
use lifemap_core::merge::{
    self, EventMergePlan, EventSuggestion, StepMergePlan, StepSuggestion,
};
use lifemap_core::parser::{self, Extraction};
use lifemap_core::prompts::{self, PromptKind};
use lifemap_core::window::{self, EventItem, StepItem, WindowError};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::oracle::GenerationConfig;
use crate::routes::timeline::validate_branch_index;
use crate::state::AppState;
use crate::store::{self, EventRow, StepRow};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/timeline/branches/{branch_index}/adaptations",
            post(adapt_events),
        )
        .route(
            "/v1/missions/{mission_id}/steps/{step_id}/adaptations",
            post(adapt_steps),
        )
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdaptEventsRequest {
    pub year: i32,
    pub new_text: String,
    #[serde(default)]
    pub language_hint: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdaptStepsRequest {
    pub new_text: String,
    #[serde(default)]
    pub language_hint: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventAdaptationResponse {
    /// Rows updated plus rows inserted.
    pub changes: usize,
    pub discarded: usize,
    /// Surviving suggestions, including the oracle's reasons.
    pub suggestions: Vec<EventSuggestion>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StepAdaptationResponse {
    pub changes: usize,
    pub discarded: usize,
    pub suggestions: Vec<StepSuggestion>,
}

fn validate_text(text: &str, field: &'static str, max: usize) -> Result<(), AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > max {
        return Err(AppError::Validation {
            message: format!("{field} must be 1 to {max} characters"),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        });
    }
    Ok(())
}

fn map_window_error(err: WindowError) -> AppError {
    match err {
        WindowError::EditedItemNotFound => AppError::NotFound {
            resource: "edited item",
        },
    }
}

/// Propagate a timeline-event edit to nearby AI predictions
///
/// Persists the edit at (branch, year) first, then asks the generation
/// service to revise AI predictions within 3 years before and 5 after. The
/// edit survives even when the generation call fails.
#[utoipa::path(
    post,
    path = "/v1/timeline/branches/{branch_index}/adaptations",
    request_body = AdaptEventsRequest,
    params(("branch_index" = i32, Path, description = "Branch position, 0 to 4")),
    responses(
        (status = 200, description = "Edit stored, adaptation applied", body = EventAdaptationResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No timeline yet", body = ApiError),
        (status = 502, description = "Generation service failure", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "adaptation"
)]
pub async fn adapt_events(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(branch_index): Path<i32>,
    AppJson(req): AppJson<AdaptEventsRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_branch_index(branch_index)?;
    if !(0..=merge::MAX_YEAR).contains(&req.year) {
        return Err(AppError::Validation {
            message: format!("year must be between 0 and {}", merge::MAX_YEAR),
            field: Some("year".to_string()),
            received: Some(serde_json::json!(req.year)),
            docs_hint: None,
        });
    }
    validate_text(&req.new_text, "new_text", 500)?;

    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;
    let branch = store::branch(&state.db, timeline.id, branch_index)
        .await?
        .ok_or(AppError::NotFound { resource: "branch" })?;

    let edited_id = persist_event_edit(&state.db, timeline.id, branch_index, &req).await?;

    let branch_events = store::branch_events(&state.db, timeline.id, branch_index).await?;
    let past = store::past_events(&state.db, timeline.id, 0, merge::MAX_YEAR).await?;
    let mission = store::mission_for_branch(&state.db, timeline.id, branch_index).await?;
    let metrics = match &mission {
        Some(m) => store::metrics_for_mission(&state.db, m.id).await?,
        None => Vec::new(),
    };

    // Past history rides along in the transcript for continuity; it is all
    // user-authored, so none of it is eligible.
    let items: Vec<EventItem> = branch_events
        .iter()
        .chain(past.iter())
        .map(EventRow::to_item)
        .collect();
    let win = window::event_window(&items, edited_id).map_err(map_window_error)?;

    if win.eligible_ids.is_empty() {
        return Ok(Json(EventAdaptationResponse {
            changes: 0,
            discarded: 0,
            suggestions: Vec::new(),
        }));
    }

    let fallback = req.language_hint.as_deref().unwrap_or("en");
    let mut samples: Vec<&str> = vec![req.new_text.as_str()];
    samples.extend(branch_events.iter().map(|e| e.event_text.as_str()));
    let language = state.oracle.detect_language(&samples, fallback).await;

    let template = store::custom_template(&state.db, user.user_id, PromptKind::TimelineAdaptation)
        .await?
        .unwrap_or_else(|| PromptKind::TimelineAdaptation.default_template().to_string());
    let mission_text = mission
        .as_ref()
        .map(|m| m.mission_text.as_str())
        .unwrap_or("No mission defined");
    let prompt = prompts::render(
        &template,
        &[
            ("branch_name", branch.branch_name.as_str()),
            ("mission_text", mission_text),
            (
                "metrics",
                &store::format_metric_list(&metrics, "No metrics defined"),
            ),
            (
                "past_events",
                &store::format_event_lines(&past, "No past events recorded"),
            ),
            ("timeline", win.transcript.as_str()),
            ("edited_year", &win.edited_year.to_string()),
            ("edited_text", req.new_text.trim()),
            ("min_year", &win.min_year.to_string()),
            ("max_year", &win.max_year.to_string()),
            (
                "language_instruction",
                &prompts::language_instruction(&language),
            ),
        ],
    );

    let raw = state
        .oracle
        .generate(&prompt, GenerationConfig::ADAPTATION)
        .await?;
    let suggestions: Vec<EventSuggestion> = match parser::extract_array(&raw)? {
        Extraction::Empty => Vec::new(),
        Extraction::Array(items) => parser::deserialize_lenient(items),
    };

    let occupied: HashSet<i32> = branch_events.iter().map(|e| e.year).collect();
    let plan = merge::plan_event_adaptation(
        suggestions,
        &win.eligible_ids,
        &occupied,
        win.edited_year,
        win.min_year,
        win.max_year,
    );

    apply_event_plan(&state.db, timeline.id, branch_index, &plan).await?;

    tracing::info!(
        branch_index,
        changes = plan.change_count(),
        discarded = plan.discarded,
        "applied event adaptation"
    );

    Ok(Json(EventAdaptationResponse {
        changes: plan.change_count(),
        discarded: plan.discarded,
        suggestions: plan.applied,
    }))
}

/// Store the user's edit at its (branch, year) slot and return the edited
/// row's id. An existing row keeps its id; editing a prediction flips it to
/// user-edited. Duplicate rows at the slot collapse to the oldest one.
async fn persist_event_edit(
    pool: &sqlx::PgPool,
    timeline_id: Uuid,
    branch_index: i32,
    req: &AdaptEventsRequest,
) -> Result<Uuid, AppError> {
    let mut tx = pool.begin().await?;

    let existing: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM events \
         WHERE timeline_id = $1 AND branch_index = $2 AND year = $3 \
         ORDER BY id",
    )
    .bind(timeline_id)
    .bind(branch_index)
    .bind(req.year)
    .fetch_all(&mut *tx)
    .await?;

    let edited_id = match existing.first() {
        Some(&keep) => {
            if existing.len() > 1 {
                sqlx::query(
                    "DELETE FROM events \
                     WHERE timeline_id = $1 AND branch_index = $2 AND year = $3 AND id <> $4",
                )
                .bind(timeline_id)
                .bind(branch_index)
                .bind(req.year)
                .bind(keep)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query(
                "UPDATE events \
                 SET event_text = $1, \
                     is_user_edited = is_user_edited OR is_prediction, \
                     updated_at = NOW() \
                 WHERE id = $2",
            )
            .bind(req.new_text.trim())
            .bind(keep)
            .execute(&mut *tx)
            .await?;
            keep
        }
        None => {
            let id = Uuid::now_v7();
            sqlx::query(
                "INSERT INTO events (id, timeline_id, branch_index, year, event_text, \
                                     is_prediction, is_user_edited) \
                 VALUES ($1, $2, $3, $4, $5, FALSE, FALSE)",
            )
            .bind(id)
            .bind(timeline_id)
            .bind(branch_index)
            .bind(req.year)
            .bind(req.new_text.trim())
            .execute(&mut *tx)
            .await?;
            id
        }
    };

    tx.commit().await?;
    Ok(edited_id)
}

/// Apply an event merge plan in one transaction. The prediction guards are
/// re-checked in SQL so a row edited between planning and apply stays
/// untouched.
async fn apply_event_plan(
    pool: &sqlx::PgPool,
    timeline_id: Uuid,
    branch_index: i32,
    plan: &EventMergePlan,
) -> Result<(), AppError> {
    if plan.change_count() == 0 {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    for update in &plan.updates {
        sqlx::query(
            "UPDATE events SET event_text = $1, updated_at = NOW() \
             WHERE id = $2 AND timeline_id = $3 \
               AND is_prediction AND NOT is_user_edited",
        )
        .bind(&update.new_text)
        .bind(update.id)
        .bind(timeline_id)
        .execute(&mut *tx)
        .await?;
    }

    for insert in &plan.inserts {
        sqlx::query(
            "INSERT INTO events (id, timeline_id, branch_index, year, event_text, \
                                 is_prediction, is_user_edited) \
             VALUES ($1, $2, $3, $4, $5, TRUE, FALSE)",
        )
        .bind(Uuid::now_v7())
        .bind(timeline_id)
        .bind(branch_index)
        .bind(insert.year)
        .bind(&insert.text)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Propagate a mission-step edit to nearby AI steps
///
/// Persists the edit first, then asks the generation service to revise AI
/// steps within 2 positions before and 3 after in flattened order. An empty
/// `newText` in a suggestion deletes that step and its substeps.
#[utoipa::path(
    post,
    path = "/v1/missions/{mission_id}/steps/{step_id}/adaptations",
    request_body = AdaptStepsRequest,
    params(
        ("mission_id" = Uuid, Path, description = "Mission id"),
        ("step_id" = Uuid, Path, description = "The step that was edited")
    ),
    responses(
        (status = 200, description = "Edit stored, adaptation applied", body = StepAdaptationResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Mission or step not found", body = ApiError),
        (status = 502, description = "Generation service failure", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "adaptation"
)]
pub async fn adapt_steps(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((mission_id, step_id)): Path<(Uuid, Uuid)>,
    AppJson(req): AppJson<AdaptStepsRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_text(&req.new_text, "new_text", 500)?;

    let mission = store::mission_owned(&state.db, mission_id, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "mission",
        })?;
    let branch = store::branch(&state.db, mission.timeline_id, mission.branch_index)
        .await?
        .ok_or(AppError::NotFound { resource: "branch" })?;

    // Persist the edit with its provenance transition before anything else.
    let updated = sqlx::query(
        "UPDATE mission_steps \
         SET step_text = $1, \
             is_user_edited = is_user_edited OR is_ai_generated, \
             updated_at = NOW() \
         WHERE id = $2 AND mission_id = $3",
    )
    .bind(req.new_text.trim())
    .bind(step_id)
    .bind(mission.id)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound { resource: "step" });
    }

    let rows = store::steps_for_mission(&state.db, mission.id).await?;
    let items: Vec<StepItem> = rows.iter().map(StepRow::to_item).collect();
    let win = window::step_window(&items, step_id).map_err(map_window_error)?;

    if win.eligible_ids.is_empty() {
        return Ok(Json(StepAdaptationResponse {
            changes: 0,
            discarded: 0,
            suggestions: Vec::new(),
        }));
    }

    let metrics = store::metrics_for_mission(&state.db, mission.id).await?;

    let fallback = req.language_hint.as_deref().unwrap_or("en");
    let mut samples: Vec<&str> = vec![req.new_text.as_str(), mission.mission_text.as_str()];
    samples.extend(rows.iter().map(|s| s.step_text.as_str()));
    let language = state.oracle.detect_language(&samples, fallback).await;

    let template = store::custom_template(&state.db, user.user_id, PromptKind::StepsAdaptation)
        .await?
        .unwrap_or_else(|| PromptKind::StepsAdaptation.default_template().to_string());
    let prompt = prompts::render(
        &template,
        &[
            ("branch_name", branch.branch_name.as_str()),
            ("mission_text", mission.mission_text.as_str()),
            (
                "metrics",
                &store::format_metric_list(&metrics, "No metrics defined"),
            ),
            ("steps", win.transcript.as_str()),
            ("edited_position", &win.edited_position.to_string()),
            ("edited_text", req.new_text.trim()),
            (
                "language_instruction",
                &prompts::language_instruction(&language),
            ),
        ],
    );

    let raw = state
        .oracle
        .generate(&prompt, GenerationConfig::ADAPTATION)
        .await?;
    let suggestions: Vec<StepSuggestion> = match parser::extract_array(&raw)? {
        Extraction::Empty => Vec::new(),
        Extraction::Array(items) => parser::deserialize_lenient(items),
    };

    let plan = merge::plan_step_adaptation(suggestions, &win.eligible_ids);
    apply_step_plan(&state.db, mission.id, &plan).await?;

    tracing::info!(
        %mission_id,
        changes = plan.change_count(),
        discarded = plan.discarded,
        "applied step adaptation"
    );

    Ok(Json(StepAdaptationResponse {
        changes: plan.change_count(),
        discarded: plan.discarded,
        suggestions: plan.applied,
    }))
}

/// Apply a step merge plan in one transaction, re-checking the AI-ownership
/// guards in SQL. Deletions cascade to substeps through the FK.
async fn apply_step_plan(
    pool: &sqlx::PgPool,
    mission_id: Uuid,
    plan: &StepMergePlan,
) -> Result<(), AppError> {
    if plan.change_count() == 0 {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    for update in &plan.updates {
        sqlx::query(
            "UPDATE mission_steps SET step_text = $1, updated_at = NOW() \
             WHERE id = $2 AND mission_id = $3 \
               AND is_ai_generated AND NOT is_user_edited",
        )
        .bind(&update.new_text)
        .bind(update.id)
        .bind(mission_id)
        .execute(&mut *tx)
        .await?;
    }

    if !plan.deletions.is_empty() {
        sqlx::query(
            "DELETE FROM mission_steps \
             WHERE id = ANY($1) AND mission_id = $2 \
               AND is_ai_generated AND NOT is_user_edited",
        )
        .bind(&plan.deletions)
        .bind(mission_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
