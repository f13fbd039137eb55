//! Bulk generation flows: fresh predictions for a branch and a step
//! breakdown for a mission. Both replace the AI-owned rows wholesale and
//! leave user-authored and user-edited rows untouched, so re-running is
//! always safe.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use lifemap_core::error::ApiError;
use lifemap_core::merge::{self, PredictionCandidate, StepTreeNode};
use lifemap_core::parser::{self, Extraction};
use lifemap_core::prompts::{self, PromptKind};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::oracle::GenerationConfig;
use crate::routes::missions::{StepNode, build_step_tree};
use crate::routes::timeline::validate_branch_index;
use crate::state::AppState;
use crate::store::{self, EventRow};

/// Years of past history fed to the prediction prompt.
const PAST_HISTORY_YEARS: i32 = 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/timeline/branches/{branch_index}/predictions",
            post(generate_predictions),
        )
        .route(
            "/v1/missions/{mission_id}/steps/generate",
            post(generate_steps),
        )
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// Language fallback when detection is inconclusive (ISO 639-1). Defaults
    /// to "en".
    #[serde(default)]
    pub language_hint: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PredictionsResponse {
    pub inserted: usize,
    /// The full post-replacement event list for the branch.
    pub events: Vec<EventRow>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GeneratedStepsResponse {
    pub inserted: usize,
    pub steps: Vec<StepNode>,
}

/// Load the caller's override for a flow, falling back to the default
/// template.
async fn effective_template(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    kind: PromptKind,
) -> Result<String, AppError> {
    Ok(store::custom_template(pool, user_id, kind)
        .await?
        .unwrap_or_else(|| kind.default_template().to_string()))
}

/// Regenerate AI predictions for a branch
///
/// Deletes every AI-owned prediction on the branch and inserts a fresh set
/// from the generation service. User entries and user-edited predictions
/// survive, and fresh predictions never land on their years.
#[utoipa::path(
    post,
    path = "/v1/timeline/branches/{branch_index}/predictions",
    request_body = GenerateRequest,
    params(("branch_index" = i32, Path, description = "Branch position, 0 to 4")),
    responses(
        (status = 200, description = "Predictions replaced", body = PredictionsResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No timeline yet", body = ApiError),
        (status = 502, description = "Generation service failure", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "generation"
)]
pub async fn generate_predictions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(branch_index): Path<i32>,
    AppJson(req): AppJson<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_branch_index(branch_index)?;

    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;
    let branch = store::branch(&state.db, timeline.id, branch_index)
        .await?
        .ok_or(AppError::NotFound { resource: "branch" })?;

    let past_from = (timeline.current_age - PAST_HISTORY_YEARS).max(0);
    let past = store::past_events(
        &state.db,
        timeline.id,
        past_from,
        (timeline.current_age - 1).max(0),
    )
    .await?;
    let branch_events = store::branch_events(&state.db, timeline.id, branch_index).await?;
    let user_entries: Vec<&EventRow> = branch_events
        .iter()
        .filter(|e| !e.is_prediction)
        .collect();
    let mission = store::mission_for_branch(&state.db, timeline.id, branch_index).await?;

    let fallback = req.language_hint.as_deref().unwrap_or("en");
    let mut samples: Vec<&str> = past.iter().map(|e| e.event_text.as_str()).collect();
    samples.extend(user_entries.iter().map(|e| e.event_text.as_str()));
    if let Some(mission) = &mission {
        samples.push(mission.mission_text.as_str());
    }
    let language = state.oracle.detect_language(&samples, fallback).await;

    let entries_text = if user_entries.is_empty() {
        "No plans entered yet".to_string()
    } else {
        user_entries
            .iter()
            .map(|e| format!("Year {}: {}", e.year, e.event_text))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let template =
        effective_template(&state.db, user.user_id, PromptKind::TimelinePrediction).await?;
    let age = timeline.current_age.to_string();
    let prompt = prompts::render(
        &template,
        &[
            ("branch_name", branch.branch_name.as_str()),
            ("current_age", age.as_str()),
            (
                "past_events",
                &store::format_event_lines(&past, "No past events recorded"),
            ),
            ("user_entries", entries_text.as_str()),
            (
                "language_instruction",
                &prompts::language_instruction(&language),
            ),
        ],
    );

    let raw = state
        .oracle
        .generate(&prompt, GenerationConfig::PREDICTIONS)
        .await?;
    let candidates: Vec<PredictionCandidate> = match parser::extract_array(&raw)? {
        Extraction::Empty => Vec::new(),
        Extraction::Array(items) => parser::deserialize_lenient(items),
    };

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "DELETE FROM events \
         WHERE timeline_id = $1 AND branch_index = $2 \
           AND is_prediction AND NOT is_user_edited",
    )
    .bind(timeline.id)
    .bind(branch_index)
    .execute(&mut *tx)
    .await?;

    // Years still taken after the delete: user entries and edited predictions.
    let occupied: Vec<i32> = sqlx::query_scalar(
        "SELECT year FROM events WHERE timeline_id = $1 AND branch_index = $2",
    )
    .bind(timeline.id)
    .bind(branch_index)
    .fetch_all(&mut *tx)
    .await?;

    let inserts = merge::plan_prediction_replacement(
        candidates,
        &occupied.into_iter().collect(),
        timeline.current_age,
    );

    for insert in &inserts {
        sqlx::query(
            "INSERT INTO events (id, timeline_id, branch_index, year, event_text, \
                                 is_prediction, is_user_edited) \
             VALUES ($1, $2, $3, $4, $5, TRUE, FALSE)",
        )
        .bind(Uuid::now_v7())
        .bind(timeline.id)
        .bind(branch_index)
        .bind(insert.year)
        .bind(&insert.text)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        branch_index,
        inserted = inserts.len(),
        "replaced branch predictions"
    );

    let events = store::branch_events(&state.db, timeline.id, branch_index).await?;
    Ok(Json(PredictionsResponse {
        inserted: inserts.len(),
        events,
    }))
}

/// Regenerate the AI step breakdown for a mission
///
/// Deletes every AI-generated, unedited step (substeps first, then parents
/// that have no surviving children) and inserts the freshly generated tree.
#[utoipa::path(
    post,
    path = "/v1/missions/{mission_id}/steps/generate",
    request_body = GenerateRequest,
    params(("mission_id" = Uuid, Path, description = "Mission id")),
    responses(
        (status = 200, description = "Steps replaced", body = GeneratedStepsResponse),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Mission not found", body = ApiError),
        (status = 502, description = "Generation service failure", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "generation"
)]
pub async fn generate_steps(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(mission_id): Path<Uuid>,
    AppJson(req): AppJson<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mission = store::mission_owned(&state.db, mission_id, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "mission",
        })?;
    let branch = store::branch(&state.db, mission.timeline_id, mission.branch_index)
        .await?
        .ok_or(AppError::NotFound { resource: "branch" })?;
    let metrics = store::metrics_for_mission(&state.db, mission.id).await?;
    let existing = store::steps_for_mission(&state.db, mission.id).await?;

    let fallback = req.language_hint.as_deref().unwrap_or("en");
    let mut samples: Vec<&str> = vec![mission.mission_text.as_str()];
    samples.extend(metrics.iter().map(|m| m.metric_text.as_str()));
    samples.extend(existing.iter().map(|s| s.step_text.as_str()));
    let language = state.oracle.detect_language(&samples, fallback).await;

    let template = effective_template(&state.db, user.user_id, PromptKind::MissionSteps).await?;
    let prompt = prompts::render(
        &template,
        &[
            ("branch_name", branch.branch_name.as_str()),
            ("mission_text", mission.mission_text.as_str()),
            (
                "metrics",
                &store::format_metric_list(&metrics, "No metrics defined"),
            ),
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
    let nodes: Vec<StepTreeNode> = match parser::extract_array(&raw)? {
        Extraction::Empty => Vec::new(),
        Extraction::Array(items) => parser::deserialize_lenient(items),
    };
    let tree = merge::sanitize_step_tree(nodes);

    let mut tx = state.db.begin().await?;

    // Two passes so an AI parent with a user-edited substep survives: first
    // the AI-owned substeps, then AI-owned parents that have no children
    // left.
    sqlx::query(
        "DELETE FROM mission_steps \
         WHERE mission_id = $1 AND parent_step_id IS NOT NULL \
           AND is_ai_generated AND NOT is_user_edited",
    )
    .bind(mission.id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM mission_steps s \
         WHERE s.mission_id = $1 AND s.parent_step_id IS NULL \
           AND s.is_ai_generated AND NOT s.is_user_edited \
           AND NOT EXISTS ( \
               SELECT 1 FROM mission_steps c WHERE c.parent_step_id = s.id \
           )",
    )
    .bind(mission.id)
    .execute(&mut *tx)
    .await?;

    let mut inserted = 0usize;
    for (order, (step_text, substeps)) in tree.iter().enumerate() {
        let parent_id: Uuid = sqlx::query_scalar(
            "INSERT INTO mission_steps \
               (id, mission_id, parent_step_id, step_text, display_order, \
                is_ai_generated, is_user_edited) \
             VALUES ($1, $2, NULL, $3, $4, TRUE, FALSE) \
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(mission.id)
        .bind(step_text)
        .bind(order as i32)
        .fetch_one(&mut *tx)
        .await?;
        inserted += 1;

        for (sub_order, substep) in substeps.iter().enumerate() {
            sqlx::query(
                "INSERT INTO mission_steps \
                   (id, mission_id, parent_step_id, step_text, display_order, \
                    is_ai_generated, is_user_edited) \
                 VALUES ($1, $2, $3, $4, $5, TRUE, FALSE)",
            )
            .bind(Uuid::now_v7())
            .bind(mission.id)
            .bind(parent_id)
            .bind(substep)
            .bind(sub_order as i32)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }
    }

    tx.commit().await?;

    tracing::info!(%mission_id, inserted, "replaced mission steps");

    let steps = store::steps_for_mission(&state.db, mission.id).await?;
    Ok(Json(GeneratedStepsResponse {
        inserted,
        steps: build_step_tree(&steps),
    }))
}
