use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use lifemap_core::error::ApiError;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::routes::timeline::validate_branch_index;
use crate::state::AppState;
use crate::store::{self, MetricRow, StepRow};

const MISSION_TEXT_MAX: usize = 5000;
const STEP_TEXT_MAX: usize = 500;

pub fn read_router() -> Router<AppState> {
    Router::new().route(
        "/v1/timeline/branches/{branch_index}/mission",
        get(get_mission),
    )
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/timeline/branches/{branch_index}/mission",
            put(upsert_mission),
        )
        .route("/v1/metrics/{id}", delete(delete_metric))
        .route("/v1/missions/{mission_id}/steps", post(create_step))
        .route("/v1/steps/{id}", patch(edit_step).delete(delete_step))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertMissionRequest {
    pub mission_text: String,
    /// Success metrics in display order. Replaces the existing set.
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateStepRequest {
    /// Parent step for a substep; omit for a top-level step.
    pub parent_step_id: Option<Uuid>,
    pub step_text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EditStepRequest {
    pub step_text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StepNode {
    pub id: Uuid,
    pub step_text: String,
    pub display_order: i32,
    pub is_ai_generated: bool,
    pub is_user_edited: bool,
    pub substeps: Vec<StepNode>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MissionResponse {
    pub id: Uuid,
    pub branch_index: i32,
    pub mission_text: String,
    pub metrics: Vec<MetricRow>,
    pub steps: Vec<StepNode>,
}

fn validate_mission_text(text: &str) -> Result<(), AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MISSION_TEXT_MAX {
        return Err(AppError::Validation {
            message: format!("mission_text must be 1 to {MISSION_TEXT_MAX} characters"),
            field: Some("mission_text".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    Ok(())
}

fn validate_step_text(text: &str) -> Result<(), AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > STEP_TEXT_MAX {
        return Err(AppError::Validation {
            message: format!("step_text must be 1 to {STEP_TEXT_MAX} characters"),
            field: Some("step_text".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    Ok(())
}

/// Assemble parent steps with their substeps nested. Rows arrive ordered by
/// (display_order, id); orphaned substeps are dropped.
pub fn build_step_tree(rows: &[StepRow]) -> Vec<StepNode> {
    let mut parents: Vec<StepNode> = rows
        .iter()
        .filter(|r| r.parent_step_id.is_none())
        .map(|r| StepNode {
            id: r.id,
            step_text: r.step_text.clone(),
            display_order: r.display_order,
            is_ai_generated: r.is_ai_generated,
            is_user_edited: r.is_user_edited,
            substeps: Vec::new(),
        })
        .collect();

    for row in rows.iter().filter(|r| r.parent_step_id.is_some()) {
        if let Some(parent) = parents
            .iter_mut()
            .find(|p| Some(p.id) == row.parent_step_id)
        {
            parent.substeps.push(StepNode {
                id: row.id,
                step_text: row.step_text.clone(),
                display_order: row.display_order,
                is_ai_generated: row.is_ai_generated,
                is_user_edited: row.is_user_edited,
                substeps: Vec::new(),
            });
        }
    }

    parents
}

async fn mission_response(
    pool: &sqlx::PgPool,
    mission: store::MissionRow,
) -> Result<MissionResponse, AppError> {
    let metrics = store::metrics_for_mission(pool, mission.id).await?;
    let steps = store::steps_for_mission(pool, mission.id).await?;
    Ok(MissionResponse {
        id: mission.id,
        branch_index: mission.branch_index,
        mission_text: mission.mission_text,
        metrics,
        steps: build_step_tree(&steps),
    })
}

/// Create or update the mission for a branch
///
/// Mission text is upserted and the metric list is replaced wholesale in
/// the order given. Steps are untouched.
#[utoipa::path(
    put,
    path = "/v1/timeline/branches/{branch_index}/mission",
    request_body = UpsertMissionRequest,
    params(("branch_index" = i32, Path, description = "Branch position, 0 to 4")),
    responses(
        (status = 200, description = "Mission stored", body = MissionResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No timeline yet", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "missions"
)]
pub async fn upsert_mission(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(branch_index): Path<i32>,
    AppJson(req): AppJson<UpsertMissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_branch_index(branch_index)?;
    validate_mission_text(&req.mission_text)?;
    for metric in &req.metrics {
        if metric.trim().is_empty() {
            return Err(AppError::Validation {
                message: "metrics must not contain blank entries".to_string(),
                field: Some("metrics".to_string()),
                received: None,
                docs_hint: None,
            });
        }
    }

    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;

    let mut tx = state.db.begin().await?;

    let mission_id: Uuid = sqlx::query_scalar(
        "INSERT INTO life_missions (id, timeline_id, branch_index, mission_text) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (timeline_id, branch_index) \
         DO UPDATE SET mission_text = EXCLUDED.mission_text \
         RETURNING id",
    )
    .bind(Uuid::now_v7())
    .bind(timeline.id)
    .bind(branch_index)
    .bind(req.mission_text.trim())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM success_metrics WHERE mission_id = $1")
        .bind(mission_id)
        .execute(&mut *tx)
        .await?;

    for (order, metric) in req.metrics.iter().enumerate() {
        sqlx::query(
            "INSERT INTO success_metrics (id, mission_id, metric_text, display_order) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::now_v7())
        .bind(mission_id)
        .bind(metric.trim())
        .bind(order as i32)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let mission = store::mission_owned(&state.db, mission_id, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "mission",
        })?;
    Ok(Json(mission_response(&state.db, mission).await?))
}

/// Fetch the mission for a branch with metrics and the step tree
#[utoipa::path(
    get,
    path = "/v1/timeline/branches/{branch_index}/mission",
    params(("branch_index" = i32, Path, description = "Branch position, 0 to 4")),
    responses(
        (status = 200, description = "Mission with metrics and steps", body = MissionResponse),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No mission for this branch", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "missions"
)]
pub async fn get_mission(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(branch_index): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    validate_branch_index(branch_index)?;

    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;

    let mission = store::mission_for_branch(&state.db, timeline.id, branch_index)
        .await?
        .ok_or(AppError::NotFound {
            resource: "mission",
        })?;

    Ok(Json(mission_response(&state.db, mission).await?))
}

/// Delete a success metric
///
/// Only the metric row goes away; mission text and steps stay as they are.
#[utoipa::path(
    delete,
    path = "/v1/metrics/{id}",
    params(("id" = Uuid, Path, description = "Metric id")),
    responses(
        (status = 204, description = "Metric deleted"),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Metric not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "missions"
)]
pub async fn delete_metric(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query(
        "DELETE FROM success_metrics sm \
         USING life_missions m, timelines t \
         WHERE sm.id = $1 AND m.id = sm.mission_id \
           AND t.id = m.timeline_id AND t.user_id = $2",
    )
    .bind(id)
    .bind(user.user_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound { resource: "metric" });
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Add a step or substep to a mission
#[utoipa::path(
    post,
    path = "/v1/missions/{mission_id}/steps",
    request_body = CreateStepRequest,
    params(("mission_id" = Uuid, Path, description = "Mission id")),
    responses(
        (status = 201, description = "Step created", body = StepRow),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Mission not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "missions"
)]
pub async fn create_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(mission_id): Path<Uuid>,
    AppJson(req): AppJson<CreateStepRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_step_text(&req.step_text)?;

    let mission = store::mission_owned(&state.db, mission_id, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "mission",
        })?;

    // A substep's parent must be a top-level step of this mission (one
    // nesting level).
    if let Some(parent_id) = req.parent_step_id {
        let parent_ok: Option<bool> = sqlx::query_scalar(
            "SELECT parent_step_id IS NULL FROM mission_steps \
             WHERE id = $1 AND mission_id = $2",
        )
        .bind(parent_id)
        .bind(mission.id)
        .fetch_optional(&state.db)
        .await?;

        match parent_ok {
            None => return Err(AppError::NotFound { resource: "step" }),
            Some(false) => {
                return Err(AppError::Validation {
                    message: "substeps cannot be nested under other substeps".to_string(),
                    field: Some("parent_step_id".to_string()),
                    received: Some(serde_json::json!(parent_id)),
                    docs_hint: None,
                });
            }
            Some(true) => {}
        }
    }

    let row = sqlx::query_as::<_, StepRow>(
        "INSERT INTO mission_steps \
           (id, mission_id, parent_step_id, step_text, display_order, \
            is_ai_generated, is_user_edited) \
         SELECT $1, $2, $3, $4, \
                COALESCE(MAX(display_order) + 1, 0), FALSE, FALSE \
         FROM mission_steps \
         WHERE mission_id = $2 AND parent_step_id IS NOT DISTINCT FROM $3 \
         RETURNING id, parent_step_id, step_text, display_order, \
                   is_ai_generated, is_user_edited",
    )
    .bind(Uuid::now_v7())
    .bind(mission.id)
    .bind(req.parent_step_id)
    .bind(req.step_text.trim())
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

/// Edit the text of a step
///
/// Editing an AI-generated step marks it user-edited, which permanently
/// removes it from future adaptation passes.
#[utoipa::path(
    patch,
    path = "/v1/steps/{id}",
    request_body = EditStepRequest,
    params(("id" = Uuid, Path, description = "Step id")),
    responses(
        (status = 200, description = "Step updated", body = StepRow),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Step not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "missions"
)]
pub async fn edit_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<EditStepRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_step_text(&req.step_text)?;

    let row = sqlx::query_as::<_, StepRow>(
        "UPDATE mission_steps s \
         SET step_text = $1, \
             is_user_edited = s.is_user_edited OR s.is_ai_generated, \
             updated_at = NOW() \
         FROM life_missions m, timelines t \
         WHERE s.id = $2 AND m.id = s.mission_id \
           AND t.id = m.timeline_id AND t.user_id = $3 \
         RETURNING s.id, s.parent_step_id, s.step_text, s.display_order, \
                   s.is_ai_generated, s.is_user_edited",
    )
    .bind(req.step_text.trim())
    .bind(id)
    .bind(user.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound { resource: "step" })?;

    Ok(Json(row))
}

/// Delete a step and its substeps
#[utoipa::path(
    delete,
    path = "/v1/steps/{id}",
    params(("id" = Uuid, Path, description = "Step id")),
    responses(
        (status = 204, description = "Step deleted"),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Step not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "missions"
)]
pub async fn delete_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    // parent_step_id is ON DELETE CASCADE, so substeps go with their parent.
    let result = sqlx::query(
        "DELETE FROM mission_steps s \
         USING life_missions m, timelines t \
         WHERE s.id = $1 AND m.id = s.mission_id \
           AND t.id = m.timeline_id AND t.user_id = $2",
    )
    .bind(id)
    .bind(user.user_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound { resource: "step" });
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: u128, parent: Option<u128>, order: i32) -> StepRow {
        StepRow {
            id: Uuid::from_u128(id),
            parent_step_id: parent.map(Uuid::from_u128),
            step_text: format!("step {id}"),
            display_order: order,
            is_ai_generated: true,
            is_user_edited: false,
        }
    }

    #[test]
    fn tree_nests_substeps_under_parents() {
        let rows = vec![
            step(1, None, 0),
            step(2, None, 1),
            step(10, Some(1), 0),
            step(11, Some(1), 1),
            step(20, Some(2), 0),
        ];
        let tree = build_step_tree(&rows);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].substeps.len(), 2);
        assert_eq!(tree[1].substeps.len(), 1);
        assert_eq!(tree[0].substeps[1].id, Uuid::from_u128(11));
    }

    #[test]
    fn tree_drops_orphaned_substeps() {
        let rows = vec![step(1, None, 0), step(10, Some(99), 0)];
        let tree = build_step_tree(&rows);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].substeps.is_empty());
    }

    #[test]
    fn mission_text_bounds() {
        assert!(validate_mission_text("Build a life around music").is_ok());
        assert!(validate_mission_text("  ").is_err());
        assert!(validate_mission_text(&"x".repeat(MISSION_TEXT_MAX + 1)).is_err());
    }
}
