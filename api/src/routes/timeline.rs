use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use lifemap_core::error::ApiError;
use lifemap_core::merge::MAX_YEAR;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::{self, BranchRow};

pub const BRANCH_COUNT: i32 = 5;

const DEFAULT_BRANCH_NAMES: [&str; BRANCH_COUNT as usize] = [
    "Possibility 1",
    "Possibility 2",
    "Possibility 3",
    "Possibility 4",
    "Possibility 5",
];

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/timeline", get(get_timeline))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/timeline", put(upsert_timeline))
        .route("/v1/timeline/branches/{branch_index}", put(rename_branch))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertTimelineRequest {
    /// The user's current age in years (0..=100).
    pub current_age: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenameBranchRequest {
    pub branch_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TimelineResponse {
    pub id: Uuid,
    pub current_age: i32,
    pub branches: Vec<BranchRow>,
}

pub fn validate_branch_index(branch_index: i32) -> Result<(), AppError> {
    if !(0..BRANCH_COUNT).contains(&branch_index) {
        return Err(AppError::Validation {
            message: format!("branch_index must be between 0 and {}", BRANCH_COUNT - 1),
            field: Some("branch_index".to_string()),
            received: Some(serde_json::json!(branch_index)),
            docs_hint: None,
        });
    }
    Ok(())
}

fn validate_age(current_age: i32) -> Result<(), AppError> {
    if !(0..=MAX_YEAR).contains(&current_age) {
        return Err(AppError::Validation {
            message: format!("current_age must be between 0 and {MAX_YEAR}"),
            field: Some("current_age".to_string()),
            received: Some(serde_json::json!(current_age)),
            docs_hint: None,
        });
    }
    Ok(())
}

async fn load_branches(pool: &sqlx::PgPool, timeline_id: Uuid) -> Result<Vec<BranchRow>, AppError> {
    let branches = sqlx::query_as::<_, BranchRow>(
        "SELECT branch_index, branch_name FROM possibility_branches \
         WHERE timeline_id = $1 \
         ORDER BY branch_index",
    )
    .bind(timeline_id)
    .fetch_all(pool)
    .await?;
    Ok(branches)
}

/// Create or update the caller's timeline
///
/// One timeline per user. The first call creates it together with its five
/// possibility branches (default names); later calls only update the age.
#[utoipa::path(
    put,
    path = "/v1/timeline",
    request_body = UpsertTimelineRequest,
    responses(
        (status = 200, description = "Timeline created or updated", body = TimelineResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "timeline"
)]
pub async fn upsert_timeline(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(req): AppJson<UpsertTimelineRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_age(req.current_age)?;

    let mut tx = state.db.begin().await?;

    let timeline_id: Uuid = sqlx::query_scalar(
        "INSERT INTO timelines (id, user_id, current_age) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (user_id) \
         DO UPDATE SET current_age = EXCLUDED.current_age, updated_at = NOW() \
         RETURNING id",
    )
    .bind(Uuid::now_v7())
    .bind(user.user_id)
    .bind(req.current_age)
    .fetch_one(&mut *tx)
    .await?;

    // Seed the five branches on first creation; no-op afterwards.
    for (index, name) in DEFAULT_BRANCH_NAMES.iter().enumerate() {
        sqlx::query(
            "INSERT INTO possibility_branches (id, timeline_id, branch_index, branch_name) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (timeline_id, branch_index) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(timeline_id)
        .bind(index as i32)
        .bind(name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let branches = load_branches(&state.db, timeline_id).await?;
    Ok(Json(TimelineResponse {
        id: timeline_id,
        current_age: req.current_age,
        branches,
    }))
}

/// Fetch the caller's timeline with its branches
#[utoipa::path(
    get,
    path = "/v1/timeline",
    responses(
        (status = 200, description = "Timeline with branches", body = TimelineResponse),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No timeline yet", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "timeline"
)]
pub async fn get_timeline(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;

    let branches = load_branches(&state.db, timeline.id).await?;
    Ok(Json(TimelineResponse {
        id: timeline.id,
        current_age: timeline.current_age,
        branches,
    }))
}

/// Rename a possibility branch
#[utoipa::path(
    put,
    path = "/v1/timeline/branches/{branch_index}",
    request_body = RenameBranchRequest,
    params(
        ("branch_index" = i32, Path, description = "Branch position, 0 to 4")
    ),
    responses(
        (status = 200, description = "Branch renamed", body = BranchRow),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No timeline yet", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "timeline"
)]
pub async fn rename_branch(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(branch_index): Path<i32>,
    AppJson(req): AppJson<RenameBranchRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_branch_index(branch_index)?;

    let name = req.branch_name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::Validation {
            message: "branch_name must be 1 to 100 characters".to_string(),
            field: Some("branch_name".to_string()),
            received: Some(serde_json::json!(req.branch_name)),
            docs_hint: None,
        });
    }

    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;

    let updated = sqlx::query_as::<_, BranchRow>(
        "UPDATE possibility_branches SET branch_name = $1 \
         WHERE timeline_id = $2 AND branch_index = $3 \
         RETURNING branch_index, branch_name",
    )
    .bind(name)
    .bind(timeline.id)
    .bind(branch_index)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound { resource: "branch" })?;

    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_index_bounds() {
        assert!(validate_branch_index(0).is_ok());
        assert!(validate_branch_index(4).is_ok());
        assert!(validate_branch_index(-1).is_err());
        assert!(validate_branch_index(5).is_err());
    }

    #[test]
    fn age_bounds() {
        assert!(validate_age(0).is_ok());
        assert!(validate_age(100).is_ok());
        assert!(validate_age(-1).is_err());
        assert!(validate_age(101).is_err());
    }
}
