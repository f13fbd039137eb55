use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use lifemap_core::error::ApiError;
use lifemap_core::merge::MAX_YEAR;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::routes::timeline::validate_branch_index;
use crate::state::AppState;
use crate::store::{self, EventRow};

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/timeline/events", get(list_events))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/timeline/events", put(upsert_event))
        .route("/v1/events/{id}", patch(edit_event).delete(delete_event))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListEventsQuery {
    /// Branch to read. Omit for the shared past history.
    pub branch_index: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertEventRequest {
    /// Branch the event belongs to. Omit for the shared past history.
    pub branch_index: Option<i32>,
    pub year: i32,
    pub event_text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EditEventRequest {
    pub event_text: String,
}

fn validate_year(year: i32) -> Result<(), AppError> {
    if !(0..=MAX_YEAR).contains(&year) {
        return Err(AppError::Validation {
            message: format!("year must be between 0 and {MAX_YEAR}"),
            field: Some("year".to_string()),
            received: Some(serde_json::json!(year)),
            docs_hint: Some("Years are ages on the lifetime axis, not calendar years.".to_string()),
        });
    }
    Ok(())
}

fn validate_event_text(text: &str) -> Result<(), AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 500 {
        return Err(AppError::Validation {
            message: "event_text must be 1 to 500 characters".to_string(),
            field: Some("event_text".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    Ok(())
}

/// List events for a branch, or the shared past history
#[utoipa::path(
    get,
    path = "/v1/timeline/events",
    params(ListEventsQuery),
    responses(
        (status = 200, description = "Events ordered by year", body = Vec<EventRow>),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No timeline yet", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;

    let events = match query.branch_index {
        Some(branch_index) => {
            validate_branch_index(branch_index)?;
            store::branch_events(&state.db, timeline.id, branch_index).await?
        }
        None => store::past_events(&state.db, timeline.id, 0, MAX_YEAR).await?,
    };

    Ok(Json(events))
}

/// Create or replace a user event at a (branch, year) slot
///
/// The timeline holds at most one event per branch and year. Writing to an
/// occupied slot replaces whatever was there, prediction or not.
#[utoipa::path(
    put,
    path = "/v1/timeline/events",
    request_body = UpsertEventRequest,
    responses(
        (status = 200, description = "Event stored", body = EventRow),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No timeline yet", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "events"
)]
pub async fn upsert_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(req): AppJson<UpsertEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(branch_index) = req.branch_index {
        validate_branch_index(branch_index)?;
    }
    validate_year(req.year)?;
    validate_event_text(&req.event_text)?;

    let timeline = store::timeline_for_user(&state.db, user.user_id)
        .await?
        .ok_or(AppError::NotFound {
            resource: "timeline",
        })?;

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "DELETE FROM events \
         WHERE timeline_id = $1 AND branch_index IS NOT DISTINCT FROM $2 AND year = $3",
    )
    .bind(timeline.id)
    .bind(req.branch_index)
    .bind(req.year)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, EventRow>(
        "INSERT INTO events (id, timeline_id, branch_index, year, event_text, \
                             is_prediction, is_user_edited) \
         VALUES ($1, $2, $3, $4, $5, FALSE, FALSE) \
         RETURNING id, branch_index, year, event_text, is_prediction, is_user_edited, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(timeline.id)
    .bind(req.branch_index)
    .bind(req.year)
    .bind(req.event_text.trim())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(row))
}

/// Edit the text of an event
///
/// Editing an AI prediction marks it user-edited, which permanently removes
/// it from future adaptation passes.
#[utoipa::path(
    patch,
    path = "/v1/events/{id}",
    request_body = EditEventRequest,
    params(("id" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event updated", body = EventRow),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Event not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "events"
)]
pub async fn edit_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<EditEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_event_text(&req.event_text)?;

    let row = sqlx::query_as::<_, EventRow>(
        "UPDATE events e \
         SET event_text = $1, \
             is_user_edited = e.is_user_edited OR e.is_prediction, \
             updated_at = NOW() \
         FROM timelines t \
         WHERE e.id = $2 AND t.id = e.timeline_id AND t.user_id = $3 \
         RETURNING e.id, e.branch_index, e.year, e.event_text, e.is_prediction, \
                   e.is_user_edited, e.created_at",
    )
    .bind(req.event_text.trim())
    .bind(id)
    .bind(user.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound { resource: "event" })?;

    Ok(Json(row))
}

/// Delete an event
#[utoipa::path(
    delete,
    path = "/v1/events/{id}",
    params(("id" = Uuid, Path, description = "Event id")),
    responses(
        (status = 204, description = "Event deleted"),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "Event not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "events"
)]
pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query(
        "DELETE FROM events e \
         USING timelines t \
         WHERE e.id = $1 AND t.id = e.timeline_id AND t.user_id = $2",
    )
    .bind(id)
    .bind(user.user_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound { resource: "event" });
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_bounds() {
        assert!(validate_year(0).is_ok());
        assert!(validate_year(100).is_ok());
        assert!(validate_year(-1).is_err());
        assert!(validate_year(101).is_err());
    }

    #[test]
    fn event_text_rejects_blank_and_oversized() {
        assert!(validate_event_text("Moved to Lisbon").is_ok());
        assert!(validate_event_text("   ").is_err());
        assert!(validate_event_text(&"x".repeat(501)).is_err());
    }
}
