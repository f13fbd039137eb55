use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use lifemap_core::error::ApiError;
use lifemap_core::prompts::{self, PromptKind};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

const TEMPLATE_MAX: usize = 20_000;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/prompts", get(list_prompts))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/prompts/{prompt_type}", put(set_prompt).delete(reset_prompt))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPromptRequest {
    pub template: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromptItem {
    pub prompt_type: PromptKind,
    pub template: String,
    /// True when the template is the caller's override rather than the default.
    pub is_custom: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromptsResponse {
    pub prompts: Vec<PromptItem>,
}

fn parse_kind(raw: &str) -> Result<PromptKind, AppError> {
    PromptKind::from_str(raw).ok_or_else(|| AppError::Validation {
        message: format!("unknown prompt_type '{raw}'"),
        field: Some("prompt_type".to_string()),
        received: Some(serde_json::json!(raw)),
        docs_hint: Some(
            "Valid types: timeline_prediction, mission_steps, timeline_adaptation, steps_adaptation."
                .to_string(),
        ),
    })
}

/// List the caller's effective prompt templates
///
/// Returns all four flows with either the custom override or the default.
#[utoipa::path(
    get,
    path = "/v1/prompts",
    responses(
        (status = 200, description = "Effective templates per flow", body = PromptsResponse),
        (status = 401, description = "Missing or invalid session", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "prompts"
)]
pub async fn list_prompts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    #[derive(sqlx::FromRow)]
    struct OverrideRow {
        prompt_type: String,
        template: String,
    }

    let overrides = sqlx::query_as::<_, OverrideRow>(
        "SELECT prompt_type, template FROM custom_prompts WHERE user_id = $1",
    )
    .bind(user.user_id)
    .fetch_all(&state.db)
    .await?;

    let prompts = PromptKind::ALL
        .into_iter()
        .map(|kind| {
            let custom = overrides
                .iter()
                .find(|o| o.prompt_type == kind.as_str())
                .map(|o| o.template.clone());
            let is_custom = custom.is_some();
            PromptItem {
                prompt_type: kind,
                template: custom.unwrap_or_else(|| kind.default_template().to_string()),
                is_custom,
            }
        })
        .collect();

    Ok(Json(PromptsResponse { prompts }))
}

/// Set a custom prompt template for a flow
///
/// The template must contain every placeholder the flow requires; rejected
/// otherwise so a broken override can never reach the generation service.
#[utoipa::path(
    put,
    path = "/v1/prompts/{prompt_type}",
    request_body = SetPromptRequest,
    params(("prompt_type" = String, Path, description = "One of the four flow names")),
    responses(
        (status = 200, description = "Override stored", body = PromptItem),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "prompts"
)]
pub async fn set_prompt(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(prompt_type): Path<String>,
    AppJson(req): AppJson<SetPromptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind = parse_kind(&prompt_type)?;

    if req.template.trim().is_empty() || req.template.chars().count() > TEMPLATE_MAX {
        return Err(AppError::Validation {
            message: format!("template must be 1 to {TEMPLATE_MAX} characters"),
            field: Some("template".to_string()),
            received: None,
            docs_hint: None,
        });
    }

    if let Err(err) = prompts::validate_template(kind, &req.template) {
        return Err(AppError::Validation {
            message: err.to_string(),
            field: Some("template".to_string()),
            received: Some(serde_json::json!(err.missing)),
            docs_hint: Some(format!(
                "Required placeholders for {}: {:?}",
                kind.as_str(),
                kind.required_placeholders()
            )),
        });
    }

    sqlx::query(
        "INSERT INTO custom_prompts (id, user_id, prompt_type, template) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id, prompt_type) \
         DO UPDATE SET template = EXCLUDED.template",
    )
    .bind(Uuid::now_v7())
    .bind(user.user_id)
    .bind(kind.as_str())
    .bind(&req.template)
    .execute(&state.db)
    .await?;

    Ok(Json(PromptItem {
        prompt_type: kind,
        template: req.template,
        is_custom: true,
    }))
}

/// Remove a custom prompt template, restoring the default
#[utoipa::path(
    delete,
    path = "/v1/prompts/{prompt_type}",
    params(("prompt_type" = String, Path, description = "One of the four flow names")),
    responses(
        (status = 204, description = "Override removed"),
        (status = 400, description = "Unknown prompt type", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No override for this flow", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "prompts"
)]
pub async fn reset_prompt(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(prompt_type): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let kind = parse_kind(&prompt_type)?;

    let result = sqlx::query("DELETE FROM custom_prompts WHERE user_id = $1 AND prompt_type = $2")
        .bind(user.user_id)
        .bind(kind.as_str())
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound {
            resource: "custom prompt",
        });
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing_rejects_unknown_names() {
        assert!(parse_kind("timeline_prediction").is_ok());
        assert!(parse_kind("steps_adaptation").is_ok());
        assert!(parse_kind("timelinePrediction").is_err());
        assert!(parse_kind("").is_err());
    }
}
