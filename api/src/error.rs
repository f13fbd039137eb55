use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lifemap_core::error::{self, ApiError};
use lifemap_core::parser::ParseError;

use crate::oracle::OracleError;

/// Internal error type that converts to structured API responses.
///
/// 4xx variants carry messages meant for the client. 5xx variants log their
/// diagnostics (oracle payloads, SQL errors, unparseable text) and send a
/// generic message; upstream detail is for operators only.
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or invalid session (401)
    Unauthorized { message: String },
    /// Resource absent or not owned by the caller (404)
    NotFound { resource: &'static str },
    /// Generation service returned a non-success status (502)
    Upstream { status: u16, body: String },
    /// Generation service succeeded but the response shape was wrong (502)
    MalformedResponse { payload: String },
    /// Generation output contained an uninterpretable array (502)
    Parse(ParseError),
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized { message } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: Some(
                        "Include 'Authorization: Bearer lm_ses_...' with a valid session token."
                            .to_string(),
                    ),
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Upstream { status, body } => {
                tracing::error!(status, body = %body, "generation service returned an error");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::UPSTREAM_ERROR.to_string(),
                        message: "The generation service is currently unavailable".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some("Retry the action later.".to_string()),
                    },
                )
            }
            AppError::MalformedResponse { payload } => {
                tracing::error!(payload = %payload, "generation response missing expected structure");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::MALFORMED_RESPONSE.to_string(),
                        message: "The generation service returned an unexpected response"
                            .to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some("Retry the action later.".to_string()),
                    },
                )
            }
            AppError::Parse(err) => {
                tracing::error!(raw = %err.raw, "failed to parse generation output");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::PARSE_FAILED.to_string(),
                        message: "The generation service returned output that could not be applied"
                            .to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some("Retry the action later.".to_string()),
                    },
                )
            }
            AppError::Database(err) => {
                tracing::error!("database error: {err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<OracleError> for AppError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Request(e) => AppError::Upstream {
                status: 0,
                body: e.to_string(),
            },
            OracleError::Transport { status, body } => AppError::Upstream { status, body },
            OracleError::Malformed { payload } => AppError::MalformedResponse { payload },
        }
    }
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        AppError::Parse(err)
    }
}
