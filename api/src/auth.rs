//! Session authentication.
//!
//! Sessions are minted by the external OAuth callback (out of scope here);
//! this service only validates them. The client sends
//! `Authorization: Bearer lm_ses_<hex>`; we look up the SHA-256 hash of the
//! full token in the sessions table. The lookup is bounded by a hard
//! 3-second timeout so a slow database cannot stall request gating.

use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(3);
const SESSION_PREFIX: &str = "lm_ses_";

/// Authenticated user resolved from the bearer session token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authorization header must use Bearer scheme".to_string(),
            })?;

        if !token.starts_with(SESSION_PREFIX) {
            return Err(AppError::Unauthorized {
                message: "Invalid session token format".to_string(),
            });
        }

        let token_hash = lifemap_core::auth::hash_token(token);
        let lookup = sqlx::query_as::<_, SessionRow>(
            "SELECT s.user_id \
             FROM sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token_hash = $1 \
               AND s.expires_at > NOW()",
        )
        .bind(&token_hash)
        .fetch_optional(&state.db);

        let row = tokio::time::timeout(AUTH_TIMEOUT, lookup)
            .await
            .map_err(|_| {
                tracing::warn!("session lookup exceeded the {AUTH_TIMEOUT:?} auth timeout");
                AppError::Unauthorized {
                    message: "Authentication check timed out".to_string(),
                }
            })?
            .map_err(AppError::Database)?
            .ok_or_else(|| AppError::Unauthorized {
                message: "Invalid or expired session token".to_string(),
            })?;

        Ok(AuthenticatedUser {
            user_id: row.user_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    user_id: Uuid,
}
