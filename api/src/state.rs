use sqlx::PgPool;

use crate::oracle::GeminiClient;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub oracle: GeminiClient,
}
