use std::net::SocketAddr;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod extract;
mod middleware;
mod oracle;
mod routes;
mod state;
mod store;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lifemap API",
        version = "0.1.0",
        description = "Lifetime timeline service: possibility branches, life missions, and AI-assisted prediction and adaptation."
    ),
    paths(
        routes::health::health_check,
        routes::timeline::upsert_timeline,
        routes::timeline::get_timeline,
        routes::timeline::rename_branch,
        routes::events::list_events,
        routes::events::upsert_event,
        routes::events::edit_event,
        routes::events::delete_event,
        routes::missions::upsert_mission,
        routes::missions::get_mission,
        routes::missions::delete_metric,
        routes::missions::create_step,
        routes::missions::edit_step,
        routes::missions::delete_step,
        routes::prompts::list_prompts,
        routes::prompts::set_prompt,
        routes::prompts::reset_prompt,
        routes::generate::generate_predictions,
        routes::generate::generate_steps,
        routes::adapt::adapt_events,
        routes::adapt::adapt_steps,
    ),
    components(schemas(
        HealthResponse,
        lifemap_core::error::ApiError,
        lifemap_core::prompts::PromptKind,
        lifemap_core::merge::EventSuggestion,
        lifemap_core::merge::StepSuggestion,
        store::BranchRow,
        store::EventRow,
        store::MetricRow,
        store::StepRow,
        routes::timeline::UpsertTimelineRequest,
        routes::timeline::RenameBranchRequest,
        routes::timeline::TimelineResponse,
        routes::events::UpsertEventRequest,
        routes::events::EditEventRequest,
        routes::missions::UpsertMissionRequest,
        routes::missions::CreateStepRequest,
        routes::missions::EditStepRequest,
        routes::missions::StepNode,
        routes::missions::MissionResponse,
        routes::prompts::SetPromptRequest,
        routes::prompts::PromptItem,
        routes::prompts::PromptsResponse,
        routes::generate::GenerateRequest,
        routes::generate::PredictionsResponse,
        routes::generate::GeneratedStepsResponse,
        routes::adapt::AdaptEventsRequest,
        routes::adapt::AdaptStepsRequest,
        routes::adapt::EventAdaptationResponse,
        routes::adapt::StepAdaptationResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifemap_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let oracle = oracle::GeminiClient::from_env().expect("generation client misconfigured");

    let app_state = state::AppState { db: pool, oracle };

    // CORS
    let cors_layer = middleware::cors::build_cors_layer();

    // Router with per-group rate limiting
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::timeline::read_router().layer(middleware::rate_limit::read_layer()))
        .merge(routes::timeline::write_router().layer(middleware::rate_limit::write_layer()))
        .merge(routes::events::read_router().layer(middleware::rate_limit::read_layer()))
        .merge(routes::events::write_router().layer(middleware::rate_limit::write_layer()))
        .merge(routes::missions::read_router().layer(middleware::rate_limit::read_layer()))
        .merge(routes::missions::write_router().layer(middleware::rate_limit::write_layer()))
        .merge(routes::prompts::read_router().layer(middleware::rate_limit::read_layer()))
        .merge(routes::prompts::write_router().layer(middleware::rate_limit::write_layer()))
        .merge(routes::generate::router().layer(middleware::rate_limit::generation_layer()))
        .merge(routes::adapt::router().layer(middleware::rate_limit::generation_layer()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Lifemap API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
