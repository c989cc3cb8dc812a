//! Route definitions for the API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers;
use crate::AppState;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::shield_prompt,
        handlers::get_policy,
        handlers::reload_policy,
        handlers::query_logs,
        handlers::health_check,
    ),
    components(schemas(
        crate::api::types::ShieldRequest,
        crate::api::types::ShieldPromptResponse,
        crate::api::types::LogsQuery,
        crate::api::types::LogsResponse,
        crate::api::types::HealthResponse,
        crate::domain::TraceStep,
        crate::domain::StepDecision,
        crate::domain::StrategyVariant,
        crate::domain::DetectorKind,
        crate::domain::ShieldEvent,
        crate::domain::EventType,
        crate::policy::Policy,
        crate::policy::DetectorPolicy,
        crate::policy::ResponseScreeningPolicy,
        crate::policy::FailureMode,
        crate::policy::CapabilityMode,
        crate::error::ErrorResponse,
    )),
    tags(
        (name = "shield", description = "Prompt shielding pipeline"),
        (name = "policy", description = "Policy inspection and reload"),
        (name = "logs", description = "Durable shield event log"),
        (name = "health", description = "Health and status endpoints")
    ),
    info(
        title = "Prompt Shield API",
        version = "0.1.0",
        description = "Policy-driven content-safety shield between clients and a generative LLM backend",
        license(name = "MIT")
    )
)]
pub struct ApiDoc;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Shielding pipeline
        .route("/shield_prompt", post(handlers::shield_prompt))
        // Policy management
        .route("/api/policy", get(handlers::get_policy))
        .route("/api/policy/reload", post(handlers::reload_policy))
        // Event log
        .route("/api/logs", get(handlers::query_logs))
        // Health
        .route("/health", get(handlers::health_check))
        .with_state(state)
        // OpenAPI docs
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
