//! Prompt Shield - policy-driven content safety for LLM traffic
//!
//! This service sits between clients and a generative backend, screening
//! prompts and generated responses against a reloadable policy before
//! anything crosses the boundary in either direction.

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;

mod api;
mod backend;
mod config;
mod domain;
mod engine;
mod error;
mod logging;
mod pipeline;
mod policy;
mod storage;

use crate::api::build_router;
use crate::backend::{GenerationBackend, HttpGenerationBackend, RetryConfig};
use crate::config::Config;
use crate::engine::{EntityRecognizer, RedactionEngine, StrategyRegistry};
use crate::pipeline::ShieldPipeline;
use crate::policy::PolicyStore;
use crate::storage::EventLog;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The shielding pipeline.
    pub pipeline: Arc<ShieldPipeline>,
    /// Holder of the active policy snapshot.
    pub policies: Arc<PolicyStore>,
    /// Durable event log.
    pub event_log: Arc<EventLog>,
    /// Upper bound on accepted prompt length, in characters.
    pub max_prompt_chars: usize,
    /// `/api/logs` limit applied when the query omits one.
    pub default_query_limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    // This is optional and won't fail if .env doesn't exist
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file loaded ({e})");
    }

    // Initialize logging
    logging::init();

    tracing::info!("Starting Prompt Shield v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        policy_path = %config.shield.policy_path,
        event_log = %config.events.log_path,
        "Configuration loaded"
    );

    // Load the policy document
    let policies = Arc::new(PolicyStore::load(&config.shield.policy_path).map_err(|e| {
        tracing::error!(error = %e, "Failed to load policy");
        anyhow::anyhow!("Policy error: {}", e)
    })?);
    let policy = policies.current();

    tracing::info!(
        model = %policy.model,
        failure_mode = ?policy.failure_mode,
        detectors = policy.enabled_detectors.len(),
        "Policy loaded"
    );

    // Build the generation backend
    if !config.backend.has_credentials() {
        tracing::warn!(
            "No backend API key configured; generation and backend-assisted detection \
             will report unavailable"
        );
    }
    let backend: Arc<dyn GenerationBackend> =
        Arc::new(HttpGenerationBackend::new(&config.backend).map_err(|e| {
            tracing::error!(error = %e, "Failed to build generation backend");
            anyhow::anyhow!("Backend error: {}", e)
        })?);
    let retry = RetryConfig {
        max_retries: config.backend.max_retries,
        base_delay_ms: config.backend.base_delay_ms,
        max_delay_ms: config.backend.max_delay_ms,
    };

    // Load the entity lexicon and build the detector registry
    let recognizer = EntityRecognizer::load(Path::new(&config.shield.entity_lexicon_path));
    let registry = Arc::new(
        StrategyRegistry::build(
            &policy,
            &recognizer,
            backend.clone(),
            &retry,
            &config.backend.guard_model,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build detector registry");
            anyhow::anyhow!("Registry error: {}", e)
        })?,
    );
    let redaction = RedactionEngine::new(
        Arc::new(recognizer),
        backend.clone(),
        retry.clone(),
        &config.backend.guard_model,
    );

    // Open the event log
    let event_log = Arc::new(EventLog::new(&config.events.log_path));

    // Assemble the pipeline
    let pipeline = Arc::new(ShieldPipeline::new(
        policies.clone(),
        registry,
        redaction,
        backend,
        event_log.clone(),
        retry,
        config.events.preview_max_chars,
    ));

    // Build application state
    let state = AppState {
        pipeline,
        policies,
        event_log,
        max_prompt_chars: config.shield.max_prompt_chars,
        default_query_limit: config.events.default_query_limit,
    };

    // Build router
    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(address = %addr, "Server listening");
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
