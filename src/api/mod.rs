//! HTTP API layer for the prompt shield.
//!
//! Provides REST endpoints for prompt shielding, policy management, and the
//! durable event log.

pub mod handlers;
mod routes;
mod types;

pub use routes::build_router;
