//! Detection and redaction engine.
//!
//! This module contains the shielding stages the pipeline composes:
//! - Heuristic detectors: marker and keyword matching for injection and harm
//! - Scored detectors: weighted lexicon scoring against policy thresholds
//! - Guard detector: safety verdicts from the generation backend
//! - Entity recognizer: trigger phrases and lexicon lookup for named entities
//! - Redaction engine: layered PII removal (patterns, entities, backend)
//! - Registry and orchestrator: bind detectors to the active policy

mod detector;
mod entities;
mod guard;
mod heuristic;
mod orchestrator;
mod patterns;
mod redaction;
mod registry;
mod scoring;

pub use detector::*;
pub use entities::*;
pub use guard::*;
pub use heuristic::*;
pub use orchestrator::*;
pub use patterns::*;
pub use redaction::*;
pub use registry::*;
pub use scoring::*;
