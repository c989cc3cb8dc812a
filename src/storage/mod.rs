//! Storage layer for the prompt shield.
//!
//! The only durable state is the append-only event log file; everything
//! else (policy snapshots, detector state) is rebuilt from configuration.

mod event_log;

pub use event_log::{EventLog, EVENT_SENTINEL};
