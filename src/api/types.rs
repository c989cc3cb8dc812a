//! API request and response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{ShieldEvent, TraceStep};

// ==================== Shield Prompt ====================

/// Request to shield a prompt.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ShieldRequest {
    /// The raw user prompt to screen, redact, and forward.
    pub prompt: String,
}

/// Response from the shielding pipeline.
///
/// The `status` field discriminates the outcome; every variant carries the
/// full ordered trace so callers can audit exactly which steps ran.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShieldPromptResponse {
    /// Every gate passed and the backend answered.
    Success {
        /// The prompt exactly as submitted.
        original_prompt: String,
        /// The prompt after input redaction, as sent to the backend.
        processed_prompt: String,
        /// The screened, redacted generated response.
        llm_response: String,
        /// Ordered record of every executed step.
        trace: Vec<TraceStep>,
    },
    /// Input screening refused the prompt.
    Blocked {
        /// Reason from the blocking step.
        reason: String,
        trace: Vec<TraceStep>,
    },
    /// The generated response was refused; the text itself is withheld.
    BlockedResponse {
        /// Reason from the blocking step.
        reason: String,
        /// Fixed withheld marker, never the blocked generation.
        llm_output_blocked: String,
        trace: Vec<TraceStep>,
    },
    /// The backend could not answer and the policy fails closed.
    BackendUnavailable {
        reason: String,
        trace: Vec<TraceStep>,
    },
}

// ==================== Event Log ====================

/// Query parameters for the event log.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LogsQuery {
    /// Maximum number of events to return; service default when absent.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response for the event log query.
#[derive(Debug, Serialize, ToSchema)]
pub struct LogsResponse {
    /// Matching events, newest first.
    pub events: Vec<ShieldEvent>,
}

// ==================== Health ====================

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Timestamp.
    pub timestamp: String,
}
