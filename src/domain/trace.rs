//! Per-request audit trace.
//!
//! Every detector, redaction, and generation step appends one immutable
//! record; the whole sequence is returned to the caller with the response.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::decision::{Decision, StrategyVariant};

/// Decision recorded for one trace step.
///
/// Extends [`Decision`] with `Redacted` for passes that rewrite text rather
/// than gate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepDecision {
    Allow,
    Block,
    Flag,
    Redacted,
}

impl From<Decision> for StepDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allow => StepDecision::Allow,
            Decision::Block => StepDecision::Block,
            Decision::Flag => StepDecision::Flag,
        }
    }
}

impl std::fmt::Display for StepDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepDecision::Allow => write!(f, "allow"),
            StepDecision::Block => write!(f, "block"),
            StepDecision::Flag => write!(f, "flag"),
            StepDecision::Redacted => write!(f, "redacted"),
        }
    }
}

/// One executed step in the shielding pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TraceStep {
    /// Step name, e.g. `prompt_injection` or `response_harmful_content`.
    pub step_name: String,

    /// Strategy the step ran under.
    pub strategy_used: StrategyVariant,

    /// What the step decided.
    pub decision: StepDecision,

    /// Reason attached to non-Allow decisions, or removed entity labels for
    /// redaction steps.
    pub reason: Option<String>,

    /// Position within the request, strictly increasing from 0.
    pub sequence_index: u32,
}

/// Append-only trace for a single request.
///
/// Never shared across requests; steps that did not execute are absent.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    steps: Vec<TraceStep>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step, assigning the next sequence index.
    pub fn record(
        &mut self,
        step_name: impl Into<String>,
        strategy_used: StrategyVariant,
        decision: StepDecision,
        reason: Option<String>,
    ) {
        let sequence_index = self.steps.len() as u32;
        self.steps.push(TraceStep {
            step_name: step_name.into(),
            strategy_used,
            decision,
            reason,
            sequence_index,
        });
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<TraceStep> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
