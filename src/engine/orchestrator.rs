//! Screening orchestration.
//!
//! Runs the screening detectors a policy enables, in policy order, against
//! one text. Detectors run sequentially so the trace reads as an ordered
//! account of what happened; the first block short-circuits everything
//! after it.
//!
//! An unavailable detector is resolved by the policy's failure mode: fail
//! open records the gap and moves on, fail closed blocks the request.

use std::sync::Arc;

use crate::domain::{Decision, DetectorKind, StrategyVariant, TraceRecorder};
use crate::engine::detector::DetectorError;
use crate::engine::registry::StrategyRegistry;
use crate::error::ShieldResult;
use crate::policy::{DetectorPolicy, FailureMode, Policy};

pub const UNAVAILABLE_FAIL_OPEN: &str = "detector_unavailable_fail_open";
pub const UNAVAILABLE_FAIL_CLOSED: &str = "detector_unavailable_fail_closed";

/// Runs input-side and response-side screening per the active policy.
pub struct DetectionOrchestrator {
    registry: Arc<StrategyRegistry>,
}

impl DetectionOrchestrator {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self { registry }
    }

    /// Screen an inbound prompt. Returns the aggregate decision; `Block`
    /// means later pipeline stages must not run.
    pub async fn screen_input(
        &self,
        text: &str,
        policy: &Policy,
        trace: &mut TraceRecorder,
    ) -> ShieldResult<Decision> {
        let detectors = policy.input_screening();
        self.run_screening(text, policy, detectors, "", trace).await
    }

    /// Screen a generated response. Step names carry the `response_` prefix;
    /// the PII entry in the response list is redaction work and not handled
    /// here.
    pub async fn screen_response(
        &self,
        text: &str,
        policy: &Policy,
        trace: &mut TraceRecorder,
    ) -> ShieldResult<Decision> {
        let detectors: Vec<(DetectorKind, &DetectorPolicy)> = policy
            .response_screening_detectors()
            .into_iter()
            .filter(|(kind, _)| kind.is_screening())
            .collect();
        self.run_screening(text, policy, detectors, "response_", trace)
            .await
    }

    async fn run_screening(
        &self,
        text: &str,
        policy: &Policy,
        detectors: Vec<(DetectorKind, &DetectorPolicy)>,
        step_prefix: &str,
        trace: &mut TraceRecorder,
    ) -> ShieldResult<Decision> {
        let mut aggregate = Decision::Allow;

        for (kind, detector_policy) in detectors {
            let step_name = format!("{step_prefix}{kind}");
            let detector = self.registry.resolve(kind, detector_policy.strategy)?;

            if !detector.available() {
                if let Some(blocked) = self.handle_unavailable(
                    policy.failure_mode,
                    &step_name,
                    detector_policy.strategy,
                    "detector reported unavailable",
                    trace,
                ) {
                    return Ok(blocked);
                }
                continue;
            }

            match detector.detect(text, detector_policy.threshold).await {
                Ok(result) => {
                    trace.record(
                        &step_name,
                        detector_policy.strategy,
                        result.decision.into(),
                        result.reason.clone(),
                    );
                    aggregate = aggregate.combine(result.decision);
                    if result.decision.is_block() {
                        tracing::info!(
                            step = %step_name,
                            strategy = %detector_policy.strategy,
                            reason = result.reason.as_deref().unwrap_or(""),
                            "Screening blocked the text"
                        );
                        return Ok(Decision::Block);
                    }
                }
                Err(DetectorError::Unavailable(detail)) => {
                    if let Some(blocked) = self.handle_unavailable(
                        policy.failure_mode,
                        &step_name,
                        detector_policy.strategy,
                        &detail,
                        trace,
                    ) {
                        return Ok(blocked);
                    }
                }
            }
        }

        Ok(aggregate)
    }

    fn handle_unavailable(
        &self,
        failure_mode: FailureMode,
        step_name: &str,
        strategy: StrategyVariant,
        detail: &str,
        trace: &mut TraceRecorder,
    ) -> Option<Decision> {
        match failure_mode {
            FailureMode::FailOpen => {
                tracing::warn!(
                    step = step_name,
                    detail,
                    "Detector unavailable, continuing per fail-open policy"
                );
                trace.record(
                    step_name,
                    strategy,
                    crate::domain::StepDecision::Allow,
                    Some(UNAVAILABLE_FAIL_OPEN.to_string()),
                );
                None
            }
            FailureMode::FailClosed => {
                tracing::warn!(
                    step = step_name,
                    detail,
                    "Detector unavailable, blocking per fail-closed policy"
                );
                trace.record(
                    step_name,
                    strategy,
                    crate::domain::StepDecision::Block,
                    Some(UNAVAILABLE_FAIL_CLOSED.to_string()),
                );
                Some(Decision::Block)
            }
        }
    }
}
