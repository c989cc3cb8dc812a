//! Detection seam shared by all screening strategies.

use async_trait::async_trait;

use crate::domain::{DetectionResult, DetectorKind, StrategyVariant};

/// Failure of a detector invocation.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// The detector cannot run right now. The policy's failure mode decides
    /// what happens to the request.
    #[error("detector unavailable: {0}")]
    Unavailable(String),
}

/// A screening detector for one concern under one strategy.
///
/// Implementations range from marker matching to scored lexicons to
/// backend-assisted classification. Detectors are stateless with respect to
/// requests; thresholds come in per call so a policy reload takes effect
/// without rebuilding them.
#[async_trait]
pub trait Detector: Send + Sync {
    /// The concern this detector screens for.
    fn kind(&self) -> DetectorKind;

    /// The strategy this implementation realizes.
    fn strategy(&self) -> StrategyVariant;

    /// Identifier used in logs: `kind/strategy`.
    fn name(&self) -> String {
        format!("{}/{}", self.kind(), self.strategy())
    }

    /// Whether the detector can currently run.
    fn available(&self) -> bool {
        true
    }

    /// Screen `text` and report a decision. `threshold` applies to scored
    /// strategies; marker-based detectors decide outright.
    async fn detect(&self, text: &str, threshold: f64) -> Result<DetectionResult, DetectorError>;
}

impl std::fmt::Debug for dyn Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Detector").field(&self.name()).finish()
    }
}
