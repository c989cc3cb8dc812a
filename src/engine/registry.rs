//! Strategy registry: resolves `(kind, strategy)` pairs to detectors.
//!
//! Built once at startup. Every constructible pair is registered so a policy
//! reload can switch strategies without a rebuild; the startup policy's own
//! pairs are verified so a misconfigured deployment fails before serving.
//!
//! Capability handling follows `on_missing_capability`: under `fail_startup`
//! a pair whose capability is absent (no backend credential, no entity
//! lexicon) is simply not registered, which fails the build when the policy
//! references it. Under `report_unavailable` the pair is registered and its
//! detector reports `available() == false` at call time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{GenerationBackend, RetryConfig};
use crate::domain::{DetectionResult, DetectorKind, StrategyVariant};
use crate::engine::detector::{Detector, DetectorError};
use crate::engine::entities::EntityRecognizer;
use crate::engine::guard::GuardDetector;
use crate::engine::heuristic::{HarmfulKeywordDetector, InjectionMarkerDetector};
use crate::engine::scoring::ScoredLexiconDetector;
use crate::error::{ShieldError, ShieldResult};
use crate::policy::{CapabilityMode, Policy};

/// Runs a heuristic sub-detector and a backend-assisted one, merging their
/// results by logical OR. The cheap sub runs first; a block from it makes
/// the backend call unnecessary.
pub struct HybridDetector {
    kind: DetectorKind,
    subs: Vec<Arc<dyn Detector>>,
}

impl HybridDetector {
    pub fn new(kind: DetectorKind, subs: Vec<Arc<dyn Detector>>) -> Self {
        Self { kind, subs }
    }
}

#[async_trait]
impl Detector for HybridDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn strategy(&self) -> StrategyVariant {
        StrategyVariant::Hybrid
    }

    fn available(&self) -> bool {
        self.subs.iter().all(|sub| sub.available())
    }

    async fn detect(&self, text: &str, threshold: f64) -> Result<DetectionResult, DetectorError> {
        let mut merged = DetectionResult::allow();
        for sub in &self.subs {
            let result = sub.detect(text, threshold).await?;
            merged = merged.merge(result);
            if merged.decision.is_block() {
                break;
            }
        }
        Ok(merged)
    }
}

/// Immutable map from `(kind, strategy)` to an executable detector.
#[derive(Debug)]
pub struct StrategyRegistry {
    detectors: HashMap<(DetectorKind, StrategyVariant), Arc<dyn Detector>>,
}

impl StrategyRegistry {
    /// Construct the registry and verify the startup policy resolves.
    pub fn build(
        policy: &Policy,
        recognizer: &EntityRecognizer,
        backend: Arc<dyn GenerationBackend>,
        retry: &RetryConfig,
        guard_model: &str,
    ) -> ShieldResult<Self> {
        let fail_startup = policy.on_missing_capability == CapabilityMode::FailStartup;
        let backend_capable = backend.available();

        let injection_markers = policy
            .detector(DetectorKind::PromptInjection)
            .map(|d| d.markers.clone())
            .unwrap_or_default();

        let mut detectors: HashMap<(DetectorKind, StrategyVariant), Arc<dyn Detector>> =
            HashMap::new();

        let heuristic_for = |kind: DetectorKind| -> Arc<dyn Detector> {
            match kind {
                DetectorKind::PromptInjection => {
                    Arc::new(InjectionMarkerDetector::new(&injection_markers))
                }
                _ => Arc::new(HarmfulKeywordDetector::new()),
            }
        };
        let scored_for = |kind: DetectorKind| -> Arc<dyn Detector> {
            match kind {
                DetectorKind::PromptInjection => Arc::new(ScoredLexiconDetector::prompt_injection()),
                _ => Arc::new(ScoredLexiconDetector::harmful_content()),
            }
        };

        for kind in [DetectorKind::PromptInjection, DetectorKind::HarmfulContent] {
            detectors.insert((kind, StrategyVariant::Heuristic), heuristic_for(kind));
            detectors.insert((kind, StrategyVariant::ModelBased), scored_for(kind));

            if backend_capable || !fail_startup {
                let guard: Arc<dyn Detector> = Arc::new(GuardDetector::new(
                    kind,
                    backend.clone(),
                    retry.clone(),
                    guard_model,
                ));
                detectors.insert((kind, StrategyVariant::BackendAssisted), guard.clone());
                detectors.insert(
                    (kind, StrategyVariant::Hybrid),
                    Arc::new(HybridDetector::new(kind, vec![heuristic_for(kind), guard])),
                );
            }
        }

        let registry = Self { detectors };

        // The startup policy must resolve completely, including the PII
        // redaction capabilities the registry itself does not hold.
        for (kind, strategy) in policy.referenced_pairs() {
            if kind.is_screening() {
                registry.resolve(kind, strategy)?;
            } else if fail_startup {
                let needs_recognizer = matches!(
                    strategy,
                    StrategyVariant::ModelBased | StrategyVariant::Hybrid
                );
                let needs_backend = matches!(
                    strategy,
                    StrategyVariant::BackendAssisted | StrategyVariant::Hybrid
                );
                if (needs_recognizer && !recognizer.available())
                    || (needs_backend && !backend_capable)
                {
                    return Err(ShieldError::UnsupportedStrategy { kind, strategy });
                }
            }
        }

        tracing::info!(
            registered = registry.detectors.len(),
            backend_capable,
            entity_recognizer = recognizer.available(),
            "Strategy registry built"
        );
        Ok(registry)
    }

    /// The detector for a pair, or `UnsupportedStrategy` when the pair was
    /// never registered.
    pub fn resolve(
        &self,
        kind: DetectorKind,
        strategy: StrategyVariant,
    ) -> ShieldResult<Arc<dyn Detector>> {
        self.detectors
            .get(&(kind, strategy))
            .cloned()
            .ok_or(ShieldError::UnsupportedStrategy { kind, strategy })
    }
}
