//! Shielding policy document and its store.
//!
//! The policy is an immutable snapshot loaded from a JSON document at
//! startup. Requests read the active snapshot through an `Arc`; reload swaps
//! the pointer atomically so in-flight requests keep the snapshot they
//! started with and never observe a partial update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{DetectorKind, StrategyVariant};
use crate::error::{ShieldError, ShieldResult};

/// Resolution of exhausted backend retries and unavailable detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Continue with degraded coverage, recording the degradation.
    #[default]
    FailOpen,
    /// Refuse the request when a dependency cannot answer.
    FailClosed,
}

/// What to do when a policy references a strategy whose capability is absent
/// (no backend credential, no entity lexicon).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityMode {
    /// Refuse to start; the pair is not registered.
    FailStartup,
    /// Register the detector; it reports unavailable at call time.
    #[default]
    ReportUnavailable,
}

/// Per-detector policy entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DetectorPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Strategy key: `heuristic`, `ml`, `llm`, or `hybrid`.
    pub strategy: StrategyVariant,

    /// Score threshold for scoring strategies, in [0, 1].
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Entity labels the named-entity redaction pass acts on; meaningful for
    /// `pii_redaction` only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<String>,

    /// Injection marker overrides; empty means the built-in marker list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
}

impl DetectorPolicy {
    pub fn new(strategy: StrategyVariant) -> Self {
        Self {
            enabled: true,
            strategy,
            threshold: default_threshold(),
            entity_types: Vec::new(),
            markers: Vec::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_entity_types<I, S>(mut self, entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_types = entity_types.into_iter().map(Into::into).collect();
        self
    }
}

/// Response-screening section of the policy.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResponseScreeningPolicy {
    pub enabled: bool,

    /// Detectors applied to the generated output, in order. Screening kinds
    /// gate; `pii_redaction` rewrites.
    pub detectors: Vec<DetectorKind>,
}

impl Default for ResponseScreeningPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            detectors: vec![DetectorKind::HarmfulContent, DetectorKind::PiiRedaction],
        }
    }
}

/// Immutable policy snapshot governing one process (or one reload epoch).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    /// Backend model used for generation.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub failure_mode: FailureMode,

    #[serde(default)]
    pub on_missing_capability: CapabilityMode,

    /// Input screening order; must not contain `pii_redaction` (input
    /// redaction is its own pipeline stage).
    #[serde(default = "default_input_order")]
    pub input_order: Vec<DetectorKind>,

    pub enabled_detectors: BTreeMap<DetectorKind, DetectorPolicy>,

    #[serde(default)]
    pub response_screening: ResponseScreeningPolicy,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.5
}

fn default_model() -> String {
    "google/gemini-2.5-flash".to_string()
}

fn default_input_order() -> Vec<DetectorKind> {
    vec![DetectorKind::PromptInjection, DetectorKind::HarmfulContent]
}

impl Default for Policy {
    fn default() -> Self {
        let mut enabled_detectors = BTreeMap::new();
        enabled_detectors.insert(
            DetectorKind::HarmfulContent,
            DetectorPolicy::new(StrategyVariant::ModelBased).with_threshold(0.5),
        );
        enabled_detectors.insert(
            DetectorKind::PromptInjection,
            DetectorPolicy::new(StrategyVariant::Heuristic),
        );
        enabled_detectors.insert(
            DetectorKind::PiiRedaction,
            DetectorPolicy::new(StrategyVariant::ModelBased).with_entity_types([
                "person",
                "location",
                "organization",
                "date",
                "email",
                "phone",
            ]),
        );

        Self {
            model: default_model(),
            failure_mode: FailureMode::default(),
            on_missing_capability: CapabilityMode::default(),
            input_order: default_input_order(),
            enabled_detectors,
            response_screening: ResponseScreeningPolicy::default(),
        }
    }
}

impl Policy {
    /// Parse and validate a policy document.
    pub fn from_json(contents: &str) -> ShieldResult<Self> {
        let policy: Policy = serde_json::from_str(contents)
            .map_err(|e| ShieldError::Config(format!("invalid policy document: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Read a policy from `path`. A missing file falls back to the built-in
    /// default policy with a logged warning; a present but invalid file is
    /// an error.
    pub fn load_from(path: &Path) -> ShieldResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "Policy file not found, using built-in default policy"
                );
                Ok(Policy::default())
            }
            Err(e) => Err(ShieldError::Config(format!(
                "failed to read policy file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> ShieldResult<()> {
        for (kind, detector) in &self.enabled_detectors {
            if !(0.0..=1.0).contains(&detector.threshold) {
                return Err(ShieldError::Config(format!(
                    "threshold {} for detector '{}' is outside [0, 1]",
                    detector.threshold, kind
                )));
            }
        }

        if let Some(pii) = self.detector(DetectorKind::PiiRedaction) {
            let needs_entities = matches!(
                pii.strategy,
                StrategyVariant::ModelBased | StrategyVariant::Hybrid
            );
            if pii.enabled && needs_entities && pii.entity_types.is_empty() {
                return Err(ShieldError::Config(format!(
                    "pii_redaction with strategy '{}' requires a non-empty entity_types list",
                    pii.strategy
                )));
            }
        }

        let mut seen = Vec::new();
        for kind in &self.input_order {
            if !kind.is_screening() {
                return Err(ShieldError::Config(
                    "input_order must not contain pii_redaction".to_string(),
                ));
            }
            if seen.contains(kind) {
                return Err(ShieldError::Config(format!(
                    "input_order lists '{}' more than once",
                    kind
                )));
            }
            seen.push(*kind);
        }

        Ok(())
    }

    /// The policy entry for `kind`, enabled or not.
    pub fn detector(&self, kind: DetectorKind) -> Option<&DetectorPolicy> {
        self.enabled_detectors.get(&kind)
    }

    /// Input-side screening detectors in execution order, enabled only.
    pub fn input_screening(&self) -> Vec<(DetectorKind, &DetectorPolicy)> {
        self.input_order
            .iter()
            .filter_map(|kind| {
                self.detector(*kind)
                    .filter(|d| d.enabled)
                    .map(|d| (*kind, d))
            })
            .collect()
    }

    /// Response-side detectors in execution order, enabled only. Empty when
    /// response screening is off.
    pub fn response_screening_detectors(&self) -> Vec<(DetectorKind, &DetectorPolicy)> {
        if !self.response_screening.enabled {
            return Vec::new();
        }
        self.response_screening
            .detectors
            .iter()
            .filter_map(|kind| {
                self.detector(*kind)
                    .filter(|d| d.enabled)
                    .map(|d| (*kind, d))
            })
            .collect()
    }

    /// Every `(kind, strategy)` pair the policy can reach at request time.
    pub fn referenced_pairs(&self) -> Vec<(DetectorKind, StrategyVariant)> {
        let mut pairs = Vec::new();
        for (kind, detector) in &self.enabled_detectors {
            if detector.enabled && !pairs.contains(&(*kind, detector.strategy)) {
                pairs.push((*kind, detector.strategy));
            }
        }
        pairs
    }
}

/// Holder of the active policy snapshot.
///
/// Readers clone the `Arc` out; `reload` swaps it under a short write lock
/// that is never held across I/O or an await.
pub struct PolicyStore {
    path: PathBuf,
    active: RwLock<Arc<Policy>>,
}

impl PolicyStore {
    /// Load the policy from `path` and build the store.
    pub fn load(path: impl Into<PathBuf>) -> ShieldResult<Self> {
        let path = path.into();
        let policy = Policy::load_from(&path)?;
        Ok(Self {
            path,
            active: RwLock::new(Arc::new(policy)),
        })
    }

    /// Build a store around an already-constructed policy (tests, embedded
    /// use).
    pub fn with_policy(policy: Policy) -> Self {
        Self {
            path: PathBuf::new(),
            active: RwLock::new(Arc::new(policy)),
        }
    }

    /// The active snapshot. Cheap; safe for unlimited concurrent callers.
    pub fn current(&self) -> Arc<Policy> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the policy file and swap the active snapshot. A failed reload
    /// leaves the previous snapshot in place and returns the error.
    pub fn reload(&self) -> ShieldResult<Arc<Policy>> {
        let policy = Policy::load_from(&self.path)
            .map_err(|e| ShieldError::PolicyReload(e.to_string()))?;
        let policy = Arc::new(policy);
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *active = policy.clone();
        Ok(policy)
    }
}
