//! Detection-related domain types.
//!
//! Represents what a detector concluded about a piece of text, and what a
//! redaction pass removed from it.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The kind of screening a detector performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Harmful or abusive content in the text.
    HarmfulContent,
    /// Attempts to override or exfiltrate the system prompt.
    PromptInjection,
    /// Personally identifiable information to be masked.
    PiiRedaction,
}

impl DetectorKind {
    /// `true` for kinds that produce an allow/block decision rather than a
    /// rewritten text.
    pub fn is_screening(&self) -> bool {
        !matches!(self, DetectorKind::PiiRedaction)
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorKind::HarmfulContent => write!(f, "harmful_content"),
            DetectorKind::PromptInjection => write!(f, "prompt_injection"),
            DetectorKind::PiiRedaction => write!(f, "pii_redaction"),
        }
    }
}

impl std::str::FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "harmful_content" => Ok(DetectorKind::HarmfulContent),
            "prompt_injection" => Ok(DetectorKind::PromptInjection),
            "pii_redaction" => Ok(DetectorKind::PiiRedaction),
            _ => Err(format!("Unknown detector kind: {}", s)),
        }
    }
}

/// How a detector arrives at its decision.
///
/// The serialized names are the strategy keys accepted in the policy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum StrategyVariant {
    /// Marker and keyword matching, no model involved.
    #[serde(rename = "heuristic")]
    Heuristic,
    /// Local weighted-lexicon scoring or entity recognition.
    #[serde(rename = "ml")]
    ModelBased,
    /// Classification delegated to the generation backend.
    #[serde(rename = "llm")]
    BackendAssisted,
    /// Heuristic and backend-assisted combined by logical OR.
    #[serde(rename = "hybrid")]
    Hybrid,
}

impl std::fmt::Display for StrategyVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyVariant::Heuristic => write!(f, "heuristic"),
            StrategyVariant::ModelBased => write!(f, "ml"),
            StrategyVariant::BackendAssisted => write!(f, "llm"),
            StrategyVariant::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for StrategyVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heuristic" => Ok(StrategyVariant::Heuristic),
            "ml" => Ok(StrategyVariant::ModelBased),
            "llm" => Ok(StrategyVariant::BackendAssisted),
            "hybrid" => Ok(StrategyVariant::Hybrid),
            _ => Err(format!("Unknown strategy variant: {}", s)),
        }
    }
}

/// What a detector decided about the text it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Text may proceed.
    Allow,
    /// Text must not proceed.
    Block,
    /// Suspicious but not blocking; recorded and carried forward.
    Flag,
}

impl Decision {
    /// Severity order used when combining sub-decisions.
    fn severity(&self) -> u8 {
        match self {
            Decision::Allow => 0,
            Decision::Flag => 1,
            Decision::Block => 2,
        }
    }

    /// Logical-OR combination: the more severe decision wins.
    pub fn combine(self, other: Decision) -> Decision {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Threshold rule shared by all scoring detectors: a score meets the
    /// threshold when `score >= threshold` (boundary inclusive).
    pub fn from_score(score: f64, threshold: f64) -> Decision {
        if score >= threshold {
            Decision::Block
        } else {
            Decision::Allow
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block)
    }

    /// `true` for any non-Allow outcome.
    pub fn is_flagged(&self) -> bool {
        !matches!(self, Decision::Allow)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Block => write!(f, "block"),
            Decision::Flag => write!(f, "flag"),
        }
    }
}

/// A region of the inspected text that triggered a detector.
///
/// Offsets are byte positions into the text the detector ran over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchedSpan {
    pub start: usize,
    pub end: usize,
    /// What the span was recognized as (marker, keyword, entity label).
    pub label: String,
}

impl MatchedSpan {
    pub fn new(start: usize, end: usize, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }
}

/// Outcome of a single detector invocation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DetectionResult {
    /// Final decision for this detector.
    pub decision: Decision,

    /// Confidence score in [0, 1] for scoring strategies; absent for
    /// detectors that only match or do not match.
    pub score: Option<f64>,

    /// Human-readable reason when the decision is not Allow.
    pub reason: Option<String>,

    /// Regions that triggered the decision, in text order.
    pub matched_spans: Vec<MatchedSpan>,
}

impl DetectionResult {
    /// Clean result: nothing found.
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            score: None,
            reason: None,
            matched_spans: Vec::new(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Block,
            score: None,
            reason: Some(reason.into()),
            matched_spans: Vec::new(),
        }
    }

    pub fn flag(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Flag,
            score: None,
            reason: Some(reason.into()),
            matched_spans: Vec::new(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score.clamp(0.0, 1.0));
        self
    }

    pub fn with_spans(mut self, spans: Vec<MatchedSpan>) -> Self {
        self.matched_spans = spans;
        self
    }

    /// Combine with another result under hybrid OR semantics: decision is
    /// the severity max, score the max of reported scores, reasons and spans
    /// are concatenated.
    pub fn merge(mut self, other: DetectionResult) -> DetectionResult {
        self.decision = self.decision.combine(other.decision);
        self.score = match (self.score, other.score) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.reason = match (self.reason.take(), other.reason) {
            (Some(a), Some(b)) if a == b => Some(a),
            (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
            (a, b) => a.or(b),
        };
        self.matched_spans.extend(other.matched_spans);
        self
    }
}

/// A span removed by a redaction pass.
///
/// Offsets refer to the text the pass ran over, before masking. The removed
/// content itself is never recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RedactedEntity {
    pub start: usize,
    pub end: usize,
    /// Entity label, e.g. `email`, `phone`, `person`.
    pub label: String,
}

/// Outcome of running the redaction passes over a text.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedactionResult {
    /// The text with every detected span masked.
    pub redacted_text: String,

    /// Every removed span with its label, in pass order then text order.
    pub entities_removed: Vec<RedactedEntity>,
}

impl RedactionResult {
    /// A pass that found nothing returns the input unchanged.
    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            redacted_text: text.into(),
            entities_removed: Vec::new(),
        }
    }

    pub fn is_changed(&self) -> bool {
        !self.entities_removed.is_empty()
    }

    /// Distinct labels of removed entities, in first-seen order.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for entity in &self.entities_removed {
            if !labels.iter().any(|l| l == &entity.label) {
                labels.push(entity.label.clone());
            }
        }
        labels
    }
}
