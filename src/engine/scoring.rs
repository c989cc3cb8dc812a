//! Scored-lexicon screening detectors.
//!
//! The model-based strategy: each concern carries a weighted term lexicon
//! plus a set of amplifier phrases. Term weights sum into a score in
//! [0.0, 1.0] which is compared against the policy threshold, so operators
//! tune sensitivity without touching the lexicons.

use async_trait::async_trait;

use crate::domain::{Decision, DetectionResult, DetectorKind, MatchedSpan, StrategyVariant};
use crate::engine::detector::{Detector, DetectorError};
use crate::engine::heuristic::{HARMFUL_REASON, INJECTION_REASON};

/// Cap on the total boost amplifier phrases can contribute.
const AMPLIFIER_CAP: f64 = 0.45;

/// A screening detector that scores text against a weighted lexicon.
pub struct ScoredLexiconDetector {
    kind: DetectorKind,
    reason: &'static str,
    weighted_terms: Vec<(&'static str, f64)>,
    amplifiers: Vec<(&'static str, f64)>,
}

impl ScoredLexiconDetector {
    pub fn prompt_injection() -> Self {
        Self {
            kind: DetectorKind::PromptInjection,
            reason: INJECTION_REASON,
            weighted_terms: vec![
                ("ignore all previous instructions", 0.50),
                ("ignore previous instructions", 0.45),
                ("disregard your instructions", 0.45),
                ("forget your instructions", 0.40),
                ("dan mode", 0.35),
                ("jailbreak", 0.30),
                ("bypass safety", 0.30),
                ("developer mode", 0.25),
                ("ignore safety", 0.25),
                ("uncensored", 0.22),
                ("no restrictions", 0.20),
                ("unfiltered", 0.20),
                ("reveal your system prompt", 0.40),
                ("system prompt", 0.15),
                ("pretend you can", 0.15),
            ],
            amplifiers: vec![
                ("from now on", 0.10),
                ("new instructions", 0.15),
                ("you must obey", 0.20),
                ("no longer bound", 0.20),
                ("without limits", 0.15),
            ],
        }
    }

    pub fn harmful_content() -> Self {
        Self {
            kind: DetectorKind::HarmfulContent,
            reason: HARMFUL_REASON,
            weighted_terms: vec![
                ("nerve agent", 0.45),
                ("bioweapon", 0.45),
                ("make a bomb", 0.45),
                ("build a bomb", 0.45),
                ("explosive device", 0.40),
                ("untraceable firearm", 0.40),
                ("poison someone", 0.40),
                ("detonator", 0.35),
                ("explosives", 0.30),
                ("ammonium nitrate", 0.25),
                ("lethal dose", 0.25),
                ("hurt a child", 0.50),
            ],
            amplifiers: vec![
                ("step by step", 0.15),
                ("instructions for", 0.12),
                ("at home", 0.10),
                ("without getting caught", 0.25),
                ("how do i", 0.08),
            ],
        }
    }
}

#[async_trait]
impl Detector for ScoredLexiconDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn strategy(&self) -> StrategyVariant {
        StrategyVariant::ModelBased
    }

    async fn detect(&self, text: &str, threshold: f64) -> Result<DetectionResult, DetectorError> {
        let lower = text.to_lowercase();
        let mut score = 0.0f64;
        let mut spans = Vec::new();

        for (term, weight) in &self.weighted_terms {
            if let Some(pos) = lower.find(term) {
                score += weight;
                spans.push(MatchedSpan {
                    start: pos,
                    end: pos + term.len(),
                    label: "scored_term".to_string(),
                });
            }
        }

        let mut boost = 0.0f64;
        for (phrase, weight) in &self.amplifiers {
            if lower.contains(phrase) {
                boost += weight;
            }
        }
        score = (score + boost.min(AMPLIFIER_CAP)).min(1.0);

        let decision = Decision::from_score(score, threshold);
        let mut result = match decision {
            Decision::Allow => DetectionResult::allow(),
            _ => DetectionResult::block(self.reason),
        };
        result = result.with_score(score);
        if !spans.is_empty() {
            spans.sort_by_key(|s| s.start);
            result = result.with_spans(spans);
        }
        Ok(result)
    }
}
