//! PII redaction passes.
//!
//! Redaction rewrites text instead of gating it. Up to three passes run,
//! chosen by the policy strategy:
//!
//! 1. Pattern pass (every strategy): structural PII via compiled regexes.
//! 2. Entity pass (`ml`, `hybrid`): named entities via the recognizer.
//! 3. Backend pass (`llm`, `hybrid`): entities the local passes cannot see,
//!    reported by the generation backend.
//!
//! Each pass only adds masks. Masks are shaped so no later pass can match
//! inside them, which makes the whole redaction idempotent.

use std::sync::Arc;

use crate::backend::{chat_with_retry, ChatMessage, GenerationBackend, RetryConfig};
use crate::domain::{RedactedEntity, RedactionResult, StrategyVariant};
use crate::engine::entities::EntityRecognizer;
use crate::engine::patterns::find_structural_pii;
use crate::policy::DetectorPolicy;

/// Entity labels used when the policy does not name any.
const DEFAULT_ENTITY_TYPES: [&str; 6] =
    ["person", "location", "organization", "date", "email", "phone"];

fn mask_for(label: &str) -> String {
    format!("[REDACTED_{}]", label.to_uppercase())
}

/// Remove structural PII from `text` without the full engine. Used to keep
/// event previews clean.
pub fn scrub(text: &str) -> String {
    let mut removed = Vec::new();
    pattern_pass(text, &mut removed)
}

fn pattern_pass(text: &str, removed: &mut Vec<RedactedEntity>) -> String {
    let matches = find_structural_pii(text);
    if matches.is_empty() {
        return text.to_string();
    }

    for m in &matches {
        removed.push(RedactedEntity {
            start: m.start,
            end: m.end,
            label: m.label.to_string(),
        });
    }

    // Replace right to left so earlier offsets stay valid.
    let mut result = text.to_string();
    for m in matches.iter().rev() {
        result.replace_range(m.start..m.end, &mask_for(m.label));
    }
    result
}

#[derive(Debug, serde::Deserialize)]
struct BackendEntity {
    text: String,
    label: String,
}

/// Runs the configured redaction passes over prompt and response text.
pub struct RedactionEngine {
    recognizer: Arc<EntityRecognizer>,
    backend: Arc<dyn GenerationBackend>,
    retry: RetryConfig,
    guard_model: String,
}

impl RedactionEngine {
    pub fn new(
        recognizer: Arc<EntityRecognizer>,
        backend: Arc<dyn GenerationBackend>,
        retry: RetryConfig,
        guard_model: impl Into<String>,
    ) -> Self {
        Self {
            recognizer,
            backend,
            retry,
            guard_model: guard_model.into(),
        }
    }

    /// Whether every pass the strategy calls for can currently run.
    pub fn capabilities_ok(&self, policy: &DetectorPolicy) -> bool {
        match policy.strategy {
            StrategyVariant::Heuristic => true,
            StrategyVariant::ModelBased => self.recognizer.available(),
            StrategyVariant::BackendAssisted => self.backend.available(),
            StrategyVariant::Hybrid => {
                self.recognizer.available() && self.backend.available()
            }
        }
    }

    /// Apply the passes selected by `policy` to `text`. Unavailable passes
    /// are skipped with a warning; the result carries whatever the
    /// remaining passes removed.
    pub async fn redact(&self, text: &str, policy: &DetectorPolicy) -> RedactionResult {
        let mut removed = Vec::new();
        let mut current = pattern_pass(text, &mut removed);

        let wants_entities = matches!(
            policy.strategy,
            StrategyVariant::ModelBased | StrategyVariant::Hybrid
        );
        if wants_entities && !policy.entity_types.is_empty() {
            if self.recognizer.available() {
                current = self.entity_pass(&current, &policy.entity_types, &mut removed);
            } else {
                tracing::warn!("Entity recognizer unavailable, skipping entity pass");
            }
        }

        let wants_backend = matches!(
            policy.strategy,
            StrategyVariant::BackendAssisted | StrategyVariant::Hybrid
        );
        if wants_backend {
            if self.backend.available() {
                current = self
                    .backend_pass(current, &effective_types(policy), &mut removed)
                    .await;
            } else {
                tracing::warn!("Backend unavailable, skipping backend redaction pass");
            }
        }

        RedactionResult {
            redacted_text: current,
            entities_removed: removed,
        }
    }

    fn entity_pass(
        &self,
        text: &str,
        entity_types: &[String],
        removed: &mut Vec<RedactedEntity>,
    ) -> String {
        let matches = self.recognizer.recognize(text, entity_types);
        if matches.is_empty() {
            return text.to_string();
        }

        for m in &matches {
            removed.push(RedactedEntity {
                start: m.start,
                end: m.end,
                label: m.label.clone(),
            });
        }

        let mut result = text.to_string();
        for m in matches.iter().rev() {
            result.replace_range(m.start..m.end, &mask_for(&m.label));
        }
        result
    }

    async fn backend_pass(
        &self,
        text: String,
        entity_types: &[String],
        removed: &mut Vec<RedactedEntity>,
    ) -> String {
        let prompt = format!(
            r#"Task: List every piece of personally identifying information in the text below.

Respond with only a JSON array of objects of the form {{"text": "<exact substring>", "label": "<label>"}}.
Allowed labels: {labels}. Respond with [] if there is none.

<BEGIN TEXT>
{text}
<END TEXT>"#,
            labels = entity_types.join(", "),
        );

        let response = match chat_with_retry(
            self.backend.as_ref(),
            &self.retry,
            &self.guard_model,
            &[ChatMessage::user(prompt)],
            300,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Backend redaction pass failed, keeping earlier passes");
                return text;
            }
        };

        let entities = parse_backend_entities(&response);
        if entities.is_empty() {
            return text;
        }

        // Collect every occurrence of every reported value, then mask the
        // non-overlapping set (leftmost-longest wins).
        let mut spans: Vec<(usize, usize, String)> = Vec::new();
        for entity in &entities {
            let label = sanitize_label(&entity.label);
            if label.is_empty()
                || entity.text.len() < 2
                || entity.text.contains("[REDACTED_")
                || !entity_types.iter().any(|t| t == &label)
            {
                continue;
            }
            for (pos, m) in text.match_indices(entity.text.as_str()) {
                spans.push((pos, pos + m.len(), label.clone()));
            }
        }
        spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut kept: Vec<(usize, usize, String)> = Vec::new();
        for span in spans {
            if kept.iter().all(|k| span.0 >= k.1 || span.1 <= k.0) {
                kept.push(span);
            }
        }
        kept.sort_by_key(|s| s.0);

        let mut result = text;
        for (start, end, label) in kept.iter().rev() {
            result.replace_range(*start..*end, &mask_for(label));
        }
        for (start, end, label) in kept {
            removed.push(RedactedEntity { start, end, label });
        }
        result
    }
}

fn effective_types(policy: &DetectorPolicy) -> Vec<String> {
    if policy.entity_types.is_empty() {
        DEFAULT_ENTITY_TYPES.iter().map(|s| s.to_string()).collect()
    } else {
        policy.entity_types.clone()
    }
}

/// Pull the JSON array out of a backend reply, tolerating code fences and
/// prose around it.
fn parse_backend_entities(response: &str) -> Vec<BackendEntity> {
    let Some(start) = response.find('[') else {
        tracing::warn!("Backend redaction reply had no JSON array");
        return Vec::new();
    };
    let Some(end) = response.rfind(']') else {
        tracing::warn!("Backend redaction reply had no JSON array");
        return Vec::new();
    };
    match serde_json::from_str::<Vec<BackendEntity>>(&response[start..=end]) {
        Ok(entities) => entities,
        Err(e) => {
            tracing::warn!(error = %e, "Backend redaction reply did not parse");
            Vec::new()
        }
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
