//! Named-entity recognition for free-text PII.
//!
//! Two passes over the text:
//! 1. Trigger phrases that signal a disclosure ("my name is", "i live in"),
//!    with the disclosed value extracted after the phrase.
//! 2. A lexicon of known terms loaded from a file, matched on word
//!    boundaries.
//!
//! Structural identifiers (emails, card numbers) are the pattern layer's
//! job; this module covers what a regex cannot see.

use std::path::Path;

/// A recognized entity span in the original text.
#[derive(Debug, Clone)]
pub struct EntityMatch {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub confidence: f64,
}

struct TriggerPhrase {
    /// Phrases that signal a disclosure (lowercase).
    phrases: Vec<&'static str>,
    label: &'static str,
    /// Returns true when the extracted value looks like this entity type.
    validator: fn(&str) -> bool,
    confidence: f64,
}

/// Recognizes named entities via trigger phrases and a term lexicon.
pub struct EntityRecognizer {
    triggers: Vec<TriggerPhrase>,
    /// Lowercased term paired with its label.
    lexicon: Vec<(String, String)>,
    available: bool,
}

impl EntityRecognizer {
    /// Load the recognizer with the lexicon at `path`. A missing or
    /// unreadable lexicon leaves the recognizer unavailable; the policy's
    /// capability mode decides whether that is fatal.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let lexicon = parse_lexicon(&contents);
                tracing::info!(
                    path = %path.display(),
                    terms = lexicon.len(),
                    "Loaded entity lexicon"
                );
                Self {
                    triggers: default_triggers(),
                    lexicon,
                    available: true,
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Entity lexicon not readable, entity recognition unavailable"
                );
                Self {
                    triggers: default_triggers(),
                    lexicon: Vec::new(),
                    available: false,
                }
            }
        }
    }

    /// Build a recognizer from in-memory lexicon entries.
    pub fn with_lexicon(entries: Vec<(String, String)>) -> Self {
        Self {
            triggers: default_triggers(),
            lexicon: entries
                .into_iter()
                .map(|(term, label)| (term.to_lowercase(), label))
                .collect(),
            available: true,
        }
    }

    /// Build a recognizer that reports itself unavailable.
    pub fn unavailable() -> Self {
        Self {
            triggers: default_triggers(),
            lexicon: Vec::new(),
            available: false,
        }
    }

    pub fn available(&self) -> bool {
        self.available
    }

    /// Find entities of the requested types in `text`. Matches come back
    /// sorted by position with overlaps removed (higher confidence wins).
    pub fn recognize(&self, text: &str, entity_types: &[String]) -> Vec<EntityMatch> {
        let wants = |label: &str| entity_types.iter().any(|t| t == label);
        let lower = text.to_lowercase();
        let mut matches = Vec::new();

        for trigger in &self.triggers {
            if !wants(trigger.label) {
                continue;
            }
            for phrase in &trigger.phrases {
                let mut search_from = 0;
                while let Some(pos) = lower[search_from..].find(phrase) {
                    let abs_pos = search_from + pos;
                    let phrase_end = abs_pos + phrase.len();
                    search_from = phrase_end;

                    let Some((value_start, value)) = extract_value(text, phrase_end) else {
                        continue;
                    };
                    let trimmed = value.trim();
                    if trimmed.is_empty() || trimmed.starts_with("[REDACTED_") {
                        continue;
                    }

                    let confidence = if (trigger.validator)(trimmed) {
                        trigger.confidence
                    } else {
                        trigger.confidence * 0.5
                    };
                    if confidence < 0.3 {
                        continue;
                    }

                    matches.push(EntityMatch {
                        start: value_start,
                        end: value_start + value.len(),
                        label: trigger.label.to_string(),
                        confidence,
                    });
                }
            }
        }

        for (term, label) in &self.lexicon {
            if term.is_empty() || !wants(label) {
                continue;
            }
            let mut search_from = 0;
            while let Some(pos) = lower[search_from..].find(term.as_str()) {
                let abs_pos = search_from + pos;
                let end = abs_pos + term.len();
                search_from = end;

                // Word-boundary and offset-validity checks against the
                // original text.
                if text.get(abs_pos..end).is_none() {
                    continue;
                }
                let bounded_left = text[..abs_pos]
                    .chars()
                    .next_back()
                    .map_or(true, |c| !c.is_alphanumeric());
                let bounded_right = text[end..]
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_alphanumeric());
                if bounded_left && bounded_right {
                    matches.push(EntityMatch {
                        start: abs_pos,
                        end,
                        label: label.clone(),
                        confidence: 0.95,
                    });
                }
            }
        }

        // Deduplicate overlapping matches, keeping the highest confidence.
        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut deduped: Vec<EntityMatch> = Vec::new();
        for m in matches {
            let overlaps = deduped
                .iter()
                .any(|existing| m.start < existing.end && m.end > existing.start);
            if !overlaps {
                deduped.push(m);
            }
        }
        deduped.sort_by_key(|m| m.start);
        deduped
    }
}

/// Extract the value portion after a trigger phrase. Returns the absolute
/// start offset and the captured slice, cut at sentence boundaries.
fn extract_value(text: &str, start: usize) -> Option<(usize, &str)> {
    if start >= text.len() {
        return None;
    }
    let remaining = text.get(start..)?;

    let value_offset = remaining
        .find(|c: char| !c.is_whitespace() && c != ':' && c != '=' && c != '"' && c != '\'')
        .unwrap_or(0);
    let value_text = remaining.get(value_offset..)?;
    if value_text.is_empty() {
        return None;
    }

    let mut max_len = value_text.len().min(64);
    while !value_text.is_char_boundary(max_len) {
        max_len -= 1;
    }
    let value_slice = &value_text[..max_len];

    // Cut at the earliest boundary: sentence breaks, conjunctions, and the
    // prepositions that typically introduce the next entity.
    const SEPARATORS: [&str; 9] = [
        "\n", "\t", ". ", ", ", " and ", " from ", " at ", " in ", " with ",
    ];
    let end = SEPARATORS
        .iter()
        .filter_map(|sep| value_slice.find(sep))
        .min()
        .unwrap_or(value_slice.len());
    if end == 0 {
        return None;
    }

    let value = value_slice[..end].trim_end_matches(['.', '!', '?']);
    if value.is_empty() {
        return None;
    }
    Some((start + value_offset, value))
}

fn default_triggers() -> Vec<TriggerPhrase> {
    vec![
        TriggerPhrase {
            phrases: vec!["my name is", "my name's", "i'm called", "i am called"],
            label: "person",
            validator: |v| {
                v.len() >= 2
                    && v.chars()
                        .all(|c| c.is_alphabetic() || c.is_whitespace() || "-'.".contains(c))
            },
            confidence: 0.90,
        },
        TriggerPhrase {
            phrases: vec!["i live in", "i'm from", "i am from", "based in"],
            label: "location",
            validator: |v| v.len() >= 2 && v.chars().any(|c| c.is_alphabetic()),
            confidence: 0.85,
        },
        TriggerPhrase {
            phrases: vec!["i work at", "i work for", "employed at", "employed by"],
            label: "organization",
            validator: |v| v.len() >= 2 && v.chars().any(|c| c.is_alphabetic()),
            confidence: 0.85,
        },
        TriggerPhrase {
            phrases: vec!["born on", "my birthday is", "date of birth is"],
            label: "date",
            validator: |v| v.chars().any(|c| c.is_ascii_digit()),
            confidence: 0.80,
        },
    ]
}

/// Parse lexicon file contents: one `term,label` per line, `#` comments
/// allowed. The label is taken after the last comma so terms may contain
/// commas themselves.
fn parse_lexicon(contents: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.rsplit_once(',') {
            Some((term, label)) if !term.trim().is_empty() && !label.trim().is_empty() => {
                entries.push((term.trim().to_lowercase(), label.trim().to_string()));
            }
            _ => {
                tracing::warn!(line, "Skipping malformed lexicon line");
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_types() -> Vec<String> {
        ["person", "location", "organization", "date"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn recognizer() -> EntityRecognizer {
        EntityRecognizer::with_lexicon(vec![
            ("Acme Corporation".to_string(), "organization".to_string()),
            ("Springfield".to_string(), "location".to_string()),
            ("Paris".to_string(), "location".to_string()),
        ])
    }

    #[test]
    fn test_trigger_finds_person_name() {
        let r = recognizer();
        let text = "Hello, my name is Alice Johnson and I need help.";
        let matches = r.recognize(text, &all_types());
        let person = matches.iter().find(|m| m.label == "person").unwrap();
        assert_eq!(&text[person.start..person.end], "Alice Johnson");
    }

    #[test]
    fn test_trigger_finds_location_and_organization() {
        let r = recognizer();
        let text = "I live in Lisbon. I work at Initech.";
        let matches = r.recognize(text, &all_types());
        let labels: Vec<&str> = matches.iter().map(|m| m.label.as_str()).collect();
        assert!(labels.contains(&"location"));
        assert!(labels.contains(&"organization"));
    }

    #[test]
    fn test_lexicon_match_on_word_boundary() {
        let r = recognizer();
        let matches = r.recognize("We flew to Paris last week.", &all_types());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].label, "location");
    }

    #[test]
    fn test_lexicon_no_match_inside_word() {
        let r = recognizer();
        // "paris" occurs inside "comparison" but is not a word.
        assert!(r.recognize("A comparison of results.", &all_types()).is_empty());
    }

    #[test]
    fn test_entity_type_filter() {
        let r = recognizer();
        let text = "My name is Bob. We flew to Paris.";
        let matches = r.recognize(text, &["location".to_string()]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].label, "location");
    }

    #[test]
    fn test_skips_already_redacted_values() {
        let r = recognizer();
        let matches = r.recognize("my name is [REDACTED_PERSON]", &all_types());
        assert!(matches.iter().all(|m| m.label != "person"));
    }

    #[test]
    fn test_date_trigger() {
        let r = recognizer();
        let text = "I was born on 1990-01-15 in a small town.";
        let matches = r.recognize(text, &all_types());
        assert!(matches.iter().any(|m| m.label == "date"));
    }

    #[test]
    fn test_unavailable_recognizer() {
        assert!(!EntityRecognizer::unavailable().available());
        assert!(recognizer().available());
    }

    #[test]
    fn test_parse_lexicon_skips_malformed() {
        let contents = "# comment\nAcme Corporation,organization\n\nbadline\nParis,location\n";
        let entries = parse_lexicon(contents);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("acme corporation".to_string(), "organization".to_string()));
    }

    #[test]
    fn test_matches_sorted_and_disjoint() {
        let r = recognizer();
        let text = "my name is Carol, I live in Springfield";
        let matches = r.recognize(text, &all_types());
        assert!(matches.windows(2).all(|w| w[0].end <= w[1].start));
    }
}
