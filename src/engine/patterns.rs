//! Compiled regex patterns for structural PII.
//!
//! These cover identifiers with a recognizable shape (emails, phone numbers,
//! SSNs, card numbers, IP addresses). Free-text identifiers such as names and
//! locations are handled by the entity recognizer instead.

use once_cell::sync::Lazy;
use regex::Regex;

/// A single structural-PII match in a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub label: &'static str,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

struct PiiPattern {
    label: &'static str,
    regex: Regex,
    confidence: f64,
}

static PII_PATTERNS: Lazy<Vec<PiiPattern>> = Lazy::new(|| {
    vec![
        PiiPattern {
            label: "email",
            regex: Regex::new(r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}")
                .expect("valid regex: email"),
            confidence: 0.95,
        },
        PiiPattern {
            label: "ssn",
            regex: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid regex: ssn"),
            confidence: 0.90,
        },
        PiiPattern {
            label: "credit_card",
            regex: Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b")
                .expect("valid regex: credit card"),
            confidence: 0.85,
        },
        PiiPattern {
            label: "phone",
            regex: Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("valid regex: phone"),
            confidence: 0.80,
        },
        PiiPattern {
            label: "ip_address",
            regex: Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b")
                .expect("valid regex: ip address"),
            confidence: 0.75,
        },
    ]
});

/// Scan `text` for structural PII. Matches come back sorted by start
/// position with overlaps removed (higher confidence wins).
pub fn find_structural_pii(text: &str) -> Vec<PatternMatch> {
    let mut matches = Vec::new();

    for pattern in PII_PATTERNS.iter() {
        for m in pattern.regex.find_iter(text) {
            matches.push(PatternMatch {
                label: pattern.label,
                start: m.start(),
                end: m.end(),
                confidence: pattern.confidence,
            });
        }
    }

    matches.sort_by_key(|m| m.start);
    deduplicate_overlapping(&mut matches);
    matches
}

/// Remove overlapping matches, preferring higher-confidence entries.
fn deduplicate_overlapping(matches: &mut Vec<PatternMatch>) {
    if matches.len() < 2 {
        return;
    }
    let mut keep = vec![true; matches.len()];
    for i in 0..matches.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..matches.len() {
            if !keep[j] {
                continue;
            }
            if matches[j].start < matches[i].end {
                if matches[j].confidence > matches[i].confidence {
                    keep[i] = false;
                    break;
                } else {
                    keep[j] = false;
                }
            }
        }
    }
    let mut idx = 0;
    matches.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
}
