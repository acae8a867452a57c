//! Draft text and the anchor/sentence analysis shared by the writer,
//! reviewer, and final verifier.
//!
//! Claim anchors are inline markers of the form `(C-07)`. Every phase that
//! audits the draft goes through these helpers so they all agree on what
//! counts as an anchor and what counts as a factual-sounding sentence.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One generated draft. Revisions replace the previous draft wholesale so
/// anchor consistency stays checkable against a single text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    pub revision: u32,
}

impl Draft {
    pub fn new(text: impl Into<String>, revision: u32) -> Self {
        Self {
            text: text.into(),
            revision,
        }
    }

    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }

    pub fn anchors(&self) -> Vec<String> {
        extract_anchors(&self.text)
    }
}

fn anchor_regex() -> Regex {
    Regex::new(r"\((C-\d{1,3})\)").unwrap()
}

/// Render the inline anchor for a claim id.
pub fn anchor(claim_id: &str) -> String {
    format!("({claim_id})")
}

/// Claim ids anchored in the text, in first-appearance order, deduplicated.
pub fn extract_anchors(text: &str) -> Vec<String> {
    let re = anchor_regex();
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for cap in re.captures_iter(text) {
        let id = cap[1].to_string();
        if seen.insert(id.clone()) {
            out.push(id);
        }
    }
    out
}

pub fn has_anchor(sentence: &str) -> bool {
    anchor_regex().is_match(sentence)
}

/// Remove every anchor for one claim id, collapsing the whitespace the
/// marker leaves behind.
pub fn strip_anchor(text: &str, claim_id: &str) -> String {
    let marker = anchor(claim_id);
    let stripped = text.replace(&format!(" {marker}"), "").replace(&marker, "");
    collapse_spaces(&stripped)
}

fn collapse_spaces(text: &str) -> String {
    let re = Regex::new(r" {2,}").unwrap();
    re.replace_all(text, " ").replace(" .", ".").replace(" ,", ",")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split prose into sentences, skipping markdown headings and code fences.
/// Good enough for auditing; not a linguistic segmenter.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut in_code = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut current = String::new();
        for ch in trimmed.chars() {
            current.push(ch);
            if matches!(ch, '.' | '!' | '?') {
                let s = current.trim();
                if word_count(s) >= 3 {
                    sentences.push(s.to_string());
                }
                current.clear();
            }
        }
        let rest = current.trim();
        if word_count(rest) >= 3 {
            sentences.push(rest.to_string());
        }
    }
    sentences
}

const TEMPORAL_CUES: &[&str] = &[
    "currently", "as of", "since", "recent", "recently", "latest", "today", "now available",
    "this year", "last year",
];

const NORMATIVE_CUES: &[&str] = &[
    "should", "must", "recommended", "best practice", "advisable", "ought to",
];

const ASSERTION_CUES: &[&str] = &[
    "market leader", "leading", "most widely", "fastest", "largest", "majority of",
    "studies show", "research shows", "according to",
];

/// Does this sentence assert a checkable fact (numbers, currency/recency
/// claims, or normative guidance)? Such sentences need a claim anchor.
pub fn is_factual_sentence(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    if sentence.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    TEMPORAL_CUES.iter().any(|cue| lower.contains(cue))
        || NORMATIVE_CUES.iter().any(|cue| lower.contains(cue))
        || ASSERTION_CUES.iter().any(|cue| lower.contains(cue))
}

/// Length in words of the longest double-quoted span. Used to reject
/// over-length verbatim quotation.
pub fn longest_quote_words(text: &str) -> usize {
    let re = Regex::new(r#""([^"]+)""#).unwrap();
    re.captures_iter(text)
        .map(|cap| word_count(&cap[1]))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_anchors_ordered_and_deduped() {
        let text = "First point (C-02). Second (C-10), again (C-02). Third (C-3).";
        assert_eq!(extract_anchors(text), vec!["C-02", "C-10", "C-3"]);
    }

    #[test]
    fn test_anchor_round_trip() {
        let text = format!("A sentence with a marker {}.", anchor("C-07"));
        assert_eq!(extract_anchors(&text), vec!["C-07"]);
        assert!(has_anchor(&text));
    }

    #[test]
    fn test_strip_anchor_collapses_whitespace() {
        let text = "Latency dropped by 40% (C-04). Throughput held (C-05).";
        let stripped = strip_anchor(text, "C-04");
        assert_eq!(stripped, "Latency dropped by 40%. Throughput held (C-05).");
        assert_eq!(extract_anchors(&stripped), vec!["C-05"]);
    }

    #[test]
    fn test_split_sentences_skips_headings_and_code() {
        let text = "# Heading\n\nFirst sentence here today. Second one follows now.\n```\nlet x = 1;\n```\nThird sentence closes it.";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "First sentence here today.");
        assert_eq!(sentences[2], "Third sentence closes it.");
    }

    #[test]
    fn test_factual_sentence_detection() {
        assert!(is_factual_sentence("Adoption grew by 40% in 2024."));
        assert!(is_factual_sentence("The feature is currently in preview."));
        assert!(is_factual_sentence("Teams should pin dependency versions."));
        assert!(is_factual_sentence("It is the market leader in the segment."));
        assert!(!is_factual_sentence(
            "The idea itself is straightforward to explain."
        ));
    }

    #[test]
    fn test_longest_quote_words() {
        let text = r#"Short "two words" then "a much longer verbatim quotation of many words here" end."#;
        assert_eq!(longest_quote_words(text), 9);
        assert_eq!(longest_quote_words("no quotes at all"), 0);
    }

    #[test]
    fn test_draft_word_count_and_anchors() {
        let draft = Draft::new("One two three (C-01). Four five (C-02).", 1);
        assert_eq!(draft.word_count(), 7);
        assert_eq!(draft.anchors(), vec!["C-01", "C-02"]);
    }
}
