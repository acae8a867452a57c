//! Final verification.
//!
//! Runs exactly once, after the review loop ends. Deterministic last gate:
//! anchors whose claims were removed (or never existed) are stripped, any
//! factual sentence left without a live anchor into usable evidence is
//! dropped, and over-length verbatim quotes are flagged. What survives is
//! the text the bibliography is built from.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::bibliography::Reference;
use crate::claim::ClaimRegister;
use crate::draft::{self, Draft};
use crate::events::EventSender;
use crate::evidence::{EvidencePack, EvidenceStatus};

const AGENT: &str = "FinalVerifier";

pub struct FinalVerifier {
    max_quote_words: usize,
}

/// Outcome of the verification pass, before the bibliography is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub text: String,
    pub dropped_sentences: Vec<String>,
    /// Claim ids whose anchors were stripped from the text.
    pub stripped_claims: Vec<String>,
    /// Surviving B/C claims that never reached fulfilled evidence.
    pub unresolved_claims: Vec<String>,
    pub issues: Vec<String>,
}

/// Terminal artifact: verified text plus the anchor-derived bibliography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPaper {
    pub text: String,
    pub bibliography: Vec<Reference>,
    pub unresolved_claims: Vec<String>,
    pub issues: Vec<String>,
}

impl FinalPaper {
    pub fn assemble(verification: Verification, bibliography: Vec<Reference>) -> Self {
        Self {
            text: verification.text,
            bibliography,
            unresolved_claims: verification.unresolved_claims,
            issues: verification.issues,
        }
    }
}

impl FinalVerifier {
    pub fn new(max_quote_words: usize) -> Self {
        Self { max_quote_words }
    }

    pub fn verify(
        &self,
        register: &ClaimRegister,
        packs: &BTreeMap<String, EvidencePack>,
        removed: &BTreeSet<String>,
        draft: &Draft,
        events: &EventSender,
    ) -> Verification {
        events.status(
            AGENT,
            format!("Verifying draft revision {}", draft.revision),
        );

        // Claims the final text may lean on: class A, or fulfilled evidence.
        let usable: BTreeSet<&str> = register
            .surviving_claims(removed)
            .filter(|c| {
                !c.requires_evidence()
                    || packs
                        .get(&c.id)
                        .is_some_and(|p| p.status == EvidenceStatus::Fulfilled)
            })
            .map(|c| c.id.as_str())
            .collect();
        let known: BTreeSet<&str> = register.claims.iter().map(|c| c.id.as_str()).collect();

        let mut text = draft.text.clone();
        let mut stripped_claims = Vec::new();
        for id in draft.anchors() {
            if !known.contains(id.as_str()) || removed.contains(id.as_str()) {
                text = draft::strip_anchor(&text, &id);
                stripped_claims.push(id);
            }
        }

        // Factual sentences must keep a live anchor after stripping.
        let mut dropped = Vec::new();
        for sentence in draft::split_sentences(&text) {
            if !draft::is_factual_sentence(&sentence) {
                continue;
            }
            let live = draft::extract_anchors(&sentence)
                .iter()
                .any(|id| usable.contains(id.as_str()));
            if !live {
                dropped.push(sentence);
            }
        }
        let dropped_set: BTreeSet<&str> = dropped.iter().map(String::as_str).collect();
        let text = remove_sentences(&text, &dropped_set);

        let mut issues = Vec::new();
        let longest = draft::longest_quote_words(&text);
        if longest > self.max_quote_words {
            issues.push(format!(
                "verbatim quote of {longest} words exceeds the {}-word cap",
                self.max_quote_words
            ));
        }

        let unresolved_claims: Vec<String> = register
            .surviving_claims(removed)
            .filter(|c| c.requires_evidence())
            .filter(|c| {
                packs.get(&c.id).map_or(EvidenceStatus::Pending, |p| p.status)
                    != EvidenceStatus::Fulfilled
            })
            .map(|c| c.id.clone())
            .collect();

        events.status_with(
            AGENT,
            format!(
                "Verification: dropped {} sentences, stripped {} anchors, {} unresolved claims",
                dropped.len(),
                stripped_claims.len(),
                unresolved_claims.len()
            ),
            serde_json::json!({
                "dropped_sentences": dropped.len(),
                "stripped_anchors": stripped_claims,
                "unresolved_claims": unresolved_claims,
                "issues": issues,
            }),
        );

        Verification {
            text,
            dropped_sentences: dropped,
            stripped_claims,
            unresolved_claims,
            issues,
        }
    }
}

/// Remove exact sentences (as produced by [`draft::split_sentences`]) while
/// preserving headings, code fences, and untouched lines.
fn remove_sentences(text: &str, targets: &BTreeSet<&str>) -> String {
    if targets.is_empty() {
        return text.to_string();
    }
    let mut out_lines = Vec::new();
    let mut in_code = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            out_lines.push(line.to_string());
            continue;
        }
        if in_code || trimmed.is_empty() || trimmed.starts_with('#') {
            out_lines.push(line.to_string());
            continue;
        }

        let mut kept = Vec::new();
        let mut changed = false;
        let mut current = String::new();
        for ch in trimmed.chars() {
            current.push(ch);
            if matches!(ch, '.' | '!' | '?') {
                let segment = current.trim().to_string();
                if targets.contains(segment.as_str()) {
                    changed = true;
                } else if !segment.is_empty() {
                    kept.push(segment);
                }
                current.clear();
            }
        }
        let rest = current.trim();
        if targets.contains(rest) {
            changed = true;
        } else if !rest.is_empty() {
            kept.push(rest.to_string());
        }

        if !changed {
            out_lines.push(line.to_string());
        } else if !kept.is_empty() {
            out_lines.push(kept.join(" "));
        }
    }
    out_lines.join("\n")
}
