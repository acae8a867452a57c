//! Evidence model: normalized source hits, five-dimension source ratings,
//! and the per-claim evidence pack whose status gates what the writer may
//! assert.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::claim::{IndependenceRule, SourceClass};

/// Longest paraphrased extract carried per source. Keeps prompts bounded
/// while preserving one usable quote-sized snippet.
pub const MAX_EXTRACT_CHARS: usize = 400;

/// Derive a stable source id from the URL. The same document retrieved for
/// two different claims gets the same id, which is what makes bibliography
/// de-duplication work.
pub fn source_id_for_url(url: &str) -> String {
    let digest = Sha256::digest(url.trim().as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("S-{hex}")
}

/// Normalized retrieval tool result. Ephemeral and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHit {
    pub source_id: String,
    pub title: String,
    pub publisher: String,
    #[serde(default)]
    pub author: String,
    /// `YYYY-MM-DD`, a bare year, or empty when the tool has no date.
    #[serde(default)]
    pub date: String,
    pub url: String,
    #[serde(default)]
    pub source_class: SourceClass,
    #[serde(default)]
    pub raw_extract: String,
}

impl SourceHit {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        publisher: impl Into<String>,
        source_class: SourceClass,
        raw_extract: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            source_id: source_id_for_url(&url),
            title: title.into(),
            publisher: publisher.into(),
            author: String::new(),
            date: String::new(),
            url,
            source_class,
            raw_extract: raw_extract.into(),
        }
    }
}

/// Five-dimension quality rating, 0-3 per dimension, 0-15 total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRating {
    pub authority: u8,
    pub independence: u8,
    pub recency: u8,
    pub specificity: u8,
    pub consensus: u8,
}

impl SourceRating {
    pub fn total(&self) -> u8 {
        self.authority + self.independence + self.recency + self.specificity + self.consensus
    }

    /// Clamp every dimension into the 0-3 band. Model output occasionally
    /// scores on the wrong scale; clamping keeps totals comparable.
    pub fn clamped(self) -> Self {
        Self {
            authority: self.authority.min(3),
            independence: self.independence.min(3),
            recency: self.recency.min(3),
            specificity: self.specificity.min(3),
            consensus: self.consensus.min(3),
        }
    }
}

/// One source inside an evidence pack: the normalized hit, the bounded
/// extract actually shown to models, and the rating once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedSource {
    pub hit: SourceHit,
    pub paraphrased_extract: String,
    #[serde(default)]
    pub rating: Option<SourceRating>,
}

impl RatedSource {
    pub fn score(&self) -> Option<u8> {
        self.rating.map(|r| r.total())
    }
}

/// Evidence requirement status for one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    #[default]
    Pending,
    Fulfilled,
    Insufficient,
    Conflict,
}

/// The accumulated, rated source set for one B/C claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePack {
    pub claim_id: String,
    #[serde(default)]
    pub sources: Vec<RatedSource>,
    #[serde(default)]
    pub status: EvidenceStatus,
    #[serde(default)]
    pub notes: String,
}

impl EvidencePack {
    pub fn new(claim_id: impl Into<String>) -> Self {
        Self {
            claim_id: claim_id.into(),
            sources: Vec::new(),
            status: EvidenceStatus::Pending,
            notes: String::new(),
        }
    }

    /// Add a hit unless the same source id is already present. Returns
    /// whether the hit was added.
    pub fn add_hit(&mut self, hit: SourceHit) -> bool {
        if self.contains_source(&hit.source_id) {
            return false;
        }
        let paraphrased_extract = truncate_extract(&hit.raw_extract, MAX_EXTRACT_CHARS);
        self.sources.push(RatedSource {
            hit,
            paraphrased_extract,
            rating: None,
        });
        true
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.sources.iter().any(|s| s.hit.source_id == source_id)
    }

    pub fn has_unrated_sources(&self) -> bool {
        self.sources.iter().any(|s| s.rating.is_none())
    }

    /// Sources whose rating total meets the acceptance threshold.
    pub fn accepted_sources(&self, min_score: u8) -> Vec<&RatedSource> {
        self.sources
            .iter()
            .filter(|s| s.score().is_some_and(|t| t >= min_score))
            .collect()
    }

    /// Distinct publishers (case-insensitive) across the given sources.
    pub fn distinct_publishers(sources: &[&RatedSource]) -> usize {
        let mut publishers: Vec<String> = sources
            .iter()
            .map(|s| s.hit.publisher.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        publishers.sort();
        publishers.dedup();
        publishers.len()
    }

    /// Evaluate fulfilled/insufficient from ratings alone. A pack is
    /// fulfilled when at least `min_sources` accepted sources exist and the
    /// independence rule holds across the accepted subset. Conflict is
    /// decided by the rater's cross-source check, not here.
    pub fn evaluate_status(
        &self,
        min_sources: usize,
        min_score: u8,
        rule: IndependenceRule,
    ) -> EvidenceStatus {
        let accepted = self.accepted_sources(min_score);
        if accepted.len() < min_sources {
            return EvidenceStatus::Insufficient;
        }
        match rule {
            IndependenceRule::Any => EvidenceStatus::Fulfilled,
            IndependenceRule::DifferentPublishers => {
                if Self::distinct_publishers(&accepted) >= min_sources {
                    EvidenceStatus::Fulfilled
                } else {
                    EvidenceStatus::Insufficient
                }
            }
        }
    }
}

/// Shorten an extract to at most `max_chars` characters, cutting at a word
/// boundary where possible.
pub fn truncate_extract(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    let clipped = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > max_chars / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}...", clipped.trim_end())
}
