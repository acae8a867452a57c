//! Bibliography assembly.
//!
//! The reference list is derived from the verified text, not from the
//! writer: only sources reachable from an anchor that survived verification
//! may appear, so a retrieved-but-never-cited source never pads the list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::draft::extract_anchors;
use crate::evidence::EvidencePack;

/// One reference list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub number: usize,
    pub source_id: String,
    pub publisher: String,
    #[serde(default)]
    pub author: String,
    pub title: String,
    #[serde(default)]
    pub date: String,
    pub url: String,
    /// Claim ids this source backs in the final text.
    pub cited_for: Vec<String>,
}

/// Build the reference list for a verified text.
///
/// Anchors are taken in first-appearance order; each resolves to the
/// accepted sources of its evidence pack. A source cited under several
/// claims appears once, keyed by `source_id`, crediting every claim.
/// Within one anchor, new sources are ordered by `source_id` so the list
/// is deterministic.
pub fn build_bibliography(
    text: &str,
    packs: &BTreeMap<String, EvidencePack>,
    min_source_score: u8,
) -> Vec<Reference> {
    let mut references: Vec<Reference> = Vec::new();

    for claim_id in extract_anchors(text) {
        let Some(pack) = packs.get(&claim_id) else {
            continue;
        };
        let mut accepted = pack.accepted_sources(min_source_score);
        accepted.sort_by(|a, b| a.hit.source_id.cmp(&b.hit.source_id));

        for source in accepted {
            if let Some(existing) = references
                .iter_mut()
                .find(|r| r.source_id == source.hit.source_id)
            {
                if !existing.cited_for.contains(&claim_id) {
                    existing.cited_for.push(claim_id.clone());
                }
                continue;
            }
            references.push(Reference {
                number: references.len() + 1,
                source_id: source.hit.source_id.clone(),
                publisher: source.hit.publisher.clone(),
                author: source.hit.author.clone(),
                title: source.hit.title.clone(),
                date: source.hit.date.clone(),
                url: source.hit.url.clone(),
                cited_for: vec![claim_id.clone()],
            });
        }
    }

    references
}

/// APA-style line for one reference: `[n] author (year). title. url`.
pub fn format_reference(reference: &Reference) -> String {
    let author = if reference.author.trim().is_empty() {
        reference.publisher.trim()
    } else {
        reference.author.trim()
    };
    format!(
        "[{}] {author} ({}). {}. {}",
        reference.number,
        publication_year(&reference.date),
        reference.title.trim(),
        reference.url.trim()
    )
}

/// Render the full reference section for appending to the paper.
pub fn render_bibliography(references: &[Reference]) -> String {
    let mut out = String::from("## References\n");
    for reference in references {
        out.push('\n');
        out.push_str(&format_reference(reference));
    }
    out
}

/// First four characters of the date (`2024-05-01` and bare `2024` both
/// yield `2024`); `n.d.` when no date is on record.
fn publication_year(date: &str) -> String {
    let trimmed = date.trim();
    if trimmed.is_empty() {
        return "n.d.".to_string();
    }
    trimmed.chars().take(4).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::SourceClass;
    use crate::evidence::{RatedSource, SourceHit, SourceRating};
    use pretty_assertions::assert_eq;

    fn source(url: &str, publisher: &str, date: &str, per_dim: u8) -> RatedSource {
        let mut hit = SourceHit::new(
            format!("Title of {url}"),
            url,
            publisher,
            SourceClass::Secondary,
            "extract",
        );
        hit.date = date.to_string();
        RatedSource {
            hit,
            paraphrased_extract: "extract".to_string(),
            rating: Some(SourceRating {
                authority: per_dim,
                independence: per_dim,
                recency: per_dim,
                specificity: per_dim,
                consensus: per_dim,
            }),
        }
    }

    fn pack(claim_id: &str, sources: Vec<RatedSource>) -> EvidencePack {
        let mut pack = EvidencePack::new(claim_id);
        pack.sources = sources;
        pack
    }

    #[test]
    fn test_first_citation_order_and_dedup() {
        let shared = source("https://shared.example/doc", "Shared House", "2024-03-01", 3);
        let mut packs = BTreeMap::new();
        packs.insert(
            "C-02".to_string(),
            pack(
                "C-02",
                vec![shared.clone(), source("https://b.example/1", "Beta", "2023", 3)],
            ),
        );
        packs.insert("C-05".to_string(), pack("C-05", vec![shared.clone()]));

        let text = "First figure (C-05). Later detail (C-02). Repeat (C-05).";
        let refs = build_bibliography(text, &packs, 10);

        // C-05 cited first, so the shared source leads the list and is
        // credited for both claims.
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].source_id, shared.hit.source_id);
        assert_eq!(refs[0].number, 1);
        assert_eq!(refs[0].cited_for, vec!["C-05".to_string(), "C-02".to_string()]);
        assert_eq!(refs[1].publisher, "Beta");
        assert_eq!(refs[1].number, 2);
    }

    #[test]
    fn test_unaccepted_and_uncited_sources_never_appear() {
        let mut packs = BTreeMap::new();
        packs.insert(
            "C-01".to_string(),
            pack(
                "C-01",
                vec![
                    source("https://good.example/1", "Good", "2024", 3),
                    source("https://weak.example/1", "Weak", "2024", 1),
                ],
            ),
        );
        // Retrieved for C-03, but C-03 is never anchored in the text.
        packs.insert(
            "C-03".to_string(),
            pack("C-03", vec![source("https://other.example/1", "Other", "2024", 3)]),
        );

        let refs = build_bibliography("Only one claim cited (C-01).", &packs, 10);

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].publisher, "Good");
    }

    #[test]
    fn test_sources_within_one_anchor_sort_by_source_id() {
        let a = source("https://zzz.example/1", "Zed", "2024", 3);
        let b = source("https://aaa.example/1", "Aye", "2024", 3);
        let expected_first = if a.hit.source_id < b.hit.source_id {
            "Zed"
        } else {
            "Aye"
        };

        let mut packs = BTreeMap::new();
        packs.insert("C-01".to_string(), pack("C-01", vec![a, b]));
        let refs = build_bibliography("One claim (C-01).", &packs, 10);

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].publisher, expected_first);
        assert!(refs[0].source_id < refs[1].source_id);
    }

    #[test]
    fn test_anchor_without_pack_is_skipped() {
        let packs = BTreeMap::new();
        let refs = build_bibliography("Class-A background (C-01).", &packs, 10);
        assert!(refs.is_empty());
    }

    #[test]
    fn test_format_reference_year_and_author_fallback() {
        let mut reference = Reference {
            number: 3,
            source_id: "S-00000000".to_string(),
            publisher: "Postgres Wiki".to_string(),
            author: String::new(),
            title: "WAL Internals".to_string(),
            date: "2024-05-01".to_string(),
            url: "https://wiki.example/wal".to_string(),
            cited_for: vec!["C-02".to_string()],
        };
        assert_eq!(
            format_reference(&reference),
            "[3] Postgres Wiki (2024). WAL Internals. https://wiki.example/wal"
        );

        reference.author = "J. Doe".to_string();
        reference.date = String::new();
        assert_eq!(
            format_reference(&reference),
            "[3] J. Doe (n.d.). WAL Internals. https://wiki.example/wal"
        );
    }

    #[test]
    fn test_render_bibliography_section() {
        let refs = vec![Reference {
            number: 1,
            source_id: "S-00000000".to_string(),
            publisher: "Beta".to_string(),
            author: String::new(),
            title: "Benchmark".to_string(),
            date: "2023".to_string(),
            url: "https://b.example/1".to_string(),
            cited_for: vec!["C-01".to_string()],
        }];
        let rendered = render_bibliography(&refs);
        assert!(rendered.starts_with("## References\n"));
        assert!(rendered.contains("[1] Beta (2023). Benchmark. https://b.example/1"));
    }
}
