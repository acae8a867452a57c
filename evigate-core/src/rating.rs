//! Evidence rating: model-assisted five-dimension scoring with a
//! deterministic source-class fallback, plus the status evaluation that
//! gates what the writer may assert.
//!
//! Only unrated sources go to the model and an assigned rating is never
//! recomputed, so re-rating after a gap-loop round is idempotent. A rater
//! failure of any kind degrades to the fallback table; every fallback total
//! sits below the acceptance threshold, so degraded sources surface as
//! content gaps instead of silently accepted evidence.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::claim::{Claim, ClaimRegister, IndependenceRule, SourceClass};
use crate::config::ModelTier;
use crate::decode::decode_ratings;
use crate::events::EventSender;
use crate::evidence::{
    EvidencePack, EvidenceStatus, MAX_EXTRACT_CHARS, RatedSource, SourceRating, truncate_extract,
};
use crate::gateway::{ModelGateway, ModelRequest, Role};
use crate::review::Contradiction;

const AGENT: &str = "EvidenceRater";

/// Minimum keyword overlap before two extracts count as the same topic.
const MIN_TOPIC_OVERLAP: f64 = 0.3;
const NEGATION_OVERLAP: f64 = 0.4;

/// Counters for one rating pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub packs_rated: usize,
    pub sources_rated: usize,
    pub fulfilled: usize,
    pub insufficient: usize,
    pub conflicts: usize,
}

pub struct EvidenceRater {
    gateway: Arc<ModelGateway>,
    tier: ModelTier,
    min_source_score: u8,
}

impl EvidenceRater {
    pub fn new(gateway: Arc<ModelGateway>, tier: ModelTier, min_source_score: u8) -> Self {
        Self {
            gateway,
            tier,
            min_source_score,
        }
    }

    /// Rate unrated sources across the packs (optionally restricted to
    /// `subset`) and re-evaluate every touched pack's status.
    pub async fn rate(
        &self,
        register: &ClaimRegister,
        packs: &mut BTreeMap<String, EvidencePack>,
        subset: Option<&BTreeSet<String>>,
        events: &EventSender,
    ) -> RatingSummary {
        let mut summary = RatingSummary::default();

        for (claim_id, pack) in packs.iter_mut() {
            if let Some(subset) = subset
                && !subset.contains(claim_id)
            {
                continue;
            }
            let Some(claim) = register.get(claim_id) else {
                warn!(claim_id, "Evidence pack without a register claim");
                continue;
            };

            summary.packs_rated += 1;
            summary.sources_rated += self.rate_pack(claim, pack, events).await;

            match pack.status {
                EvidenceStatus::Fulfilled => summary.fulfilled += 1,
                EvidenceStatus::Conflict => summary.conflicts += 1,
                _ => summary.insufficient += 1,
            }
        }

        summary
    }

    /// Rate one pack's unrated sources and evaluate its status. Returns the
    /// number of sources that received a rating.
    async fn rate_pack(&self, claim: &Claim, pack: &mut EvidencePack, events: &EventSender) -> usize {
        if pack.sources.is_empty() {
            events.status(AGENT, format!("{}: no sources to rate", claim.id));
            evaluate_pack(claim, pack, self.min_source_score, &[]);
            return 0;
        }

        let unrated: Vec<usize> = pack
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.rating.is_none())
            .map(|(i, _)| i)
            .collect();

        let mut model_conflicts = Vec::new();
        if !unrated.is_empty() {
            events.status(
                AGENT,
                format!("Rating {} sources for {}", unrated.len(), claim.id),
            );
            model_conflicts = self.rate_unrated(claim, pack, &unrated).await;
        }

        evaluate_pack(claim, pack, self.min_source_score, &model_conflicts);

        let scores: Vec<u8> = pack.sources.iter().filter_map(|s| s.score()).collect();
        let average = if scores.is_empty() {
            0.0
        } else {
            scores.iter().map(|s| *s as f64).sum::<f64>() / scores.len() as f64
        };
        events.status_with(
            AGENT,
            format!("{}: average score {average:.1}", claim.id),
            serde_json::json!({
                "claim_id": claim.id,
                "average_score": average,
                "status": pack.status,
            }),
        );

        unrated.len()
    }

    /// Send the unrated sources to the rater model and apply what decodes.
    /// Sources the model skipped, and every source on any failure, get the
    /// deterministic class fallback. Returns model-reported conflicts.
    async fn rate_unrated(
        &self,
        claim: &Claim,
        pack: &mut EvidencePack,
        unrated: &[usize],
    ) -> Vec<Contradiction> {
        let (system, user) = build_rate_prompt(claim, pack, unrated);
        let request = ModelRequest::new(system, user);

        let mut model_conflicts = Vec::new();
        match self.gateway.complete(Role::Rater, self.tier, &request).await {
            Ok(reply) => match decode_ratings(&reply.text) {
                Ok(payload) => {
                    for decoded in payload.ratings {
                        let Some(source) = pack
                            .sources
                            .iter_mut()
                            .find(|s| s.hit.source_id == decoded.source_id)
                        else {
                            debug!(source_id = %decoded.source_id, "Rating for unknown source");
                            continue;
                        };
                        if source.rating.is_some() {
                            // Assigned ratings are final.
                            continue;
                        }
                        source.rating = Some(decoded.rating.clamped());
                        if let Some(paraphrase) = decoded.paraphrased_extract {
                            source.paraphrased_extract =
                                truncate_extract(&paraphrase, MAX_EXTRACT_CHARS);
                        }
                    }
                    model_conflicts = payload.conflicts;
                }
                Err(e) => {
                    warn!(claim_id = %claim.id, error = %e, "Rater reply did not decode, using class fallback");
                }
            },
            Err(e) => {
                warn!(claim_id = %claim.id, error = %e, "Rater call failed, using class fallback");
            }
        }

        for source in pack.sources.iter_mut().filter(|s| s.rating.is_none()) {
            source.rating = Some(fallback_rating(source.hit.source_class));
        }

        model_conflicts
    }
}

/// Re-derive the pack status from ratings and conflicts.
///
/// Fulfilled never demotes to insufficient; only a conflict between
/// accepted sources can displace it.
fn evaluate_pack(
    claim: &Claim,
    pack: &mut EvidencePack,
    min_score: u8,
    model_conflicts: &[Contradiction],
) {
    let rule = claim.independence_rule.unwrap_or(IndependenceRule::Any);
    let accepted = pack.accepted_sources(min_score);
    let accepted_count = accepted.len();

    let mut conflicts = detect_extract_conflicts(&claim.id, &accepted);
    let accepted_ids: HashSet<&str> = accepted.iter().map(|s| s.hit.source_id.as_str()).collect();
    conflicts.extend(model_conflicts.iter().cloned().filter(|c| {
        match (&c.source_a, &c.source_b) {
            (Some(a), Some(b)) => {
                accepted_ids.contains(a.as_str()) && accepted_ids.contains(b.as_str())
            }
            _ => false,
        }
    }));

    if !conflicts.is_empty() {
        pack.status = EvidenceStatus::Conflict;
        pack.notes = format!("conflict: {}", conflicts[0].description);
        return;
    }

    let status = pack.evaluate_status(claim.min_sources, min_score, rule);
    if pack.status == EvidenceStatus::Fulfilled && status == EvidenceStatus::Insufficient {
        return;
    }
    pack.status = status;
    pack.notes = format!(
        "{accepted_count} of {} accepted sources (threshold {min_score})",
        claim.min_sources
    );
}

/// Class-based rating used when the model cannot. Every total is below the
/// default acceptance threshold of 10.
fn fallback_rating(class: SourceClass) -> SourceRating {
    match class {
        SourceClass::Primary => SourceRating {
            authority: 3,
            independence: 0,
            recency: 2,
            specificity: 2,
            consensus: 1,
        },
        SourceClass::Secondary => SourceRating {
            authority: 2,
            independence: 2,
            recency: 2,
            specificity: 2,
            consensus: 1,
        },
        SourceClass::Tertiary => SourceRating {
            authority: 1,
            independence: 2,
            recency: 2,
            specificity: 1,
            consensus: 1,
        },
    }
}

fn build_rate_prompt(claim: &Claim, pack: &EvidencePack, unrated: &[usize]) -> (String, String) {
    let system = "You are an evidence rater. You score sources on five dimensions, \
                  0-3 points each:\n\
                  1. authority: 3 primary source (vendor, standards body, government), \
                  2 established trade press or research institute, 1 known tech blog or \
                  news portal, 0 unknown blog or forum.\n\
                  2. independence: 3 fully independent of the subject, 2 industry expert \
                  but not the vendor, 1 vendor-adjacent or affiliate, 0 the vendor itself \
                  or PR material.\n\
                  3. recency: 3 under 6 months old, 2 six to twelve months, 1 one to \
                  three years, 0 older or undated.\n\
                  4. specificity: 3 states the claim exactly, 2 directly relevant, \
                  1 context only, 0 barely relevant.\n\
                  5. consensus: 3 multiple independent sources confirm, 2 one other \
                  confirms, 1 unconfirmed but uncontradicted, 0 contradicted.\n\
                  You respond with a single JSON object and nothing else."
        .to_string();

    let sources_block: String = unrated
        .iter()
        .filter_map(|&i| pack.sources.get(i))
        .map(|s| {
            format!(
                "- {}: {} ({}, {})\n  Extract: {}\n",
                s.hit.source_id, s.hit.title, s.hit.publisher, s.hit.url, s.paraphrased_extract
            )
        })
        .collect();

    let user = format!(
        r#"Rate these sources against the claim:

CLAIM ({}): {}

SOURCES:
{sources_block}
Also report pairs of sources that make mutually exclusive factual assertions.

Respond ONLY with valid JSON in exactly this shape:
{{
  "ratings": [
    {{"source_id": "S-00000000", "authority": 2, "independence": 2, "recency": 3,
      "specificity": 2, "consensus": 1,
      "paraphrase": "one sentence on what the source establishes"}}
  ],
  "conflicts": [
    {{"claim_id": "{}", "source_a": "S-00000000", "source_b": "S-11111111",
      "description": "what they disagree on"}}
  ]
}}"#,
        claim.id, claim.text, claim.id
    );
    (system, user)
}

// ---------------------------------------------------------------------------
// Deterministic cross-source conflict check
// ---------------------------------------------------------------------------

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "neither", "without", "cannot", "lack", "lacks", "lacking",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
    "could", "of", "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "this", "that", "these",
    "those", "it", "its", "and", "but", "or",
];

/// Pairwise check over accepted extracts: same-topic pairs where one side
/// negates the other, or where figures diverge by more than 10%.
pub(crate) fn detect_extract_conflicts(
    claim_id: &str,
    accepted: &[&RatedSource],
) -> Vec<Contradiction> {
    let mut conflicts = Vec::new();
    for i in 0..accepted.len() {
        for j in (i + 1)..accepted.len() {
            let a = accepted[i];
            let b = accepted[j];
            if let Some(description) =
                check_extract_pair(&a.paraphrased_extract, &b.paraphrased_extract)
            {
                conflicts.push(Contradiction {
                    claim_id: Some(claim_id.to_string()),
                    source_a: Some(a.hit.source_id.clone()),
                    source_b: Some(b.hit.source_id.clone()),
                    description,
                });
            }
        }
    }
    conflicts
}

fn check_extract_pair(a: &str, b: &str) -> Option<String> {
    let keywords_a = extract_keywords(a);
    let keywords_b = extract_keywords(b);
    let overlap = keyword_overlap(&keywords_a, &keywords_b);
    if overlap < MIN_TOPIC_OVERLAP {
        return None;
    }

    let a_negated = has_negation(a);
    let b_negated = has_negation(b);
    if a_negated != b_negated && overlap > NEGATION_OVERLAP {
        return Some("one extract negates what the other asserts".to_string());
    }

    let nums_a = extract_numbers(a);
    let nums_b = extract_numbers(b);
    if !nums_a.is_empty() && !nums_b.is_empty() {
        let mismatch = nums_a.iter().any(|na| {
            nums_b.iter().any(|nb| {
                (na - nb).abs() > f64::EPSILON && (na - nb).abs() / na.abs().max(1.0) > 0.1
            })
        });
        if mismatch {
            return Some("extracts report diverging figures".to_string());
        }
    }

    None
}

fn extract_keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}

fn has_negation(text: &str) -> bool {
    let tokens: HashSet<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();
    NEGATION_WORDS.iter().any(|w| tokens.contains(*w))
}

fn extract_numbers(text: &str) -> Vec<f64> {
    text.split(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

fn keyword_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{ClaimType, EvidenceClass, QuestionBrief, TermMap};
    use crate::evidence::SourceHit;
    use crate::gateway::MockBackend;
    use pretty_assertions::assert_eq;

    fn make_claim(id: &str, class: EvidenceClass) -> Claim {
        let mut claim = Claim {
            id: id.to_string(),
            text: format!("Claim {id} asserts a checkable fact."),
            claim_type: ClaimType::Quant,
            evidence_class: class,
            freshness_required: false,
            recency_days: None,
            required_source_classes: Default::default(),
            min_sources: 1,
            independence_rule: None,
            retrieval_ticket: None,
            depends_on: Default::default(),
            section_id: "1".to_string(),
        };
        claim.normalize();
        claim
    }

    fn make_register(claims: Vec<Claim>) -> ClaimRegister {
        ClaimRegister {
            question_brief: QuestionBrief {
                core_question: "q".to_string(),
                original_question: "q".to_string(),
                audience: "general".to_string(),
                tone: "neutral".to_string(),
                length_tier: Default::default(),
                as_of_date: None,
                freshness_priority: Default::default(),
                scope_in: Vec::new(),
                scope_out: Vec::new(),
            },
            term_map: TermMap::default(),
            outline: Default::default(),
            claims,
        }
    }

    fn pack_with_hits(claim_id: &str, hits: Vec<SourceHit>) -> EvidencePack {
        let mut pack = EvidencePack::new(claim_id);
        for hit in hits {
            pack.add_hit(hit);
        }
        pack
    }

    fn hit(url: &str, publisher: &str, class: SourceClass, extract: &str) -> SourceHit {
        SourceHit::new(format!("Title {url}"), url, publisher, class, extract)
    }

    fn rater_with(backend: Arc<MockBackend>) -> EvidenceRater {
        EvidenceRater::new(Arc::new(ModelGateway::single(backend)), ModelTier::Budget, 10)
    }

    fn ratings_reply(entries: &[(&str, u8)]) -> String {
        let ratings: Vec<String> = entries
            .iter()
            .map(|(id, dim)| {
                format!(
                    r#"{{"source_id": "{id}", "authority": {dim}, "independence": {dim},
                        "recency": {dim}, "specificity": {dim}, "consensus": {dim}}}"#
                )
            })
            .collect();
        format!(r#"{{"ratings": [{}]}}"#, ratings.join(","))
    }

    #[tokio::test]
    async fn test_rate_applies_ratings_and_fulfills() {
        let backend = Arc::new(MockBackend::new());
        let a = hit("https://a.example/1", "Pub A", SourceClass::Secondary, "extract a");
        let b = hit("https://b.example/2", "Pub B", SourceClass::Secondary, "extract b");
        backend.queue_text(&ratings_reply(&[
            (&a.source_id.clone(), 3),
            (&b.source_id.clone(), 2),
        ]));

        let register = make_register(vec![make_claim("C-01", EvidenceClass::C)]);
        let mut packs = BTreeMap::from([("C-01".to_string(), pack_with_hits("C-01", vec![a, b]))]);

        let rater = rater_with(backend);
        let summary = rater
            .rate(&register, &mut packs, None, &EventSender::disabled())
            .await;

        let pack = &packs["C-01"];
        assert_eq!(pack.status, EvidenceStatus::Fulfilled);
        assert!(pack.sources.iter().all(|s| s.rating.is_some()));
        assert_eq!(summary.packs_rated, 1);
        assert_eq!(summary.sources_rated, 2);
        assert_eq!(summary.fulfilled, 1);
        assert_eq!(pack.notes, "2 of 2 accepted sources (threshold 10)");
    }

    #[tokio::test]
    async fn test_rate_is_idempotent() {
        let backend = Arc::new(MockBackend::new());
        let a = hit("https://a.example/1", "Pub A", SourceClass::Secondary, "extract a");
        backend.queue_text(&ratings_reply(&[(&a.source_id.clone(), 3)]));

        let register = make_register(vec![make_claim("C-01", EvidenceClass::B)]);
        let mut packs = BTreeMap::from([("C-01".to_string(), pack_with_hits("C-01", vec![a]))]);
        let rater = rater_with(backend.clone());

        rater
            .rate(&register, &mut packs, None, &EventSender::disabled())
            .await;
        let after_first = packs["C-01"].clone();
        assert_eq!(backend.call_count(), 1);

        // Second pass has nothing unrated, so no model call and no change.
        rater
            .rate(&register, &mut packs, None, &EventSender::disabled())
            .await;
        assert_eq!(backend.call_count(), 1);
        assert_eq!(packs["C-01"], after_first);
    }

    #[tokio::test]
    async fn test_rate_falls_back_on_unparseable_reply() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("I cannot rate these sources.");

        let register = make_register(vec![make_claim("C-01", EvidenceClass::B)]);
        let mut packs = BTreeMap::from([(
            "C-01".to_string(),
            pack_with_hits(
                "C-01",
                vec![
                    hit("https://vendor.example/doc", "Vendor", SourceClass::Primary, "x"),
                    hit("https://blog.example/p", "Blog", SourceClass::Tertiary, "y"),
                ],
            ),
        )]);

        let rater = rater_with(backend);
        rater
            .rate(&register, &mut packs, None, &EventSender::disabled())
            .await;

        let pack = &packs["C-01"];
        assert_eq!(pack.sources[0].score(), Some(8));
        assert_eq!(pack.sources[1].score(), Some(7));
        // Fallback totals sit below the threshold: the gap stays visible.
        assert_eq!(pack.status, EvidenceStatus::Insufficient);
    }

    #[tokio::test]
    async fn test_rate_falls_back_on_model_error() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_failure(crate::error::ModelError::ApiRequest {
            message: "boom".to_string(),
        });

        let register = make_register(vec![make_claim("C-01", EvidenceClass::B)]);
        let mut packs = BTreeMap::from([(
            "C-01".to_string(),
            pack_with_hits(
                "C-01",
                vec![hit("https://a.example/1", "Pub A", SourceClass::Secondary, "x")],
            ),
        )]);

        let rater = rater_with(backend);
        let summary = rater
            .rate(&register, &mut packs, None, &EventSender::disabled())
            .await;

        assert_eq!(packs["C-01"].sources[0].score(), Some(9));
        assert_eq!(packs["C-01"].status, EvidenceStatus::Insufficient);
        assert_eq!(summary.insufficient, 1);
    }

    #[tokio::test]
    async fn test_rate_model_skipped_source_gets_fallback() {
        let backend = Arc::new(MockBackend::new());
        let a = hit("https://a.example/1", "Pub A", SourceClass::Secondary, "extract a");
        let b = hit("https://b.example/2", "Pub B", SourceClass::Primary, "extract b");
        backend.queue_text(&ratings_reply(&[(&a.source_id.clone(), 3)]));

        let register = make_register(vec![make_claim("C-01", EvidenceClass::B)]);
        let mut packs = BTreeMap::from([("C-01".to_string(), pack_with_hits("C-01", vec![a, b]))]);

        let rater = rater_with(backend);
        rater
            .rate(&register, &mut packs, None, &EventSender::disabled())
            .await;

        let pack = &packs["C-01"];
        assert_eq!(pack.sources[0].score(), Some(15));
        assert_eq!(pack.sources[1].score(), Some(8));
    }

    #[tokio::test]
    async fn test_rate_conflict_between_accepted_sources() {
        let backend = Arc::new(MockBackend::new());
        let a = hit(
            "https://a.example/1",
            "Pub A",
            SourceClass::Secondary,
            "The vendor quota system supports nested limits in production.",
        );
        let b = hit(
            "https://b.example/2",
            "Pub B",
            SourceClass::Secondary,
            "The vendor quota system does not support nested limits in production.",
        );
        backend.queue_text(&ratings_reply(&[
            (&a.source_id.clone(), 3),
            (&b.source_id.clone(), 3),
        ]));

        let register = make_register(vec![make_claim("C-01", EvidenceClass::C)]);
        let mut packs = BTreeMap::from([("C-01".to_string(), pack_with_hits("C-01", vec![a, b]))]);

        let rater = rater_with(backend);
        let summary = rater
            .rate(&register, &mut packs, None, &EventSender::disabled())
            .await;

        assert_eq!(packs["C-01"].status, EvidenceStatus::Conflict);
        assert!(packs["C-01"].notes.starts_with("conflict:"));
        assert_eq!(summary.conflicts, 1);
    }

    #[tokio::test]
    async fn test_rate_subset_leaves_other_packs_untouched() {
        let backend = Arc::new(MockBackend::new());
        let a = hit("https://a.example/1", "Pub A", SourceClass::Secondary, "x");
        backend.queue_text(&ratings_reply(&[(&a.source_id.clone(), 3)]));

        let register = make_register(vec![
            make_claim("C-01", EvidenceClass::B),
            make_claim("C-02", EvidenceClass::B),
        ]);
        let mut packs = BTreeMap::from([
            ("C-01".to_string(), pack_with_hits("C-01", vec![a])),
            (
                "C-02".to_string(),
                pack_with_hits(
                    "C-02",
                    vec![hit("https://b.example/2", "Pub B", SourceClass::Secondary, "y")],
                ),
            ),
        ]);
        let subset = BTreeSet::from(["C-01".to_string()]);

        let rater = rater_with(backend.clone());
        let summary = rater
            .rate(&register, &mut packs, Some(&subset), &EventSender::disabled())
            .await;

        assert_eq!(summary.packs_rated, 1);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(packs["C-02"].status, EvidenceStatus::Pending);
        assert!(packs["C-02"].sources[0].rating.is_none());
    }

    #[test]
    fn test_fulfilled_never_demotes_without_conflict() {
        let claim = make_claim("C-01", EvidenceClass::B);
        let mut pack = pack_with_hits(
            "C-01",
            vec![hit("https://a.example/1", "Pub A", SourceClass::Secondary, "x")],
        );
        pack.sources[0].rating = Some(SourceRating {
            authority: 1,
            independence: 1,
            recency: 1,
            specificity: 1,
            consensus: 1,
        });
        pack.status = EvidenceStatus::Fulfilled;

        evaluate_pack(&claim, &mut pack, 10, &[]);
        assert_eq!(pack.status, EvidenceStatus::Fulfilled);
    }

    #[test]
    fn test_detect_conflicts_diverging_figures() {
        let a = RatedSource {
            hit: hit("https://a.example/1", "Pub A", SourceClass::Secondary, ""),
            paraphrased_extract: "Survey measured agent framework adoption at 40 percent".to_string(),
            rating: None,
        };
        let b = RatedSource {
            hit: hit("https://b.example/2", "Pub B", SourceClass::Secondary, ""),
            paraphrased_extract: "Survey measured agent framework adoption at 12 percent".to_string(),
            rating: None,
        };
        let conflicts = detect_extract_conflicts("C-03", &[&a, &b]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].claim_id.as_deref(), Some("C-03"));
        assert_eq!(conflicts[0].description, "extracts report diverging figures");
    }

    #[test]
    fn test_detect_conflicts_ignores_unrelated_extracts() {
        let a = RatedSource {
            hit: hit("https://a.example/1", "Pub A", SourceClass::Secondary, ""),
            paraphrased_extract: "The sky appears blue on clear days".to_string(),
            rating: None,
        };
        let b = RatedSource {
            hit: hit("https://b.example/2", "Pub B", SourceClass::Secondary, ""),
            paraphrased_extract: "Python remains a popular programming language".to_string(),
            rating: None,
        };
        assert!(detect_extract_conflicts("C-01", &[&a, &b]).is_empty());
    }
}
