//! Claim mining: the two model calls at the head of the pipeline.
//!
//! `normalize` turns the raw question into a [`QuestionBrief`] plus
//! [`TermMap`]; `mine` decomposes the brief into the outline and the typed
//! claim register. A register that decodes to zero claims after the
//! re-prompt budget fails the run; there is no silent empty register.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use crate::claim::{
    Claim, ClaimRegister, LengthTier, QuestionBrief, RetrievalTicket, TermMap,
};
use crate::config::{ModelTier, length_policy};
use crate::decode::{decode_brief, decode_register};
use crate::error::{EvigateError, ModelError, PipelineError};
use crate::events::EventSender;
use crate::gateway::{ModelGateway, ModelRequest, Role};

const NORMALIZER_AGENT: &str = "QueryNormalizer";
const MINER_AGENT: &str = "ClaimMiner";

/// Re-prompts after the initial mine call before the run fails.
const MINE_REPROMPTS: u32 = 3;

pub struct ClaimMiner {
    gateway: Arc<ModelGateway>,
    tier: ModelTier,
    max_queries_per_claim: usize,
}

impl ClaimMiner {
    pub fn new(gateway: Arc<ModelGateway>, tier: ModelTier, max_queries_per_claim: usize) -> Self {
        Self {
            gateway,
            tier,
            max_queries_per_claim,
        }
    }

    /// Normalize the raw question into a brief and term map.
    ///
    /// An undecodable reply is not fatal here: the question passes through
    /// as its own brief and mining proceeds without a term map.
    pub async fn normalize(
        &self,
        question: &str,
        length_tier: LengthTier,
        as_of_date: NaiveDate,
        events: &EventSender,
    ) -> Result<(QuestionBrief, TermMap), ModelError> {
        events.status(NORMALIZER_AGENT, "Normalizing question");

        let (system, user) = build_normalize_prompt(question, as_of_date);
        let request = ModelRequest::new(system, user);
        let reply = self.gateway.complete(Role::Miner, self.tier, &request).await?;

        let (mut brief, term_map) = match decode_brief(&reply.text, question) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Normalize reply did not decode, passing the question through");
                (fallback_brief(question), TermMap::default())
            }
        };
        brief.length_tier = length_tier;
        brief.as_of_date = Some(as_of_date);

        events.response(
            NORMALIZER_AGENT,
            format!("Core question: {}", brief.core_question),
        );
        Ok((brief, term_map))
    }

    /// Mine the brief into an outline and claim register.
    ///
    /// Re-prompts with progressively stricter formatting instructions while
    /// replies decode to zero claims; exhausting the budget fails with
    /// [`PipelineError::InsufficientClaims`]. Every B/C claim leaves this
    /// phase with a ticket carrying at least two enriched queries.
    pub async fn mine(
        &self,
        brief: &QuestionBrief,
        term_map: &TermMap,
        events: &EventSender,
    ) -> Result<ClaimRegister, EvigateError> {
        let policy = length_policy(brief.length_tier);
        events.status(
            MINER_AGENT,
            format!(
                "Mining claims (at least {}, {} class C)",
                policy.min_claims, policy.min_c_claims
            ),
        );

        let mut mined = None;
        for strictness in 0..=MINE_REPROMPTS {
            let (system, user) =
                build_mine_prompt(brief, term_map, policy.min_claims, policy.min_c_claims, strictness);
            let request = ModelRequest::new(system, user);
            let reply = self.gateway.complete(Role::Miner, self.tier, &request).await?;

            match decode_register(&reply.text) {
                Ok((outline, claims)) if !claims.is_empty() => {
                    mined = Some((outline, claims));
                    break;
                }
                Ok(_) => {
                    warn!(attempt = strictness + 1, "Mine reply contained zero claims");
                }
                Err(e) => {
                    warn!(attempt = strictness + 1, error = %e, "Mine reply did not decode");
                }
            }
        }
        let Some((outline, mut claims)) = mined else {
            return Err(PipelineError::InsufficientClaims {
                got: 0,
                need: policy.min_claims,
            }
            .into());
        };

        for claim in &mut claims {
            repair_ticket(claim, brief, term_map, self.max_queries_per_claim);
        }

        let register = ClaimRegister {
            question_brief: brief.clone(),
            term_map: term_map.clone(),
            outline,
            claims,
        };

        let report = register.validate(policy.min_claims, policy.min_c_claims);
        for issue in &report.issues {
            warn!(issue = %issue, "Register validation issue");
        }
        events.status_with(
            MINER_AGENT,
            format!(
                "Register: {} claims ({} A, {} B, {} C)",
                report.total_claims, report.a_claims, report.b_claims, report.c_claims
            ),
            serde_json::to_value(&report).unwrap_or_default(),
        );

        Ok(register)
    }
}

/// Brief used when the normalize reply is unusable: the question speaks for
/// itself.
fn fallback_brief(question: &str) -> QuestionBrief {
    QuestionBrief {
        core_question: question.to_string(),
        original_question: question.to_string(),
        audience: "general".to_string(),
        tone: "neutral".to_string(),
        length_tier: LengthTier::default(),
        as_of_date: None,
        freshness_priority: Default::default(),
        scope_in: Vec::new(),
        scope_out: Vec::new(),
    }
}

/// Make sure a B/C claim leaves mining with a usable ticket: enrich its
/// queries with term-map search variants, and when fewer than two queries
/// survive, top up from the claim text and the core question.
fn repair_ticket(claim: &mut Claim, brief: &QuestionBrief, term_map: &TermMap, max_queries: usize) {
    if !claim.requires_evidence() {
        return;
    }

    let candidates = [
        head_words(&claim.text, 12),
        brief.core_question.clone(),
        format!("{} {}", brief.core_question, head_words(&claim.text, 4)),
    ];

    let id = claim.id.clone();
    let ticket = claim
        .retrieval_ticket
        .get_or_insert_with(|| RetrievalTicket::new(id, Vec::new()));
    ticket.queries = enrich_queries(&ticket.queries, term_map, max_queries);

    for candidate in candidates {
        if ticket.queries.len() >= 2 {
            break;
        }
        let candidate = candidate.trim().to_string();
        if !candidate.is_empty() && !ticket.queries.contains(&candidate) {
            ticket.queries.push(candidate);
        }
    }

    claim.normalize();
}

/// Expand queries with term-map search variants: for every query containing
/// a mapped term, add the query with the term swapped for up to two of its
/// variants. Duplicates are dropped and the result is capped at
/// `max_queries`, originals first.
fn enrich_queries(queries: &[String], term_map: &TermMap, max_queries: usize) -> Vec<String> {
    let mut enriched: Vec<String> = queries.to_vec();

    // Sorted for deterministic enrichment order.
    let mut terms: Vec<(&String, &Vec<String>)> = term_map.search_variants.iter().collect();
    terms.sort_by(|a, b| a.0.cmp(b.0));

    for query in queries {
        let query_lower = query.to_lowercase();
        for (term, variants) in &terms {
            if !query_lower.contains(&term.to_lowercase()) {
                continue;
            }
            for variant in variants.iter().take(2) {
                let candidate = query.replace(term.as_str(), variant.as_str());
                if !enriched.contains(&candidate) {
                    enriched.push(candidate);
                }
            }
        }
    }

    enriched.truncate(max_queries);
    enriched
}

fn head_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

fn build_normalize_prompt(question: &str, as_of_date: NaiveDate) -> (String, String) {
    let system = "You are a research question analyst. You turn raw questions into a \
                  precise brief plus a terminology map for evidence retrieval. You respond \
                  with a single JSON object and nothing else."
        .to_string();

    let user = format!(
        r#"Analyze this research question (as of {as_of_date}):

"{question}"

Respond ONLY with valid JSON in exactly this shape:
{{
  "question_brief": {{
    "core_question": "the question, sharpened and unambiguous",
    "audience": "who will read the answer",
    "tone": "neutral|technical|practical",
    "freshness_priority": "high|medium|low",
    "scope_in": ["aspects that must be covered"],
    "scope_out": ["aspects explicitly out of scope"]
  }},
  "term_map": {{
    "canonical_terms": ["the 2-5 central terms"],
    "synonyms": {{"term": ["synonym"]}},
    "search_variants": {{"term": ["alternative phrasing for search engines"]}},
    "negative_keywords": ["words whose hits are off-topic"],
    "disambiguation_notes": ["note when a term is ambiguous"]
  }}
}}"#
    );
    (system, user)
}

fn build_mine_prompt(
    brief: &QuestionBrief,
    term_map: &TermMap,
    min_claims: usize,
    min_c_claims: usize,
    strictness: u32,
) -> (String, String) {
    let system = "You are a claim miner. You decompose a research brief into individually \
                  checkable claims, each typed and assigned an evidence class. You respond \
                  with a single JSON object and nothing else."
        .to_string();

    let join_or_dash = |items: &[String]| {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.join("; ")
        }
    };
    let strictness_note = match strictness {
        0 => "",
        1 => "\n\nYour previous reply contained no parseable claims. Respond with JSON only, no prose around it.",
        _ => "\n\nSTRICT MODE: output exactly one JSON object, starting with '{' and ending with '}'. No markdown fences, no commentary, no trailing text.",
    };

    let user = format!(
        r#"Decompose this brief into at least {min_claims} claims, at least {min_c_claims} of class C:

Core question: {core}
Audience: {audience}
Tone: {tone}
In scope: {scope_in}
Out of scope: {scope_out}
Central terms: {terms}

Evidence classes:
- "A": settled background knowledge, needs no source
- "B": needs one good source
- "C": contested, quantitative, or time-sensitive; needs two independent sources

Claim types: definition, mechanism, comparison, effect, quant, temporal, normative.
Give every B and C claim two concrete search queries.

Respond ONLY with valid JSON in exactly this shape:
{{
  "outline": {{"sections": [{{"number": "1", "title": "...", "goal": "...", "claim_ids": ["C-01"]}}]}},
  "claims": [
    {{
      "id": "C-01",
      "text": "one checkable assertion",
      "claim_type": "definition",
      "evidence_class": "B",
      "freshness_required": false,
      "recency_days": null,
      "section": "1",
      "depends_on": [],
      "queries": ["search query 1", "search query 2"]
    }}
  ]
}}{strictness_note}"#,
        core = brief.core_question,
        audience = brief.audience,
        tone = brief.tone,
        scope_in = join_or_dash(&brief.scope_in),
        scope_out = join_or_dash(&brief.scope_out),
        terms = join_or_dash(&term_map.canonical_terms),
    );
    (system, user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::EvidenceClass;
    use crate::gateway::MockBackend;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn miner_with(backend: Arc<MockBackend>) -> ClaimMiner {
        let gateway = Arc::new(ModelGateway::single(backend));
        ClaimMiner::new(gateway, ModelTier::Budget, 5)
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 25).unwrap()
    }

    #[tokio::test]
    async fn test_normalize_decodes_brief_and_stamps_run_settings() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text(
            r#"{
                "question_brief": {
                    "core_question": "How do write-ahead logs provide durability?",
                    "audience": "backend engineers",
                    "tone": "technical",
                    "freshness_priority": "low"
                },
                "term_map": {"canonical_terms": ["write-ahead log"]}
            }"#,
        );
        let miner = miner_with(backend);

        let (brief, term_map) = miner
            .normalize("wal durability?", LengthTier::Long, as_of(), &EventSender::disabled())
            .await
            .unwrap();

        assert_eq!(brief.core_question, "How do write-ahead logs provide durability?");
        assert_eq!(brief.original_question, "wal durability?");
        assert_eq!(brief.audience, "backend engineers");
        assert_eq!(brief.length_tier, LengthTier::Long);
        assert_eq!(brief.as_of_date, Some(as_of()));
        assert_eq!(term_map.canonical_terms, vec!["write-ahead log"]);
    }

    #[tokio::test]
    async fn test_normalize_falls_back_to_raw_question() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("I would rather chat about something else.");
        let miner = miner_with(backend);

        let (brief, term_map) = miner
            .normalize("why rust?", LengthTier::Medium, as_of(), &EventSender::disabled())
            .await
            .unwrap();

        assert_eq!(brief.core_question, "why rust?");
        assert_eq!(brief.audience, "general");
        assert_eq!(brief.length_tier, LengthTier::Medium);
        assert!(term_map.canonical_terms.is_empty());
    }

    #[tokio::test]
    async fn test_mine_builds_register_with_repaired_tickets() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text(
            r#"{
                "outline": {"sections": [{"number": "1", "title": "Basics", "claim_ids": ["x1"]}]},
                "claims": [
                    {"id": "x1", "text": "A WAL records changes before they apply.",
                     "claim_type": "definition", "evidence_class": "A"},
                    {"id": "x2", "text": "Group commit batches fsync calls.",
                     "claim_type": "mechanism", "evidence_class": "B",
                     "queries": ["group commit fsync"]},
                    {"id": "x3", "text": "WAL compression cut storage cost by 30% in 2025.",
                     "claim_type": "quant", "evidence_class": "C",
                     "queries": ["wal compression benchmark", "wal storage cost study"]}
                ]
            }"#,
        );
        let miner = miner_with(backend);
        let brief = fallback_brief("how do WALs work?");

        let register = miner
            .mine(&brief, &TermMap::default(), &EventSender::disabled())
            .await
            .unwrap();

        assert_eq!(register.claims.len(), 3);
        assert_eq!(register.claims[0].id, "C-01");
        assert!(register.claims[0].retrieval_ticket.is_none());
        // Single-query B ticket topped up to two.
        let b_ticket = register.claims[1].retrieval_ticket.as_ref().unwrap();
        assert_eq!(b_ticket.queries.len(), 2);
        assert_eq!(b_ticket.queries[0], "group commit fsync");
        let c_ticket = register.claims[2].retrieval_ticket.as_ref().unwrap();
        assert_eq!(c_ticket.min_sources, 2);
        assert_eq!(register.outline.sections[0].expected_claim_ids, vec!["C-01"]);
    }

    #[tokio::test]
    async fn test_mine_synthesizes_missing_ticket() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text(
            r#"{"claims": [
                {"text": "Vendor X holds 40% market share.", "claim_type": "quant", "evidence_class": "C"}
            ]}"#,
        );
        let miner = miner_with(backend);
        let brief = fallback_brief("who leads the market?");

        let register = miner
            .mine(&brief, &TermMap::default(), &EventSender::disabled())
            .await
            .unwrap();

        let ticket = register.claims[0].retrieval_ticket.as_ref().unwrap();
        assert_eq!(ticket.claim_id, "C-01");
        assert_eq!(
            ticket.queries,
            vec![
                "Vendor X holds 40% market share.".to_string(),
                "who leads the market?".to_string(),
            ]
        );
        assert_eq!(ticket.min_sources, 2);
    }

    #[tokio::test]
    async fn test_mine_recovers_on_reprompt() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("Sorry, here is an essay instead of JSON.");
        backend.queue_text(r#"{"claims": [{"text": "Real claim.", "evidence_class": "B", "queries": ["q1", "q2"]}]}"#);
        let miner = miner_with(backend.clone());
        let brief = fallback_brief("q");

        let register = miner
            .mine(&brief, &TermMap::default(), &EventSender::disabled())
            .await
            .unwrap();

        assert_eq!(register.claims.len(), 1);
        assert_eq!(backend.call_count(), 2);
        // The re-prompt carried a stricter instruction.
        let requests = backend.requests();
        assert!(!requests[0].user.contains("JSON only"));
        assert!(requests[1].user.contains("JSON only"));
    }

    #[tokio::test]
    async fn test_mine_fails_after_reprompt_budget() {
        let backend = Arc::new(MockBackend::new());
        for _ in 0..4 {
            backend.queue_text(r#"{"claims": []}"#);
        }
        let miner = miner_with(backend.clone());
        let brief = fallback_brief("q");

        let err = miner
            .mine(&brief, &TermMap::default(), &EventSender::disabled())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EvigateError::Pipeline(PipelineError::InsufficientClaims { got: 0, need: 12 })
        ));
        assert_eq!(backend.call_count(), 4);
    }

    #[test]
    fn test_enrich_queries_swaps_variants_and_caps() {
        let mut term_map = TermMap::default();
        term_map.search_variants = HashMap::from([(
            "agent builder".to_string(),
            vec![
                "agent platform".to_string(),
                "agent framework".to_string(),
                "agent toolkit".to_string(),
            ],
        )]);

        let queries = vec![
            "agent builder pricing".to_string(),
            "agent builder adoption".to_string(),
        ];
        let enriched = enrich_queries(&queries, &term_map, 5);

        assert_eq!(
            enriched,
            vec![
                "agent builder pricing".to_string(),
                "agent builder adoption".to_string(),
                // Two variants per term, third variant never used; capped at 5.
                "agent platform pricing".to_string(),
                "agent framework pricing".to_string(),
                "agent platform adoption".to_string(),
            ]
        );
    }

    #[test]
    fn test_enrich_queries_ignores_unmatched_terms() {
        let mut term_map = TermMap::default();
        term_map.search_variants =
            HashMap::from([("kubernetes".to_string(), vec!["k8s".to_string()])]);
        let queries = vec!["postgres replication".to_string()];
        assert_eq!(enrich_queries(&queries, &term_map, 5), queries);
    }

    #[test]
    fn test_repair_ticket_leaves_class_a_alone() {
        let mut claim = Claim {
            id: "C-01".to_string(),
            text: "Background fact.".to_string(),
            claim_type: crate::claim::ClaimType::Definition,
            evidence_class: EvidenceClass::A,
            freshness_required: false,
            recency_days: None,
            required_source_classes: Default::default(),
            min_sources: 0,
            independence_rule: None,
            retrieval_ticket: None,
            depends_on: Default::default(),
            section_id: "1".to_string(),
        };
        repair_ticket(
            &mut claim,
            &fallback_brief("q"),
            &TermMap::default(),
            5,
        );
        assert!(claim.retrieval_ticket.is_none());
    }
}
