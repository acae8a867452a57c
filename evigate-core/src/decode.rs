//! Permissive decoding of model-produced JSON into typed payloads.
//!
//! This module is the only place that treats model text as JSON. It
//! extracts the outermost object, decodes into lenient raw structs
//! (field-name aliases, unknown fields ignored, near-valid enum values
//! mapped), and converts those into core types. Optional fields get
//! explicit defaults; claim text is never invented or defaulted.
//!
//! # Note on byte indexing
//! JSON extraction uses `str::find`/`str::rfind`, which return byte
//! offsets. Slicing at those positions is safe because `{` and `}` are
//! single-byte ASCII, so the offsets always land on UTF-8 boundaries.

use crate::claim::{
    Claim, ClaimType, EvidenceClass, IndependenceRule, Outline, OutlineSection, QuestionBrief,
    RetrievalTicket, SourceClass, TermMap,
};
use crate::error::ParseError;
use crate::evidence::SourceRating;
use crate::review::{
    Contradiction, IssueKind, ReviewIssue, ReviewReport, Severity, SuggestedAction, Verdict,
    resolve_verdict,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Slice the outermost JSON object out of a model reply.
///
/// Models often wrap payloads in prose or markdown fences; taking the
/// span from the first `{` to the last `}` handles both.
pub fn extract_json(reply: &str) -> Result<&str, ParseError> {
    let start = reply.find('{').ok_or(ParseError::NoJsonFound)?;
    let end = reply.rfind('}').ok_or(ParseError::NoJsonFound)?;
    if end < start {
        return Err(ParseError::NoJsonFound);
    }
    Ok(&reply[start..=end])
}

// ---------------------------------------------------------------------------
// Question brief + term map (normalize call)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawBriefPayload {
    #[serde(default, alias = "brief")]
    question_brief: Option<RawBrief>,
    #[serde(default, alias = "terms")]
    term_map: Option<RawTermMap>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBrief {
    #[serde(default, alias = "question", alias = "normalized_question")]
    core_question: Option<String>,
    #[serde(default, alias = "target_audience")]
    audience: Option<String>,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default, alias = "freshness")]
    freshness_priority: Option<String>,
    #[serde(default, alias = "in_scope")]
    scope_in: Vec<String>,
    #[serde(default, alias = "out_of_scope")]
    scope_out: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTermMap {
    #[serde(default, alias = "terms")]
    canonical_terms: Vec<String>,
    #[serde(default)]
    synonyms: HashMap<String, Vec<String>>,
    #[serde(default, alias = "exclude", alias = "excluded_keywords")]
    negative_keywords: Vec<String>,
    #[serde(default, alias = "notes")]
    disambiguation_notes: Vec<String>,
    #[serde(default, alias = "variants")]
    search_variants: HashMap<String, Vec<String>>,
}

/// Decode the normalize-call reply into a brief and term map.
///
/// `original_question` is carried into the brief verbatim; a missing
/// core question falls back to it rather than failing the call.
pub fn decode_brief(
    reply: &str,
    original_question: &str,
) -> Result<(QuestionBrief, TermMap), ParseError> {
    let json = extract_json(reply)?;
    let payload: RawBriefPayload = serde_json::from_str(json)?;

    // Tolerate a flattened reply where the brief fields sit at top level.
    let raw_brief = match payload.question_brief {
        Some(brief) => brief,
        None => serde_json::from_str::<RawBrief>(json).unwrap_or_default(),
    };

    let brief = QuestionBrief {
        core_question: raw_brief
            .core_question
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| original_question.to_string()),
        original_question: original_question.to_string(),
        audience: raw_brief.audience.unwrap_or_else(|| "general".to_string()),
        tone: raw_brief.tone.unwrap_or_else(|| "neutral".to_string()),
        length_tier: Default::default(),
        as_of_date: None,
        freshness_priority: raw_brief
            .freshness_priority
            .as_deref()
            .map(parse_freshness)
            .unwrap_or_default(),
        scope_in: raw_brief.scope_in,
        scope_out: raw_brief.scope_out,
    };

    let raw_terms = payload.term_map.unwrap_or_default();
    let term_map = TermMap {
        canonical_terms: raw_terms.canonical_terms,
        synonyms: raw_terms.synonyms,
        negative_keywords: raw_terms.negative_keywords,
        disambiguation_notes: raw_terms.disambiguation_notes,
        search_variants: raw_terms.search_variants,
    };

    Ok((brief, term_map))
}

fn parse_freshness(value: &str) -> crate::claim::FreshnessPriority {
    use crate::claim::FreshnessPriority;
    match value.to_lowercase().as_str() {
        "high" | "critical" => FreshnessPriority::High,
        "low" | "none" => FreshnessPriority::Low,
        _ => FreshnessPriority::Medium,
    }
}

// ---------------------------------------------------------------------------
// Outline + claims (mine call)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawRegisterPayload {
    #[serde(default)]
    outline: Option<RawOutline>,
    #[serde(default, alias = "claim_list")]
    claims: Vec<RawClaim>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOutline {
    Wrapped { sections: Vec<RawSection> },
    Flat(Vec<RawSection>),
}

#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    number: Option<serde_json::Value>,
    #[serde(alias = "heading", alias = "name")]
    title: String,
    #[serde(default, alias = "purpose")]
    goal: Option<String>,
    #[serde(default, alias = "claims", alias = "claim_ids")]
    expected_claim_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaim {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "claim_text", alias = "statement", alias = "claim")]
    text: Option<String>,
    #[serde(default, alias = "type", alias = "kind")]
    claim_type: Option<String>,
    #[serde(default, alias = "class", alias = "evidence")]
    evidence_class: Option<String>,
    #[serde(default, alias = "needs_freshness")]
    freshness_required: bool,
    #[serde(default)]
    recency_days: Option<u32>,
    #[serde(default)]
    min_sources: Option<usize>,
    #[serde(default)]
    independence_rule: Option<String>,
    #[serde(default, alias = "source_classes")]
    required_source_classes: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, alias = "section")]
    section_id: Option<String>,
    #[serde(default, alias = "search_queries")]
    queries: Vec<String>,
    #[serde(default, alias = "ticket")]
    retrieval_ticket: Option<RawTicket>,
}

#[derive(Debug, Deserialize)]
struct RawTicket {
    #[serde(default, alias = "search_queries")]
    queries: Vec<String>,
    #[serde(default)]
    preferred_domains: Vec<String>,
    #[serde(default)]
    excluded_domains: Vec<String>,
    #[serde(default)]
    min_sources: Option<usize>,
    #[serde(default)]
    primary_required: bool,
    #[serde(default)]
    recency_days: Option<u32>,
    #[serde(default, alias = "criteria")]
    acceptance_criteria: Option<String>,
}

/// Decode the mine-call reply into an outline and renumbered claims.
///
/// Claim IDs from the model are untrusted; claims are renumbered
/// `C-01`, `C-02`, ... in reply order and `depends_on` plus the
/// outline's expected IDs are remapped. Entries without claim text are
/// dropped. An empty result is not an error here; the miner decides
/// whether to re-prompt.
pub fn decode_register(reply: &str) -> Result<(Outline, Vec<Claim>), ParseError> {
    let json = extract_json(reply)?;
    let payload: RawRegisterPayload = serde_json::from_str(json)?;

    let raw_claims: Vec<RawClaim> = payload
        .claims
        .into_iter()
        .filter(|c| c.text.as_deref().is_some_and(|t| !t.trim().is_empty()))
        .collect();

    // Old model-assigned ID -> final renumbered ID.
    let mut id_map: HashMap<String, String> = HashMap::new();
    for (idx, raw) in raw_claims.iter().enumerate() {
        let new_id = crate::claim::claim_id(idx + 1);
        if let Some(old) = &raw.id {
            id_map.insert(old.clone(), new_id);
        }
    }

    let mut claims = Vec::with_capacity(raw_claims.len());
    for (idx, raw) in raw_claims.into_iter().enumerate() {
        let id = crate::claim::claim_id(idx + 1);
        let text = raw.text.unwrap_or_default();

        let claim_type = raw
            .claim_type
            .as_deref()
            .map(parse_claim_type)
            .unwrap_or(ClaimType::Definition);
        let evidence_class = raw
            .evidence_class
            .as_deref()
            .map(parse_evidence_class)
            .unwrap_or(EvidenceClass::B);

        let queries = match &raw.retrieval_ticket {
            Some(ticket) if !ticket.queries.is_empty() => ticket.queries.clone(),
            _ => raw.queries.clone(),
        };
        let retrieval_ticket = if queries.is_empty() {
            None
        } else {
            let mut ticket = RetrievalTicket::new(id.clone(), queries);
            if let Some(raw_ticket) = raw.retrieval_ticket {
                ticket.preferred_domains = raw_ticket.preferred_domains;
                ticket.excluded_domains = raw_ticket.excluded_domains;
                if let Some(min) = raw_ticket.min_sources {
                    ticket.min_sources = min;
                }
                ticket.primary_required = raw_ticket.primary_required;
                ticket.recency_days = raw_ticket.recency_days;
                ticket.acceptance_criteria = raw_ticket.acceptance_criteria.unwrap_or_default();
            }
            Some(ticket)
        };

        let depends_on: BTreeSet<String> = raw
            .depends_on
            .iter()
            .filter_map(|old| id_map.get(old).cloned())
            .filter(|dep| *dep != id)
            .collect();

        let required_source_classes: BTreeSet<SourceClass> = raw
            .required_source_classes
            .iter()
            .filter_map(|s| parse_source_class(s))
            .collect();

        let mut claim = Claim {
            id,
            text,
            claim_type,
            evidence_class,
            freshness_required: raw.freshness_required,
            recency_days: raw.recency_days,
            required_source_classes,
            min_sources: raw.min_sources.unwrap_or(1),
            independence_rule: raw.independence_rule.as_deref().map(parse_independence_rule),
            retrieval_ticket,
            depends_on,
            section_id: raw.section_id.unwrap_or_default(),
        };
        claim.normalize();
        claims.push(claim);
    }

    let sections = match payload.outline {
        Some(RawOutline::Wrapped { sections }) | Some(RawOutline::Flat(sections)) => sections,
        None => Vec::new(),
    };
    let outline = Outline {
        sections: sections
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| OutlineSection {
                number: raw
                    .number
                    .map(render_section_number)
                    .unwrap_or_else(|| (idx + 1).to_string()),
                title: raw.title,
                goal: raw.goal.unwrap_or_default(),
                expected_claim_ids: raw
                    .expected_claim_ids
                    .iter()
                    .filter_map(|old| id_map.get(old).cloned())
                    .collect(),
            })
            .collect(),
    };

    Ok((outline, claims))
}

/// Section numbers arrive as strings ("2.1") or bare integers (2).
fn render_section_number(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn parse_claim_type(value: &str) -> ClaimType {
    match value.to_lowercase().as_str() {
        "definition" | "def" => ClaimType::Definition,
        "mechanism" | "how" => ClaimType::Mechanism,
        "comparison" | "compare" | "contrast" => ClaimType::Comparison,
        "effect" | "impact" | "consequence" => ClaimType::Effect,
        "quant" | "quantitative" | "statistic" | "number" => ClaimType::Quant,
        "temporal" | "time" | "current" | "trend" => ClaimType::Temporal,
        "normative" | "recommendation" | "judgment" => ClaimType::Normative,
        other => {
            debug!(claim_type = other, "Unknown claim type, defaulting to definition");
            ClaimType::Definition
        }
    }
}

fn parse_evidence_class(value: &str) -> EvidenceClass {
    match value.trim().to_uppercase().as_str() {
        "A" => EvidenceClass::A,
        "C" => EvidenceClass::C,
        _ => EvidenceClass::B,
    }
}

fn parse_source_class(value: &str) -> Option<SourceClass> {
    match value.to_lowercase().as_str() {
        "primary" => Some(SourceClass::Primary),
        "secondary" => Some(SourceClass::Secondary),
        "tertiary" => Some(SourceClass::Tertiary),
        _ => None,
    }
}

fn parse_independence_rule(value: &str) -> IndependenceRule {
    match value.to_lowercase().as_str() {
        "any" | "none" => IndependenceRule::Any,
        _ => IndependenceRule::DifferentPublishers,
    }
}

// ---------------------------------------------------------------------------
// Ratings (rate call)
// ---------------------------------------------------------------------------

/// One decoded per-source rating from the rater reply.
#[derive(Debug, Clone)]
pub struct DecodedRating {
    pub source_id: String,
    pub paraphrased_extract: Option<String>,
    pub rating: SourceRating,
}

/// Typed result of a rater-reply decode.
#[derive(Debug, Clone, Default)]
pub struct RatingsPayload {
    pub ratings: Vec<DecodedRating>,
    pub conflicts: Vec<Contradiction>,
}

#[derive(Debug, Deserialize)]
struct RawRatingsPayload {
    #[serde(default, alias = "sources", alias = "scores")]
    ratings: Vec<RawRating>,
    #[serde(default, alias = "contradictions")]
    conflicts: Vec<RawConflict>,
}

#[derive(Debug, Deserialize)]
struct RawRating {
    #[serde(default, alias = "id", alias = "source")]
    source_id: Option<String>,
    #[serde(default, alias = "paraphrase", alias = "summary")]
    paraphrased_extract: Option<String>,
    #[serde(default)]
    authority: Option<i64>,
    #[serde(default)]
    independence: Option<i64>,
    #[serde(default)]
    recency: Option<i64>,
    #[serde(default)]
    specificity: Option<i64>,
    #[serde(default)]
    consensus: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawConflict {
    #[serde(default, alias = "claim")]
    claim_id: Option<String>,
    #[serde(default, alias = "source_1")]
    source_a: Option<String>,
    #[serde(default, alias = "source_2")]
    source_b: Option<String>,
    #[serde(default, alias = "reason", alias = "detail")]
    description: Option<String>,
}

/// Decode the rater reply.
///
/// Entries without a source ID, or with no rating dimension at all, are
/// skipped so the deterministic fallback can rate them instead. Present
/// dimensions are clamped to 0..=3; absent ones score 0 (never inflates).
pub fn decode_ratings(reply: &str) -> Result<RatingsPayload, ParseError> {
    let json = extract_json(reply)?;
    let payload: RawRatingsPayload = serde_json::from_str(json)?;

    let mut ratings = Vec::new();
    for raw in payload.ratings {
        let Some(source_id) = raw.source_id.filter(|id| !id.trim().is_empty()) else {
            debug!("Skipping rating entry without source id");
            continue;
        };
        let dims = [
            raw.authority,
            raw.independence,
            raw.recency,
            raw.specificity,
            raw.consensus,
        ];
        if dims.iter().all(|d| d.is_none()) {
            debug!(source_id = %source_id, "Skipping rating entry without dimensions");
            continue;
        }
        ratings.push(DecodedRating {
            source_id,
            paraphrased_extract: raw
                .paraphrased_extract
                .filter(|p| !p.trim().is_empty()),
            rating: SourceRating {
                authority: clamp_dim(raw.authority),
                independence: clamp_dim(raw.independence),
                recency: clamp_dim(raw.recency),
                specificity: clamp_dim(raw.specificity),
                consensus: clamp_dim(raw.consensus),
            },
        });
    }

    let conflicts = payload.conflicts.into_iter().map(raw_conflict_into).collect();

    Ok(RatingsPayload { ratings, conflicts })
}

fn clamp_dim(value: Option<i64>) -> u8 {
    value.unwrap_or(0).clamp(0, 3) as u8
}

fn raw_conflict_into(raw: RawConflict) -> Contradiction {
    Contradiction {
        claim_id: raw.claim_id,
        source_a: raw.source_a,
        source_b: raw.source_b,
        description: raw.description.unwrap_or_else(|| "sources disagree".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Review (review call)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawReviewPayload {
    #[serde(default, alias = "claim_coverage")]
    coverage: HashMap<String, bool>,
    #[serde(default)]
    contradictions: Vec<RawConflict>,
    #[serde(default, alias = "unanchored")]
    unanchored_assertions: Vec<String>,
    #[serde(default, alias = "problems", alias = "findings")]
    issues: Vec<RawIssue>,
    #[serde(default, alias = "decision", alias = "recommendation")]
    verdict: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default, alias = "type", alias = "category")]
    kind: Option<String>,
    #[serde(default, alias = "level")]
    severity: Option<String>,
    #[serde(default, alias = "detail", alias = "message", alias = "issue")]
    description: Option<String>,
    #[serde(default, alias = "claim")]
    claim_id: Option<String>,
    #[serde(default, alias = "where", alias = "section")]
    location: Option<String>,
    #[serde(default, alias = "action")]
    suggested_action: Option<String>,
    #[serde(default, alias = "query", alias = "refined_query")]
    research_query: Option<String>,
}

/// Decode the reviewer reply into a [`ReviewReport`].
///
/// A missing or unknown verdict resolves from the issue list via
/// [`resolve_verdict`], so a reply that lists issues but forgets the
/// verdict still drives the loop correctly.
pub fn decode_review(reply: &str) -> Result<ReviewReport, ParseError> {
    let json = extract_json(reply)?;
    let payload: RawReviewPayload = serde_json::from_str(json)?;

    let issues: Vec<ReviewIssue> = payload.issues.into_iter().map(raw_issue_into).collect();

    let verdict = payload
        .verdict
        .as_deref()
        .and_then(parse_verdict)
        .unwrap_or_else(|| resolve_verdict(&issues));

    Ok(ReviewReport {
        coverage: payload.coverage.into_iter().collect::<BTreeMap<_, _>>(),
        contradictions: payload
            .contradictions
            .into_iter()
            .map(raw_conflict_into)
            .collect(),
        unanchored_assertions: payload.unanchored_assertions,
        issues,
        verdict,
        confidence: payload.confidence.unwrap_or(0.5).clamp(0.0, 1.0) as f32,
    })
}

fn raw_issue_into(raw: RawIssue) -> ReviewIssue {
    let kind = raw
        .kind
        .as_deref()
        .map(parse_issue_kind)
        .unwrap_or(IssueKind::Style);
    let severity = raw
        .severity
        .as_deref()
        .map(parse_severity)
        .unwrap_or(Severity::Minor);
    let suggested_action = raw
        .suggested_action
        .as_deref()
        .and_then(parse_action)
        .unwrap_or_else(|| default_action_for(kind));

    let mut issue = ReviewIssue::new(
        kind,
        severity,
        raw.description.unwrap_or_default(),
        suggested_action,
    );
    issue.claim_id = raw.claim_id.filter(|c| !c.trim().is_empty());
    issue.location = raw.location.unwrap_or_default();
    issue.research_query = raw.research_query.filter(|q| !q.trim().is_empty());
    issue
}

fn parse_issue_kind(value: &str) -> IssueKind {
    match value.to_lowercase().as_str() {
        "hallucination" | "unsupported" | "fabrication" => IssueKind::Hallucination,
        "content_gap" | "gap" | "missing_evidence" => IssueKind::ContentGap,
        "contradiction" | "conflict" => IssueKind::Contradiction,
        "band_violation" | "length" | "word_count" => IssueKind::BandViolation,
        "uncovered_claim" | "uncovered" | "missing_claim" => IssueKind::UncoveredClaim,
        _ => IssueKind::Style,
    }
}

fn parse_severity(value: &str) -> Severity {
    match value.to_lowercase().as_str() {
        "critical" | "blocker" => Severity::Critical,
        "major" | "high" => Severity::Major,
        _ => Severity::Minor,
    }
}

fn parse_action(value: &str) -> Option<SuggestedAction> {
    match value.to_lowercase().as_str() {
        "remove" | "delete" | "drop" => Some(SuggestedAction::Remove),
        "research" | "retrieve" | "find_sources" => Some(SuggestedAction::Research),
        "rewrite" | "revise" | "edit" => Some(SuggestedAction::Rewrite),
        _ => None,
    }
}

fn default_action_for(kind: IssueKind) -> SuggestedAction {
    match kind {
        IssueKind::Hallucination => SuggestedAction::Remove,
        IssueKind::ContentGap => SuggestedAction::Research,
        _ => SuggestedAction::Rewrite,
    }
}

fn parse_verdict(value: &str) -> Option<Verdict> {
    match value.to_lowercase().replace([' ', '-'], "_").as_str() {
        "approved" | "approve" | "pass" => Some(Verdict::Approved),
        "approved_with_notes" | "minor_notes" => Some(Verdict::ApprovedWithNotes),
        "revise" | "rewrite" | "needs_revision" => Some(Verdict::Revise),
        "research" | "needs_research" | "needs_evidence" => Some(Verdict::Research),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"claims\": []}\n```\nDone.";
        assert_eq!(extract_json(reply).unwrap(), "{\"claims\": []}");
    }

    #[test]
    fn test_extract_json_bare_object() {
        assert_eq!(extract_json("{\"a\": 1}").unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_missing_is_error() {
        assert!(matches!(
            extract_json("no payload here"),
            Err(ParseError::NoJsonFound)
        ));
        assert!(matches!(extract_json("} {"), Err(ParseError::NoJsonFound)));
    }

    #[test]
    fn test_decode_brief_with_aliases_and_fallbacks() {
        let reply = r#"{
            "brief": {"question": "  ", "target_audience": "engineers", "freshness": "high"},
            "terms": {"terms": ["Rust"], "variants": {"Rust": ["rustlang"]}}
        }"#;
        let (brief, terms) = decode_brief(reply, "why rust?").unwrap();
        assert_eq!(brief.core_question, "why rust?");
        assert_eq!(brief.original_question, "why rust?");
        assert_eq!(brief.audience, "engineers");
        assert_eq!(brief.freshness_priority, crate::claim::FreshnessPriority::High);
        assert_eq!(terms.canonical_terms, vec!["Rust"]);
        assert_eq!(terms.search_variants["Rust"], vec!["rustlang"]);
    }

    #[test]
    fn test_decode_brief_flattened_shape() {
        let reply = r#"{"core_question": "what is WAL?", "tone": "practical"}"#;
        let (brief, _) = decode_brief(reply, "wal?").unwrap();
        assert_eq!(brief.core_question, "what is WAL?");
        assert_eq!(brief.tone, "practical");
        assert_eq!(brief.audience, "general");
    }

    #[test]
    fn test_decode_register_renumbers_and_remaps() {
        let reply = r#"{
            "outline": {"sections": [
                {"number": 1, "title": "Intro", "claims": ["x2"]}
            ]},
            "claims": [
                {"id": "x1", "claim_text": "Alpha is a thing.", "type": "definition", "class": "A"},
                {"id": "x2", "text": "Beta grew 40% in 2024.", "type": "quantitative", "class": "C",
                 "depends_on": ["x1", "ghost"], "queries": ["beta growth 2024", "beta market share"]}
            ]
        }"#;
        let (outline, claims) = decode_register(reply).unwrap();

        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].id, "C-01");
        assert_eq!(claims[1].id, "C-02");
        assert_eq!(claims[1].claim_type, ClaimType::Quant);
        assert_eq!(claims[1].evidence_class, EvidenceClass::C);
        // Dangling "ghost" reference dropped, "x1" remapped.
        assert_eq!(
            claims[1].depends_on,
            BTreeSet::from(["C-01".to_string()])
        );
        // Class C normalization ran: two sources minimum, ticket synced.
        assert_eq!(claims[1].min_sources, 2);
        let ticket = claims[1].retrieval_ticket.as_ref().unwrap();
        assert_eq!(ticket.claim_id, "C-02");
        assert_eq!(ticket.min_sources, 2);

        assert_eq!(outline.sections[0].number, "1");
        assert_eq!(outline.sections[0].expected_claim_ids, vec!["C-02"]);
    }

    #[test]
    fn test_decode_register_drops_textless_claims() {
        let reply = r#"{"claims": [
            {"id": "a", "text": "   "},
            {"id": "b", "statement": "Real claim."}
        ]}"#;
        let (_, claims) = decode_register(reply).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].text, "Real claim.");
        assert_eq!(claims[0].id, "C-01");
    }

    #[test]
    fn test_decode_register_unknown_enum_values_fall_back() {
        let reply = r#"{"claims": [
            {"text": "Something.", "type": "speculative", "class": "Z"}
        ]}"#;
        let (_, claims) = decode_register(reply).unwrap();
        assert_eq!(claims[0].claim_type, ClaimType::Definition);
        assert_eq!(claims[0].evidence_class, EvidenceClass::B);
    }

    #[test]
    fn test_decode_ratings_clamps_and_skips() {
        let reply = r#"{
            "ratings": [
                {"source_id": "S-11111111", "authority": 9, "independence": -2,
                 "recency": 2, "specificity": 3, "consensus": 1, "paraphrase": "says X"},
                {"source_id": "S-22222222"},
                {"authority": 3}
            ],
            "conflicts": [{"claim": "C-02", "source_1": "S-11111111", "source_2": "S-33333333"}]
        }"#;
        let payload = decode_ratings(reply).unwrap();

        assert_eq!(payload.ratings.len(), 1);
        let decoded = &payload.ratings[0];
        assert_eq!(decoded.source_id, "S-11111111");
        assert_eq!(decoded.rating.authority, 3);
        assert_eq!(decoded.rating.independence, 0);
        assert_eq!(decoded.rating.total(), 9);
        assert_eq!(decoded.paraphrased_extract.as_deref(), Some("says X"));

        assert_eq!(payload.conflicts.len(), 1);
        assert_eq!(payload.conflicts[0].claim_id.as_deref(), Some("C-02"));
        assert_eq!(payload.conflicts[0].description, "sources disagree");
    }

    #[test]
    fn test_decode_review_full_payload() {
        let reply = r#"```json
        {
            "coverage": {"C-01": true, "C-02": false},
            "issues": [
                {"type": "content_gap", "level": "major", "claim": "C-02",
                 "detail": "No source covers the 2024 figure.",
                 "query": "beta adoption survey 2024"}
            ],
            "verdict": "research",
            "confidence": 0.82
        }
        ```"#;
        let report = decode_review(reply).unwrap();

        assert_eq!(report.verdict, Verdict::Research);
        assert_eq!(report.coverage.len(), 2);
        assert!((report.confidence - 0.82).abs() < 1e-6);
        let issue = &report.issues[0];
        assert_eq!(issue.kind, IssueKind::ContentGap);
        assert_eq!(issue.severity, Severity::Major);
        assert_eq!(issue.suggested_action, SuggestedAction::Research);
        assert_eq!(issue.research_query.as_deref(), Some("beta adoption survey 2024"));
    }

    #[test]
    fn test_decode_review_without_verdict_resolves_from_issues() {
        let reply = r#"{"issues": [{"type": "style", "detail": "passive voice"}]}"#;
        let report = decode_review(reply).unwrap();
        // One minor style issue: approved with notes, not a revise loop.
        assert_eq!(report.verdict, Verdict::ApprovedWithNotes);
        assert_eq!(report.issues[0].suggested_action, SuggestedAction::Rewrite);
    }

    #[test]
    fn test_decode_review_default_actions_by_kind() {
        let reply = r#"{"issues": [
            {"type": "hallucination", "level": "critical", "detail": "invented quote"},
            {"type": "content_gap", "level": "major", "detail": "thin evidence"}
        ]}"#;
        let report = decode_review(reply).unwrap();
        assert_eq!(report.issues[0].suggested_action, SuggestedAction::Remove);
        assert_eq!(report.issues[1].suggested_action, SuggestedAction::Research);
        assert_eq!(report.verdict, Verdict::Revise);
    }
}
