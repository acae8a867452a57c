//! Claim model: typed claims with evidence classes, retrieval tickets, and
//! the claim register that is the single source of truth for what the final
//! document may assert.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Canonical claim ID for position `n` (1-based): `C-01`, `C-02`, ...
///
/// Two digits up to 99, then however many it takes.
pub fn claim_id(n: usize) -> String {
    format!("C-{:02}", n)
}

/// What kind of assertion a claim makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    /// "X is ..."
    Definition,
    /// "X works by ..."
    Mechanism,
    /// "X differs from Y in ..."
    Comparison,
    /// "X typically leads to ..."
    Effect,
    /// Numbers, percentages, durations, market figures.
    Quant,
    /// "since", "currently", "as of ..."
    Temporal,
    /// "should", "recommended", "best practice"
    Normative,
}

/// Evidence classes govern how many independent sources a claim needs.
///
/// A is stable background knowledge (no source), B wants one good source,
/// C is source-mandatory with at least two independent sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceClass {
    A,
    B,
    C,
}

impl EvidenceClass {
    /// Minimum accepted sources implied by the class.
    pub fn required_min_sources(&self) -> usize {
        match self {
            EvidenceClass::A => 0,
            EvidenceClass::B => 1,
            EvidenceClass::C => 2,
        }
    }
}

/// Source tiers used for prioritization and rating fallbacks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceClass {
    /// Vendor documentation, standards bodies, government agencies.
    Primary,
    /// Trade press, research institutes, peer-reviewed venues.
    #[default]
    Secondary,
    /// Forums and blogs; practice indicator only.
    Tertiary,
}

/// How "independent sources" is interpreted for a class-C claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndependenceRule {
    #[default]
    DifferentPublishers,
    Any,
}

/// Research order attached to one B/C claim: what to search for and when
/// the evidence requirement counts as met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalTicket {
    pub claim_id: String,
    pub queries: Vec<String>,
    #[serde(default)]
    pub preferred_domains: Vec<String>,
    #[serde(default)]
    pub excluded_domains: Vec<String>,
    #[serde(default = "default_ticket_min_sources")]
    pub min_sources: usize,
    #[serde(default)]
    pub independence_rule: IndependenceRule,
    #[serde(default)]
    pub primary_required: bool,
    #[serde(default)]
    pub recency_days: Option<u32>,
    #[serde(default)]
    pub acceptance_criteria: String,
}

fn default_ticket_min_sources() -> usize {
    1
}

impl RetrievalTicket {
    pub fn new(claim_id: impl Into<String>, queries: Vec<String>) -> Self {
        Self {
            claim_id: claim_id.into(),
            queries,
            preferred_domains: Vec::new(),
            excluded_domains: Vec::new(),
            min_sources: 1,
            independence_rule: IndependenceRule::default(),
            primary_required: false,
            recency_days: None,
            acceptance_criteria: String::new(),
        }
    }
}

/// A single checkable assertion. Claims are created by the miner and never
/// mutated afterwards; the editorial phase may drop a claim (tracked as a
/// removed-id set on run state), never rewrite one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub text: String,
    pub claim_type: ClaimType,
    pub evidence_class: EvidenceClass,
    #[serde(default)]
    pub freshness_required: bool,
    #[serde(default)]
    pub recency_days: Option<u32>,
    #[serde(default)]
    pub required_source_classes: BTreeSet<SourceClass>,
    #[serde(default)]
    pub min_sources: usize,
    #[serde(default)]
    pub independence_rule: Option<IndependenceRule>,
    #[serde(default)]
    pub retrieval_ticket: Option<RetrievalTicket>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub section_id: String,
}

impl Claim {
    /// Enforce the class-derived floors: class A carries no ticket and no
    /// source requirement, class B needs at least one source, class C at
    /// least two plus an independence rule.
    pub fn normalize(&mut self) {
        match self.evidence_class {
            EvidenceClass::A => {
                self.min_sources = 0;
                self.retrieval_ticket = None;
                self.independence_rule = None;
            }
            EvidenceClass::B => {
                self.min_sources = self.min_sources.max(1);
            }
            EvidenceClass::C => {
                self.min_sources = self.min_sources.max(2);
                if self.independence_rule.is_none() {
                    self.independence_rule = Some(IndependenceRule::DifferentPublishers);
                }
            }
        }
        if let Some(ticket) = self.retrieval_ticket.as_mut() {
            ticket.claim_id = self.id.clone();
            ticket.min_sources = ticket.min_sources.max(self.min_sources);
            if let Some(rule) = self.independence_rule {
                ticket.independence_rule = rule;
            }
            if ticket.recency_days.is_none() {
                ticket.recency_days = self.recency_days;
            }
        }
    }

    pub fn requires_evidence(&self) -> bool {
        matches!(self.evidence_class, EvidenceClass::B | EvidenceClass::C)
    }
}

/// Output length buckets; the policy table in the config maps each tier to
/// word bands and claim-count minimums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LengthTier {
    Short,
    #[default]
    Medium,
    Long,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// Normalized question with scope boundaries. Created once at pipeline
/// start; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBrief {
    pub core_question: String,
    pub original_question: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub length_tier: LengthTier,
    #[serde(default)]
    pub as_of_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub freshness_priority: FreshnessPriority,
    #[serde(default)]
    pub scope_in: Vec<String>,
    #[serde(default)]
    pub scope_out: Vec<String>,
}

/// Terminology map that keeps searches on-topic: canonical terms, their
/// synonyms and search variants, and keywords whose hits should be avoided.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermMap {
    #[serde(default)]
    pub canonical_terms: Vec<String>,
    #[serde(default)]
    pub synonyms: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    #[serde(default)]
    pub disambiguation_notes: Vec<String>,
    #[serde(default)]
    pub search_variants: HashMap<String, Vec<String>>,
}

impl TermMap {
    /// All distinct search strings for one canonical term, in stable order:
    /// the term itself, then synonyms, then search variants.
    pub fn search_terms_for(&self, canonical: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut push = |term: &str, out: &mut Vec<String>| {
            let key = term.to_lowercase();
            if !term.is_empty() && seen.insert(key) {
                out.push(term.to_string());
            }
        };
        push(canonical, &mut out);
        for syn in self.synonyms.get(canonical).into_iter().flatten() {
            push(syn, &mut out);
        }
        for variant in self.search_variants.get(canonical).into_iter().flatten() {
            push(variant, &mut out);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub number: String,
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub expected_claim_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    #[serde(default)]
    pub sections: Vec<OutlineSection>,
}

/// Counts and structural issues from validating a freshly mined register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub total_claims: usize,
    pub a_claims: usize,
    pub b_claims: usize,
    pub c_claims: usize,
}

/// The central register: brief + term map + outline + ordered claims.
///
/// Owned by the orchestrator for the run's lifetime and read-shared by every
/// downstream phase. Never mutated after mining; editorial removals live in
/// a separate removed-id set so the audit trail stays intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRegister {
    pub question_brief: QuestionBrief,
    pub term_map: TermMap,
    pub outline: Outline,
    pub claims: Vec<Claim>,
}

impl ClaimRegister {
    pub fn get(&self, claim_id: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.id == claim_id)
    }

    /// B/C claims in register order.
    pub fn claims_needing_evidence(&self) -> Vec<&Claim> {
        self.claims.iter().filter(|c| c.requires_evidence()).collect()
    }

    pub fn c_claims(&self) -> Vec<&Claim> {
        self.claims
            .iter()
            .filter(|c| c.evidence_class == EvidenceClass::C)
            .collect()
    }

    /// Claims that survive the editorial removals.
    pub fn surviving_claims<'a>(
        &'a self,
        removed: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a Claim> {
        self.claims.iter().filter(move |c| !removed.contains(&c.id))
    }

    /// Check the register against the tier minimums. B/C claims without a
    /// usable ticket are structural issues; the miner repairs them before
    /// the register leaves the mining phase.
    pub fn validate(&self, min_total_claims: usize, min_c_claims: usize) -> RegisterReport {
        let mut issues = Vec::new();

        let total = self.claims.len();
        let a_claims = self
            .claims
            .iter()
            .filter(|c| c.evidence_class == EvidenceClass::A)
            .count();
        let b_claims = self
            .claims
            .iter()
            .filter(|c| c.evidence_class == EvidenceClass::B)
            .count();
        let c_claims = self
            .claims
            .iter()
            .filter(|c| c.evidence_class == EvidenceClass::C)
            .count();

        if total < min_total_claims {
            issues.push(format!("too few claims: {total} < {min_total_claims}"));
        }
        if c_claims < min_c_claims {
            issues.push(format!("too few class-C claims: {c_claims} < {min_c_claims}"));
        }
        for claim in &self.claims {
            if claim.requires_evidence() {
                let has_queries = claim
                    .retrieval_ticket
                    .as_ref()
                    .is_some_and(|t| !t.queries.is_empty());
                if !has_queries {
                    issues.push(format!(
                        "claim {} (class {:?}) has no retrieval ticket",
                        claim.id, claim.evidence_class
                    ));
                }
            }
        }

        RegisterReport {
            valid: issues.is_empty(),
            issues,
            total_claims: total,
            a_claims,
            b_claims,
            c_claims,
        }
    }
}
