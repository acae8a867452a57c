//! Targeted retrieval: runs each claim's ticket against search tools on a
//! bounded worker pool and accumulates evidence packs.
//!
//! The engine never talks to a concrete tool; it routes a claim to a
//! [`Topic`] and hands the query to a [`ToolDispatch`] implementation.
//! Concrete tools and the registry that owns them live in the tools crate
//! and are wired in at startup.

use crate::claim::{Claim, ClaimRegister, ClaimType, RetrievalTicket};
use crate::config::RetrievalConfig;
use crate::error::ToolError;
use crate::events::EventSender;
use crate::evidence::{EvidencePack, EvidenceStatus, SourceHit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const AGENT: &str = "TargetedRetriever";

/// Tool retries per query before the query is abandoned.
const TOOL_RETRIES: u32 = 2;
const TOOL_BACKOFF_MS: u64 = 250;

/// Broad source category a tool serves; claims are routed to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Papers, studies, quantitative findings.
    Scientific,
    /// Releases, announcements, anything with a date attached.
    News,
    /// Practitioner experience, comparisons, opinions.
    Community,
    /// Definitions and settled background.
    Encyclopedia,
    General,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Scientific => "scientific",
            Topic::News => "news",
            Topic::Community => "community",
            Topic::Encyclopedia => "encyclopedia",
            Topic::General => "general",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-query constraints passed through to tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConstraints {
    pub results_per_query: usize,
    #[serde(default)]
    pub preferred_domains: Vec<String>,
    #[serde(default)]
    pub excluded_domains: Vec<String>,
    #[serde(default)]
    pub recency_days: Option<u32>,
}

/// Seam between the retrieval engine and concrete search tools.
///
/// The tools crate implements this over its registry; tests implement it
/// with [`StaticSearchTool`].
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn search(
        &self,
        topic: Topic,
        query: &str,
        constraints: &SearchConstraints,
    ) -> Result<Vec<SourceHit>, ToolError>;
}

/// Route a claim to the topic whose tools are most likely to carry
/// acceptable evidence for it. Cue words beat the type-based fallback.
pub fn route_topic(claim: &Claim) -> Topic {
    const SCIENTIFIC_CUES: &[&str] = &[
        "study", "research", "paper", "percent", "benchmark", "dataset", "machine learning",
        "neural", "llm",
    ];
    const NEWS_CUES: &[&str] = &[
        "current", "release", "version", "launched", "announced", "as of", "2024", "2025", "2026",
    ];
    const COMMUNITY_CUES: &[&str] = &[
        "experience", "comparison", "compared", "alternative", " vs ", "adoption",
    ];

    let text = claim.text.to_lowercase();
    if SCIENTIFIC_CUES.iter().any(|cue| text.contains(cue)) {
        return Topic::Scientific;
    }
    if NEWS_CUES.iter().any(|cue| text.contains(cue)) {
        return Topic::News;
    }
    if COMMUNITY_CUES.iter().any(|cue| text.contains(cue)) {
        return Topic::Community;
    }

    match claim.claim_type {
        ClaimType::Definition => Topic::Encyclopedia,
        ClaimType::Quant => Topic::Scientific,
        ClaimType::Temporal => Topic::News,
        ClaimType::Comparison => Topic::Community,
        _ => Topic::General,
    }
}

/// Counters for one retrieval pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSummary {
    pub tickets_run: usize,
    pub sources_added: usize,
    pub fulfilled: usize,
    pub insufficient: usize,
}

/// Executes retrieval tickets on a bounded worker pool.
pub struct TargetedRetriever {
    dispatch: Arc<dyn ToolDispatch>,
    config: RetrievalConfig,
}

impl TargetedRetriever {
    pub fn new(dispatch: Arc<dyn ToolDispatch>, config: RetrievalConfig) -> Self {
        Self { dispatch, config }
    }

    /// Run tickets for every claim needing evidence (optionally restricted
    /// to `subset`), merging results into `packs`.
    ///
    /// Each worker exclusively owns its claim's pack until completion, so
    /// no lock sits around the map. Re-running over a subset is idempotent:
    /// already-satisfied packs break out before their first query and
    /// duplicate hits de-duplicate by source id.
    pub async fn retrieve(
        &self,
        register: &ClaimRegister,
        packs: &mut BTreeMap<String, EvidencePack>,
        subset: Option<&BTreeSet<String>>,
        events: &EventSender,
    ) -> RetrievalSummary {
        // The global budget counts sources already held so gap-loop
        // re-runs cannot blow past the per-run ceiling.
        let held: usize = packs.values().map(|p| p.sources.len()).sum();
        let budget = Arc::new(AtomicUsize::new(
            self.config.max_sources_per_run.saturating_sub(held),
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        let mut workers: JoinSet<(String, EvidencePack, usize)> = JoinSet::new();

        for claim in register.claims_needing_evidence() {
            if let Some(subset) = subset
                && !subset.contains(&claim.id)
            {
                continue;
            }

            let mut pack = packs
                .remove(&claim.id)
                .unwrap_or_else(|| EvidencePack::new(claim.id.clone()));

            let Some(ticket) = claim.retrieval_ticket.clone() else {
                pack.status = EvidenceStatus::Insufficient;
                pack.notes = "no retrieval ticket".to_string();
                events.error(AGENT, format!("{}: no retrieval ticket", claim.id));
                packs.insert(claim.id.clone(), pack);
                continue;
            };

            let topic = route_topic(claim);
            let claim_id = claim.id.clone();
            let claim_text = claim.text.clone();
            let dispatch = Arc::clone(&self.dispatch);
            let semaphore = Arc::clone(&semaphore);
            let budget = Arc::clone(&budget);
            let events = events.clone();
            let config = self.config.clone();

            workers.spawn(async move {
                // Acquire only fails if the semaphore is closed, which we
                // never do; return the pack untouched in that case.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (claim_id, pack, 0);
                };
                run_ticket(
                    dispatch, topic, claim_id, claim_text, ticket, pack, config, budget, events,
                )
                .await
            });
        }

        let mut summary = RetrievalSummary::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((claim_id, pack, added)) => {
                    summary.tickets_run += 1;
                    summary.sources_added += added;
                    match pack.status {
                        EvidenceStatus::Fulfilled => summary.fulfilled += 1,
                        _ => summary.insufficient += 1,
                    }
                    packs.insert(claim_id, pack);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Retrieval worker failed");
                    events.error(AGENT, format!("retrieval worker failed: {e}"));
                }
            }
        }
        summary
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_ticket(
    dispatch: Arc<dyn ToolDispatch>,
    topic: Topic,
    claim_id: String,
    claim_text: String,
    ticket: RetrievalTicket,
    mut pack: EvidencePack,
    config: RetrievalConfig,
    budget: Arc<AtomicUsize>,
    events: EventSender,
) -> (String, EvidencePack, usize) {
    let preview: String = claim_text.chars().take(50).collect();
    events.status(AGENT, format!("Researching {claim_id}: {preview}..."));

    let constraints = SearchConstraints {
        results_per_query: config.results_per_query,
        preferred_domains: ticket.preferred_domains.clone(),
        excluded_domains: ticket.excluded_domains.clone(),
        recency_days: ticket.recency_days,
    };

    let mut added = 0usize;
    let mut ceiling_hit = false;

    for query in &ticket.queries {
        if pack.sources.len() >= ticket.min_sources
            || pack.sources.len() >= config.max_sources_per_claim
        {
            break;
        }

        let want = config
            .results_per_query
            .min(config.max_sources_per_claim - pack.sources.len());
        let granted = reserve(&budget, want);
        if granted == 0 {
            ceiling_hit = true;
            events.error(AGENT, format!("{claim_id}: global source ceiling reached"));
            break;
        }

        events.tool_call(
            AGENT,
            format!("Query: {query}"),
            serde_json::json!({"topic": topic, "query": query, "claim_id": claim_id}),
        );

        let Some(hits) =
            search_with_retry(dispatch.as_ref(), topic, query, &constraints, &events, &claim_id)
                .await
        else {
            release(&budget, granted);
            continue;
        };

        events.tool_result(
            AGENT,
            format!("{} hits for {claim_id}", hits.len()),
            serde_json::json!({"hits": hits.len(), "claim_id": claim_id}),
        );

        let mut used = 0usize;
        for hit in hits {
            if used >= granted || pack.sources.len() >= config.max_sources_per_claim {
                break;
            }
            if ticket
                .excluded_domains
                .iter()
                .any(|domain| hit.url.contains(domain.as_str()))
            {
                continue;
            }
            if pack.add_hit(hit) {
                used += 1;
                added += 1;
            }
        }
        release(&budget, granted - used);
    }

    let found = pack.sources.len();
    pack.status = if found >= ticket.min_sources {
        EvidenceStatus::Fulfilled
    } else {
        EvidenceStatus::Insufficient
    };
    pack.notes = if ceiling_hit {
        format!("global source ceiling reached after {found} sources")
    } else {
        format!("found {found} of {} required sources", ticket.min_sources)
    };

    events.status_with(
        AGENT,
        format!("{claim_id}: {found} sources"),
        serde_json::json!({"claim_id": claim_id, "sources_found": found, "status": pack.status}),
    );

    (claim_id, pack, added)
}

async fn search_with_retry(
    dispatch: &dyn ToolDispatch,
    topic: Topic,
    query: &str,
    constraints: &SearchConstraints,
    events: &EventSender,
    claim_id: &str,
) -> Option<Vec<SourceHit>> {
    let mut attempt: u32 = 0;
    loop {
        match dispatch.search(topic, query, constraints).await {
            Ok(hits) => return Some(hits),
            Err(e) if e.is_retryable() && attempt < TOOL_RETRIES => {
                let backoff_ms = TOOL_BACKOFF_MS * (attempt as u64 + 1);
                tracing::warn!(
                    claim_id,
                    query,
                    attempt = attempt + 1,
                    backoff_ms,
                    error = %e,
                    "Tool call failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
            Err(e) => {
                events.error(AGENT, format!("{claim_id}: tool error: {e}"));
                return None;
            }
        }
    }
}

/// Take up to `want` units from the shared budget; returns how many were
/// actually granted.
fn reserve(budget: &AtomicUsize, want: usize) -> usize {
    let mut granted = 0;
    let _ = budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
        granted = want.min(remaining);
        Some(remaining - granted)
    });
    granted
}

fn release(budget: &AtomicUsize, unused: usize) {
    if unused > 0 {
        budget.fetch_add(unused, Ordering::SeqCst);
    }
}

/// Scripted dispatch for tests: canned hits per query with a default
/// fallback, optional scripted failures, and a call log.
pub struct StaticSearchTool {
    by_query: std::sync::Mutex<std::collections::HashMap<String, Vec<SourceHit>>>,
    default_hits: std::sync::Mutex<Vec<SourceHit>>,
    calls: std::sync::Mutex<Vec<(Topic, String)>>,
    fail_times: AtomicUsize,
}

impl StaticSearchTool {
    pub fn new() -> Self {
        Self {
            by_query: std::sync::Mutex::new(std::collections::HashMap::new()),
            default_hits: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::Mutex::new(Vec::new()),
            fail_times: AtomicUsize::new(0),
        }
    }

    /// Hits returned for any query without a scripted entry.
    pub fn with_default_hits(hits: Vec<SourceHit>) -> Self {
        let tool = Self::new();
        *tool.default_hits.lock().unwrap() = hits;
        tool
    }

    /// Script hits for one exact query.
    pub fn insert(&self, query: &str, hits: Vec<SourceHit>) {
        self.by_query.lock().unwrap().insert(query.to_string(), hits);
    }

    /// Fail the next `n` calls with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.fail_times.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Topic, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for StaticSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatch for StaticSearchTool {
    async fn search(
        &self,
        topic: Topic,
        query: &str,
        constraints: &SearchConstraints,
    ) -> Result<Vec<SourceHit>, ToolError> {
        self.calls.lock().unwrap().push((topic, query.to_string()));

        if self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ToolError::RequestFailed {
                id: "static".to_string(),
                message: "scripted failure".to_string(),
            });
        }

        let mut hits = self
            .by_query
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.default_hits.lock().unwrap().clone());
        hits.truncate(constraints.results_per_query);
        Ok(hits)
    }
}
