//! Run orchestration.
//!
//! Drives one question through the whole phase machine: normalize, mine,
//! plan, retrieve, rate, write, then the review loop (plain revision or a
//! targeted research round) until a terminal verdict or the loop budget is
//! spent, and finally verification plus bibliography assembly. Every phase
//! transition lands in `run.json` before the phase executes, so an
//! interrupted run can always be inspected from disk.
//!
//! The review loop is double-bounded: `max_research_rounds` caps targeted
//! re-retrieval batches across the run, `max_review_cycles` caps plain
//! rewrites. A `Research` verdict that cannot run (empty subset, rounds
//! spent) degrades to a rewrite; when both budgets are spent the run still
//! verifies and assembles whatever the draft supports, then reports
//! [`PipelineError::LoopLimitExceeded`]. A run that holds a draft never
//! terminates without output.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts::{Phase, RunArtifacts, RunStatus, RunSummary};
use crate::bibliography::build_bibliography;
use crate::claim::ClaimRegister;
use crate::config::PipelineConfig;
use crate::draft::Draft;
use crate::error::{EvigateError, PipelineError};
use crate::events::EventSender;
use crate::evidence::{EvidencePack, EvidenceStatus};
use crate::gateway::{ModelGateway, Role};
use crate::miner::ClaimMiner;
use crate::rating::EvidenceRater;
use crate::retrieval::{TargetedRetriever, ToolDispatch, route_topic};
use crate::review::{ReviewReport, Verdict};
use crate::reviewing::EditorialReviewer;
use crate::verify::{FinalPaper, FinalVerifier};
use crate::writing::ClaimBoundedWriter;

const AGENT: &str = "Orchestrator";

/// Everything a run produced. Kept in full on the abort path too, so a
/// caller can always show the best available draft and diagnostics.
#[derive(Debug)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub register: Option<ClaimRegister>,
    pub packs: BTreeMap<String, EvidencePack>,
    pub draft: Option<Draft>,
    pub review: Option<ReviewReport>,
    pub paper: Option<FinalPaper>,
    pub review_cycles: u32,
    pub research_rounds: u32,
    /// Surviving B/C claims that never reached fulfilled evidence.
    pub unresolved_claims: Vec<String>,
    pub diagnostics: Vec<String>,
}

/// Terminal result of [`Orchestrator::run`].
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunOutput),
    Aborted {
        output: RunOutput,
        error: EvigateError,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn output(&self) -> &RunOutput {
        match self {
            RunOutcome::Completed(output) => output,
            RunOutcome::Aborted { output, .. } => output,
        }
    }
}

/// Mutable state threaded through one run.
#[derive(Default)]
struct RunState {
    register: Option<ClaimRegister>,
    packs: BTreeMap<String, EvidencePack>,
    removed_claims: BTreeSet<String>,
    draft: Option<Draft>,
    review: Option<ReviewReport>,
    paper: Option<FinalPaper>,
    review_cycles: u32,
    research_rounds: u32,
    diagnostics: Vec<String>,
}

/// Owns the pipeline components for the configured model tiers and drives
/// runs through them.
pub struct Orchestrator {
    config: PipelineConfig,
    miner: ClaimMiner,
    retriever: TargetedRetriever,
    rater: EvidenceRater,
    writer: ClaimBoundedWriter,
    reviewer: EditorialReviewer,
    verifier: FinalVerifier,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<ModelGateway>,
        dispatch: Arc<dyn ToolDispatch>,
    ) -> Self {
        let miner = ClaimMiner::new(
            Arc::clone(&gateway),
            config.tier_for_role(Role::Miner),
            config.retrieval.max_queries_per_claim,
        );
        let retriever = TargetedRetriever::new(dispatch, config.retrieval.clone());
        let rater = EvidenceRater::new(
            Arc::clone(&gateway),
            config.tier_for_role(Role::Rater),
            config.review.min_source_score,
        );
        let writer = ClaimBoundedWriter::new(Arc::clone(&gateway), config.tier_for_role(Role::Writer));
        let reviewer = EditorialReviewer::new(gateway, config.tier_for_role(Role::Reviewer));
        let verifier = FinalVerifier::new(config.review.max_quote_words);
        Self {
            config,
            miner,
            retriever,
            rater,
            writer,
            reviewer,
            verifier,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed at every phase boundary. Cancelling it lets the
    /// in-flight call finish, discards its result, and aborts the run
    /// before the next phase starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one question to a terminal state. Progress streams over
    /// `events`; the caller closes the stream by dropping its sender after
    /// this returns.
    pub async fn run(&self, question: &str, events: &EventSender) -> RunOutcome {
        let artifacts = RunArtifacts::new(&self.config.run.artifacts_dir);
        let mut summary = RunSummary::new(artifacts.run_id(), question, self.config.run.clone());
        let mut state = RunState::default();

        events.status_with(
            AGENT,
            format!("Starting run {}", artifacts.run_id()),
            serde_json::json!({
                "run_id": artifacts.run_id().to_string(),
                "question": question,
            }),
        );

        let result = self
            .drive(question, &artifacts, &mut summary, &mut state, events)
            .await;

        let unresolved_claims = match (&state.paper, &state.register) {
            (Some(paper), _) => paper.unresolved_claims.clone(),
            (None, Some(register)) => {
                unresolved_claim_ids(register, &state.packs, &state.removed_claims)
            }
            (None, None) => Vec::new(),
        };
        summary.unresolved_claims = unresolved_claims.clone();

        let output = RunOutput {
            run_id: artifacts.run_id(),
            register: state.register,
            packs: state.packs,
            draft: state.draft,
            review: state.review,
            paper: state.paper,
            review_cycles: state.review_cycles,
            research_rounds: state.research_rounds,
            unresolved_claims,
            diagnostics: state.diagnostics,
        };

        match result {
            Ok(()) => {
                summary.transition(Phase::Done);
                summary.finish(RunStatus::Completed);
                save_or_warn(artifacts.save_summary(&summary), "run summary");
                events.response(AGENT, "Run completed");
                RunOutcome::Completed(output)
            }
            Err(error) => {
                let status = match &error {
                    EvigateError::Pipeline(
                        PipelineError::Cancelled
                        | PipelineError::LoopLimitExceeded { .. }
                        | PipelineError::InsufficientClaims { .. }
                        | PipelineError::InsufficientEvidence { .. },
                    ) => RunStatus::Aborted,
                    _ => RunStatus::Failed,
                };
                summary.error = Some(error.to_string());
                summary.finish(status);
                save_or_warn(artifacts.save_summary(&summary), "run summary");
                let what = if status == RunStatus::Aborted {
                    "aborted"
                } else {
                    "failed"
                };
                events.error(AGENT, format!("Run {what}: {error}"));
                RunOutcome::Aborted { output, error }
            }
        }
    }

    async fn drive(
        &self,
        question: &str,
        artifacts: &RunArtifacts,
        summary: &mut RunSummary,
        state: &mut RunState,
        events: &EventSender,
    ) -> Result<(), EvigateError> {
        let as_of = self
            .config
            .run
            .as_of_date
            .unwrap_or_else(|| Utc::now().date_naive());

        self.enter_phase(Phase::Normalize, artifacts, summary, state, events)?;
        let (brief, term_map) = self
            .miner
            .normalize(question, self.config.run.length_tier, as_of, events)
            .await?;

        self.enter_phase(Phase::MineClaims, artifacts, summary, state, events)?;
        let register = self.miner.mine(&brief, &term_map, events).await?;
        save_or_warn(artifacts.save_register(&register), "claim register");
        state.register = Some(register.clone());

        self.enter_phase(Phase::PlanRetrieval, artifacts, summary, state, events)?;
        let needing = register.claims_needing_evidence();
        let mut topics: BTreeMap<String, usize> = BTreeMap::new();
        for claim in &needing {
            *topics.entry(route_topic(claim).to_string()).or_default() += 1;
        }
        events.status_with(
            AGENT,
            format!(
                "Retrieval plan: {} tickets across {} topics",
                needing.len(),
                topics.len()
            ),
            serde_json::json!({ "topics": topics }),
        );
        drop(needing);

        self.enter_phase(Phase::Retrieve, artifacts, summary, state, events)?;
        let retrieved = self
            .retriever
            .retrieve(&register, &mut state.packs, None, events)
            .await;
        save_or_warn(artifacts.save_packs(&state.packs), "evidence packs");

        self.enter_phase(Phase::Rate, artifacts, summary, state, events)?;
        let rated = self
            .rater
            .rate(&register, &mut state.packs, None, events)
            .await;
        save_or_warn(artifacts.save_packs(&state.packs), "evidence packs");
        info!(
            sources_added = retrieved.sources_added,
            packs_rated = rated.packs_rated,
            fulfilled = rated.fulfilled,
            "Evidence phase complete"
        );

        // A-claims carry themselves; B/C claims need a fulfilled pack.
        // Nothing usable means there is nothing defensible to write.
        let usable = register
            .surviving_claims(&state.removed_claims)
            .filter(|claim| {
                !claim.requires_evidence()
                    || state
                        .packs
                        .get(&claim.id)
                        .is_some_and(|pack| pack.status == EvidenceStatus::Fulfilled)
            })
            .count();
        if usable == 0 {
            return Err(PipelineError::InsufficientEvidence {
                total: register.claims.len(),
            }
            .into());
        }

        self.enter_phase(Phase::Write, artifacts, summary, state, events)?;
        let draft = self
            .writer
            .write(&register, &state.packs, &state.removed_claims, None, None, events)
            .await?;
        state.draft = Some(draft);

        let mut exhausted = false;
        if self.config.review.enabled {
            loop {
                self.enter_phase(Phase::Review, artifacts, summary, state, events)?;
                let Some(draft) = state.draft.as_ref() else {
                    return Err(PipelineError::MissingArtifact {
                        what: "draft".to_string(),
                    }
                    .into());
                };
                let report = self
                    .reviewer
                    .review(&register, &state.packs, &state.removed_claims, draft, events)
                    .await;
                save_or_warn(artifacts.save_review(&report), "review report");

                let removals = report.claims_to_remove();
                if !removals.is_empty() {
                    events.status_with(
                        AGENT,
                        format!("Review removes {} claims", removals.len()),
                        serde_json::json!({ "claims": removals }),
                    );
                    state.removed_claims.extend(removals);
                }

                let research = effective_research_subset(
                    &report,
                    &register,
                    &state.packs,
                    &state.removed_claims,
                );
                let verdict = report.verdict;
                state.review = Some(report);

                if verdict.is_terminal() {
                    break;
                }

                let run_research = verdict == Verdict::Research
                    && !research.is_empty()
                    && state.research_rounds < self.config.review.max_research_rounds;
                if run_research {
                    state.research_rounds += 1;
                    let subset: BTreeSet<String> =
                        research.iter().map(|(id, _)| id.clone()).collect();
                    events.status_with(
                        AGENT,
                        format!(
                            "Research round {} for {} claims",
                            state.research_rounds,
                            subset.len()
                        ),
                        serde_json::json!({ "claims": subset }),
                    );

                    self.enter_phase(Phase::Retrieve, artifacts, summary, state, events)?;
                    let focused = narrowed_register(
                        &register,
                        &research,
                        self.config.retrieval.max_queries_per_claim,
                    );
                    self.retriever
                        .retrieve(&focused, &mut state.packs, Some(&subset), events)
                        .await;

                    self.enter_phase(Phase::Rate, artifacts, summary, state, events)?;
                    self.rater
                        .rate(&register, &mut state.packs, Some(&subset), events)
                        .await;
                    save_or_warn(artifacts.save_packs(&state.packs), "evidence packs");
                } else {
                    if state.review_cycles >= self.config.review.max_review_cycles {
                        state.diagnostics.push(format!(
                            "review loop exhausted after {} revision cycles and {} research rounds",
                            state.review_cycles, state.research_rounds
                        ));
                        exhausted = true;
                        break;
                    }
                    state.review_cycles += 1;
                }

                self.enter_phase(Phase::Write, artifacts, summary, state, events)?;
                let draft = self
                    .writer
                    .write(
                        &register,
                        &state.packs,
                        &state.removed_claims,
                        state.draft.as_ref(),
                        state.review.as_ref(),
                        events,
                    )
                    .await?;
                state.draft = Some(draft);
            }
        }

        self.enter_phase(Phase::Verify, artifacts, summary, state, events)?;
        let Some(draft) = state.draft.as_ref() else {
            return Err(PipelineError::MissingArtifact {
                what: "draft".to_string(),
            }
            .into());
        };
        let verification =
            self.verifier
                .verify(&register, &state.packs, &state.removed_claims, draft, events);

        self.enter_phase(Phase::BuildBibliography, artifacts, summary, state, events)?;
        let bibliography = build_bibliography(
            &verification.text,
            &state.packs,
            self.config.review.min_source_score,
        );
        let paper = FinalPaper::assemble(verification, bibliography);
        save_or_warn(artifacts.save_paper(&paper), "paper");
        events.response(
            AGENT,
            format!(
                "Paper assembled: {} references, {} unresolved claims",
                paper.bibliography.len(),
                paper.unresolved_claims.len()
            ),
        );
        state.paper = Some(paper);

        if exhausted {
            return Err(PipelineError::LoopLimitExceeded {
                cycles: state.review_cycles,
                rounds: state.research_rounds,
            }
            .into());
        }
        Ok(())
    }

    /// Cancellation gate plus the persisted transition into `phase`.
    fn enter_phase(
        &self,
        phase: Phase,
        artifacts: &RunArtifacts,
        summary: &mut RunSummary,
        state: &RunState,
        events: &EventSender,
    ) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        summary.transition(phase);
        summary.review_cycles = state.review_cycles;
        summary.research_rounds = state.research_rounds;
        summary.removed_claims = state.removed_claims.iter().cloned().collect();
        save_or_warn(artifacts.save_summary(summary), "run summary");
        events.status_with(
            AGENT,
            format!("Phase: {phase}"),
            serde_json::json!({ "phase": phase.as_str() }),
        );
        Ok(())
    }
}

/// Research requests that can still change the outcome: the claim exists,
/// survived editorial removal, and its pack is not already fulfilled.
fn effective_research_subset(
    report: &ReviewReport,
    register: &ClaimRegister,
    packs: &BTreeMap<String, EvidencePack>,
    removed: &BTreeSet<String>,
) -> Vec<(String, Option<String>)> {
    report
        .claims_to_research()
        .into_iter()
        .filter(|(id, _)| {
            register.get(id).is_some()
                && !removed.contains(id)
                && packs
                    .get(id)
                    .is_none_or(|pack| pack.status != EvidenceStatus::Fulfilled)
        })
        .collect()
}

/// Clone of the register with each researched claim's ticket narrowed: the
/// reviewer's refined query runs first, the original queries stay behind it
/// as backup. The canonical register is never touched.
fn narrowed_register(
    register: &ClaimRegister,
    research: &[(String, Option<String>)],
    max_queries: usize,
) -> ClaimRegister {
    let mut focused = register.clone();
    for (id, query) in research {
        let Some(query) = query else { continue };
        let Some(claim) = focused.claims.iter_mut().find(|c| c.id == *id) else {
            continue;
        };
        let Some(ticket) = claim.retrieval_ticket.as_mut() else {
            continue;
        };
        if !ticket.queries.iter().any(|q| q == query) {
            ticket.queries.insert(0, query.clone());
        }
        ticket.queries.truncate(max_queries.max(1));
    }
    focused
}

/// Surviving B/C claims whose packs never reached fulfilled evidence.
fn unresolved_claim_ids(
    register: &ClaimRegister,
    packs: &BTreeMap<String, EvidencePack>,
    removed: &BTreeSet<String>,
) -> Vec<String> {
    register
        .surviving_claims(removed)
        .filter(|claim| claim.requires_evidence())
        .filter(|claim| {
            packs
                .get(&claim.id)
                .is_none_or(|pack| pack.status != EvidenceStatus::Fulfilled)
        })
        .map(|claim| claim.id.clone())
        .collect()
}

fn save_or_warn(result: std::io::Result<()>, what: &str) {
    if let Err(e) = result {
        warn!(error = %e, what, "Failed to persist run artifact");
    }
}
