//! Run artifact persistence.
//!
//! Every run leaves an auditable directory behind:
//!
//! ```text
//! <artifacts_dir>/<run_id>/
//!   run.json                  summary: question, settings, phase, counters
//!   claim_register.json       brief, term map, outline, mined claims
//!   evidence/<claim_id>.json  one rated evidence pack per B/C claim
//!   review_report.json        the most recent editorial review
//!   paper.md                  verified text with the rendered references
//!   bibliography.json         structured reference entries
//! ```
//!
//! Writes go to a `.tmp` sibling first and are renamed into place, so a
//! crash mid-write never leaves a half-written artifact. `run.json` is
//! rewritten after every phase transition; an aborted run still shows how
//! far it got.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bibliography::{Reference, render_bibliography};
use crate::claim::ClaimRegister;
use crate::config::RunConfig;
use crate::evidence::EvidencePack;
use crate::review::ReviewReport;
use crate::verify::FinalPaper;

const RUN_FILE: &str = "run.json";
const REGISTER_FILE: &str = "claim_register.json";
const REVIEW_FILE: &str = "review_report.json";
const PAPER_FILE: &str = "paper.md";
const BIBLIOGRAPHY_FILE: &str = "bibliography.json";
const EVIDENCE_DIR: &str = "evidence";

/// Pipeline phase, recorded in the run summary after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Normalize,
    MineClaims,
    PlanRetrieval,
    Retrieve,
    Rate,
    Write,
    Review,
    Verify,
    BuildBibliography,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Normalize => "normalize",
            Phase::MineClaims => "mine_claims",
            Phase::PlanRetrieval => "plan_retrieval",
            Phase::Retrieve => "retrieve",
            Phase::Rate => "rate",
            Phase::Write => "write",
            Phase::Review => "review",
            Phase::Verify => "verify",
            Phase::BuildBibliography => "build_bibliography",
            Phase::Done => "done",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// Cancelled from outside; partial artifacts remain valid.
    Aborted,
    Failed,
}

/// The `run.json` summary. Small on purpose: enough to list runs and to
/// tell where an interrupted one stopped, without loading the full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub question: String,
    pub settings: RunConfig,
    pub phase: Phase,
    pub status: RunStatus,
    pub review_cycles: u32,
    pub research_rounds: u32,
    #[serde(default)]
    pub removed_claims: Vec<String>,
    #[serde(default)]
    pub unresolved_claims: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, question: impl Into<String>, settings: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            question: question.into(),
            settings,
            phase: Phase::Normalize,
            status: RunStatus::Running,
            review_cycles: 0,
            research_rounds: 0,
            removed_claims: Vec::new(),
            unresolved_claims: Vec::new(),
            error: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Record a phase transition.
    pub fn transition(&mut self, phase: Phase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    /// Close the run with a terminal status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        self.finished_at = Some(self.updated_at);
    }

    /// Close the run as failed, keeping the error for the audit trail.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.finish(RunStatus::Failed);
    }
}

/// Everything a finished (or interrupted) run left on disk.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub summary: RunSummary,
    pub register: Option<ClaimRegister>,
    pub packs: BTreeMap<String, EvidencePack>,
    pub review: Option<ReviewReport>,
    pub bibliography: Vec<Reference>,
    pub paper: Option<String>,
}

/// Handle on one run's artifact directory.
pub struct RunArtifacts {
    run_id: Uuid,
    dir: PathBuf,
}

impl RunArtifacts {
    /// Allocate a fresh run directory under `base_dir`. Nothing touches the
    /// filesystem until the first save.
    pub fn new(base_dir: &Path) -> Self {
        Self::open(base_dir, Uuid::new_v4())
    }

    /// Handle on an existing run directory.
    pub fn open(base_dir: &Path, run_id: Uuid) -> Self {
        let dir = base_dir.join(run_id.to_string());
        Self { run_id, dir }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_summary(&self, summary: &RunSummary) -> io::Result<()> {
        atomic_write_json(&self.dir.join(RUN_FILE), summary)
    }

    pub fn save_register(&self, register: &ClaimRegister) -> io::Result<()> {
        atomic_write_json(&self.dir.join(REGISTER_FILE), register)
    }

    pub fn save_pack(&self, pack: &EvidencePack) -> io::Result<()> {
        let path = self
            .dir
            .join(EVIDENCE_DIR)
            .join(format!("{}.json", pack.claim_id));
        atomic_write_json(&path, pack)
    }

    pub fn save_packs(&self, packs: &BTreeMap<String, EvidencePack>) -> io::Result<()> {
        for pack in packs.values() {
            self.save_pack(pack)?;
        }
        Ok(())
    }

    pub fn save_review(&self, report: &ReviewReport) -> io::Result<()> {
        atomic_write_json(&self.dir.join(REVIEW_FILE), report)
    }

    /// Write `paper.md` (verified text plus the rendered reference section)
    /// and `bibliography.json` together.
    pub fn save_paper(&self, paper: &FinalPaper) -> io::Result<()> {
        let mut rendered = paper.text.trim_end().to_string();
        if !paper.bibliography.is_empty() {
            rendered.push_str("\n\n");
            rendered.push_str(&render_bibliography(&paper.bibliography));
        }
        rendered.push('\n');
        atomic_write(&self.dir.join(PAPER_FILE), rendered.as_bytes())?;
        atomic_write_json(&self.dir.join(BIBLIOGRAPHY_FILE), &paper.bibliography)
    }

    /// Load a run back for audit. The summary is required; every other
    /// artifact is optional so interrupted runs load too. Corrupt files are
    /// an error, not a skip.
    pub fn load(base_dir: &Path, run_id: Uuid) -> io::Result<RunRecord> {
        let artifacts = Self::open(base_dir, run_id);
        let dir = &artifacts.dir;

        let summary: RunSummary = load_json(&dir.join(RUN_FILE))?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no run.json under {}", dir.display()),
            )
        })?;

        let register = load_json(&dir.join(REGISTER_FILE))?;
        let review = load_json(&dir.join(REVIEW_FILE))?;
        let bibliography: Vec<Reference> =
            load_json(&dir.join(BIBLIOGRAPHY_FILE))?.unwrap_or_default();

        let mut packs = BTreeMap::new();
        let evidence_dir = dir.join(EVIDENCE_DIR);
        if evidence_dir.exists() {
            for entry in fs::read_dir(&evidence_dir)?.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json")
                    && let Some(pack) = load_json::<EvidencePack>(&path)?
                {
                    packs.insert(pack.claim_id.clone(), pack);
                }
            }
        }

        let paper_path = dir.join(PAPER_FILE);
        let paper = if paper_path.exists() {
            Some(fs::read_to_string(&paper_path)?)
        } else {
            None
        };

        Ok(RunRecord {
            summary,
            register,
            packs,
            review,
            bibliography,
            paper,
        })
    }

    /// Summaries of every run under `base_dir`, newest activity first.
    /// Unreadable entries are skipped; listing never fails.
    pub fn list_runs(base_dir: &Path) -> Vec<RunSummary> {
        let mut summaries = Vec::new();
        if let Ok(entries) = fs::read_dir(base_dir) {
            for entry in entries.flatten() {
                let run_file = entry.path().join(RUN_FILE);
                if let Ok(data) = fs::read_to_string(&run_file)
                    && let Ok(summary) = serde_json::from_str::<RunSummary>(&data)
                {
                    summaries.push(summary);
                }
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }
}

/// Serialize to pretty JSON and write atomically.
fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write to a `.tmp` sibling, then rename onto the target. Creates parent
/// directories as needed.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// `Ok(None)` when the file does not exist; `InvalidData` when it exists
/// but does not parse.
fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{
        Claim, ClaimType, EvidenceClass, LengthTier, Outline, QuestionBrief, RetrievalTicket,
        SourceClass, TermMap,
    };
    use crate::evidence::{EvidenceStatus, RatedSource, SourceHit, SourceRating};
    use crate::review::Verdict;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn register_fixture() -> ClaimRegister {
        let mut claim = Claim {
            id: "C-01".to_string(),
            text: "Write-ahead logging persists intent before data pages".to_string(),
            claim_type: ClaimType::Mechanism,
            evidence_class: EvidenceClass::B,
            freshness_required: false,
            recency_days: None,
            required_source_classes: Default::default(),
            min_sources: 1,
            independence_rule: None,
            retrieval_ticket: Some(RetrievalTicket::new(
                "C-01",
                vec!["write-ahead log durability".to_string()],
            )),
            depends_on: Default::default(),
            section_id: "1".to_string(),
        };
        claim.normalize();
        ClaimRegister {
            question_brief: QuestionBrief {
                core_question: "How do write-ahead logs provide durability?".to_string(),
                original_question: "explain WAL durability".to_string(),
                audience: "engineers".to_string(),
                tone: "technical".to_string(),
                length_tier: LengthTier::Short,
                as_of_date: None,
                freshness_priority: Default::default(),
                scope_in: Vec::new(),
                scope_out: Vec::new(),
            },
            term_map: TermMap::default(),
            outline: Outline::default(),
            claims: vec![claim],
        }
    }

    fn pack_fixture(claim_id: &str, url: &str) -> EvidencePack {
        let mut hit = SourceHit::new(
            "WAL Internals",
            url,
            "Postgres Wiki",
            SourceClass::Primary,
            "The log is flushed before the page",
        );
        hit.date = "2024-03-01".to_string();
        let mut pack = EvidencePack::new(claim_id);
        pack.sources.push(RatedSource {
            hit,
            paraphrased_extract: "Log records reach disk before the pages they cover".to_string(),
            rating: Some(SourceRating {
                authority: 3,
                independence: 2,
                recency: 2,
                specificity: 3,
                consensus: 2,
            }),
        });
        pack.status = EvidenceStatus::Fulfilled;
        pack
    }

    fn review_fixture() -> ReviewReport {
        ReviewReport {
            coverage: [("C-01".to_string(), true)].into(),
            contradictions: Vec::new(),
            unanchored_assertions: Vec::new(),
            issues: Vec::new(),
            verdict: Verdict::Approved,
            confidence: 0.9,
        }
    }

    fn paper_fixture() -> FinalPaper {
        FinalPaper {
            text: "The log reaches disk before the pages it covers (C-01).".to_string(),
            bibliography: vec![Reference {
                number: 1,
                source_id: "S-deadbeef".to_string(),
                publisher: "Postgres Wiki".to_string(),
                author: String::new(),
                title: "WAL Internals".to_string(),
                date: "2024-03-01".to_string(),
                url: "https://wiki.example/wal".to_string(),
                cited_for: vec!["C-01".to_string()],
            }],
            unresolved_claims: Vec::new(),
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_full_run_round_trip() {
        let dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::new(dir.path());

        let summary = RunSummary::new(
            artifacts.run_id(),
            "How do write-ahead logs provide durability?",
            RunConfig::default(),
        );
        artifacts.save_summary(&summary).unwrap();
        artifacts.save_register(&register_fixture()).unwrap();
        artifacts
            .save_pack(&pack_fixture("C-01", "https://wiki.example/wal"))
            .unwrap();
        artifacts
            .save_pack(&pack_fixture("C-02", "https://docs.example/fsync"))
            .unwrap();
        artifacts.save_review(&review_fixture()).unwrap();
        artifacts.save_paper(&paper_fixture()).unwrap();

        let record = RunArtifacts::load(dir.path(), artifacts.run_id()).unwrap();
        assert_eq!(record.summary.question, summary.question);
        assert_eq!(record.summary.phase, Phase::Normalize);
        assert_eq!(record.register, Some(register_fixture()));
        assert_eq!(record.packs.len(), 2);
        assert!(record.packs.contains_key("C-01"));
        assert!(record.packs.contains_key("C-02"));
        assert_eq!(record.review.map(|r| r.verdict), Some(Verdict::Approved));
        assert_eq!(record.bibliography.len(), 1);
        assert!(record.paper.is_some());
    }

    #[test]
    fn test_interrupted_run_loads_partially() {
        let dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::new(dir.path());

        let mut summary = RunSummary::new(artifacts.run_id(), "q", RunConfig::default());
        summary.transition(Phase::Retrieve);
        summary.finish(RunStatus::Aborted);
        artifacts.save_summary(&summary).unwrap();

        let record = RunArtifacts::load(dir.path(), artifacts.run_id()).unwrap();
        assert_eq!(record.summary.phase, Phase::Retrieve);
        assert_eq!(record.summary.status, RunStatus::Aborted);
        assert!(record.summary.finished_at.is_some());
        assert!(record.register.is_none());
        assert!(record.packs.is_empty());
        assert!(record.review.is_none());
        assert!(record.bibliography.is_empty());
        assert!(record.paper.is_none());
    }

    #[test]
    fn test_load_unknown_run_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = RunArtifacts::load(dir.path(), Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_paper_md_carries_reference_section() {
        let dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::new(dir.path());
        artifacts.save_paper(&paper_fixture()).unwrap();

        let text = fs::read_to_string(artifacts.dir().join("paper.md")).unwrap();
        assert!(text.starts_with("The log reaches disk before the pages it covers (C-01)."));
        assert!(text.contains("## References"));
        assert!(text.contains("[1] Postgres Wiki (2024). WAL Internals. https://wiki.example/wal"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_evidence_packs_land_under_evidence_dir() {
        let dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::new(dir.path());
        artifacts
            .save_pack(&pack_fixture("C-07", "https://wiki.example/wal"))
            .unwrap();
        assert!(artifacts.dir().join("evidence").join("C-07.json").exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::new(dir.path());
        let summary = RunSummary::new(artifacts.run_id(), "q", RunConfig::default());
        artifacts.save_summary(&summary).unwrap();

        assert!(artifacts.dir().join("run.json").exists());
        assert!(!artifacts.dir().join("run.tmp").exists());
    }

    #[test]
    fn test_list_runs_newest_activity_first() {
        let dir = TempDir::new().unwrap();

        let older = RunArtifacts::new(dir.path());
        let mut older_summary = RunSummary::new(older.run_id(), "older", RunConfig::default());
        older_summary.updated_at = Utc::now() - chrono::Duration::minutes(10);
        older.save_summary(&older_summary).unwrap();

        let newer = RunArtifacts::new(dir.path());
        let newer_summary = RunSummary::new(newer.run_id(), "newer", RunConfig::default());
        newer.save_summary(&newer_summary).unwrap();

        let listed = RunArtifacts::list_runs(dir.path());
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].question, "newer");
        assert_eq!(listed[1].question, "older");
    }

    #[test]
    fn test_list_runs_on_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let listed = RunArtifacts::list_runs(&dir.path().join("nope"));
        assert!(listed.is_empty());
    }

    #[test]
    fn test_corrupt_register_is_an_error_on_load() {
        let dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::new(dir.path());
        let summary = RunSummary::new(artifacts.run_id(), "q", RunConfig::default());
        artifacts.save_summary(&summary).unwrap();

        fs::create_dir_all(artifacts.dir()).unwrap();
        fs::write(artifacts.dir().join("claim_register.json"), "not json").unwrap();

        let err = RunArtifacts::load(dir.path(), artifacts.run_id()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_summary_fail_records_error() {
        let mut summary = RunSummary::new(Uuid::new_v4(), "q", RunConfig::default());
        summary.fail("miner returned no claims");
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.error.as_deref(), Some("miner returned no claims"));
        assert!(summary.finished_at.is_some());
    }
}
