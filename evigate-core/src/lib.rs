//! # Evigate Core
//!
//! Core library for the Evigate evidence-gated writing pipeline.
//! Provides the run orchestrator, the model gateway, claim mining,
//! targeted retrieval, source rating, claim-bounded writing, editorial
//! review, final verification, and run artifact persistence.

pub mod artifacts;
pub mod bibliography;
pub mod claim;
pub mod config;
pub mod decode;
pub mod draft;
pub mod error;
pub mod events;
pub mod evidence;
pub mod gateway;
pub mod miner;
pub mod orchestrator;
pub mod rating;
pub mod retrieval;
pub mod review;
pub mod reviewing;
pub mod verify;
pub mod writing;

// Re-export commonly used types at the crate root.
pub use artifacts::{Phase, RunArtifacts, RunRecord, RunStatus, RunSummary};
pub use bibliography::{Reference, build_bibliography};
pub use claim::{
    Claim, ClaimRegister, EvidenceClass, LengthTier, QuestionBrief, SourceClass, TermMap,
};
pub use config::{ModelTier, PipelineConfig, RetrievalConfig, ReviewConfig, RunConfig};
pub use draft::Draft;
pub use error::{ConfigError, EvigateError, ModelError, ParseError, PipelineError, Result, ToolError};
pub use events::{EventKind, EventSender, PipelineEvent};
pub use evidence::{EvidencePack, EvidenceStatus, SourceHit, SourceRating};
pub use gateway::{MockBackend, ModelBackend, ModelGateway, ModelReply, ModelRequest, Role};
pub use miner::ClaimMiner;
pub use orchestrator::{Orchestrator, RunOutcome, RunOutput};
pub use rating::EvidenceRater;
pub use retrieval::{
    SearchConstraints, StaticSearchTool, TargetedRetriever, ToolDispatch, Topic,
};
pub use review::{ReviewIssue, ReviewReport, Verdict};
pub use reviewing::EditorialReviewer;
pub use verify::{FinalPaper, FinalVerifier};
pub use writing::ClaimBoundedWriter;
