//! Editorial review model: issues, contradictions, and the verdict that
//! drives the revise/research back-edges of the pipeline.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Factual-sounding sentence with no claim anchor.
    Hallucination,
    /// Anchored claim whose evidence pack is not fulfilled.
    ContentGap,
    Contradiction,
    /// Word-count or claim-count band violation.
    BandViolation,
    /// Register claim that never appears in the draft.
    UncoveredClaim,
    Style,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Remove,
    Research,
    Rewrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub claim_id: Option<String>,
    #[serde(default)]
    pub location: String,
    pub suggested_action: SuggestedAction,
    /// Refined query for the gap loop; only meaningful with
    /// `SuggestedAction::Research`.
    #[serde(default)]
    pub research_query: Option<String>,
}

impl ReviewIssue {
    pub fn new(
        kind: IssueKind,
        severity: Severity,
        description: impl Into<String>,
        suggested_action: SuggestedAction,
    ) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            claim_id: None,
            location: String::new(),
            suggested_action,
            research_query: None,
        }
    }

    pub fn with_claim(mut self, claim_id: impl Into<String>) -> Self {
        self.claim_id = Some(claim_id.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.research_query = Some(query.into());
        self
    }
}

/// Two sources making mutually exclusive assertions about the same claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    #[serde(default)]
    pub claim_id: Option<String>,
    #[serde(default)]
    pub source_a: Option<String>,
    #[serde(default)]
    pub source_b: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Zero open issues.
    Approved,
    /// Only minor issues remain; terminal, notes travel with the run.
    ApprovedWithNotes,
    /// Style or structure fixes on the same register and packs.
    Revise,
    /// Named gaps go back through targeted retrieval.
    Research,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Approved | Verdict::ApprovedWithNotes)
    }
}

/// Produced fresh by every reviewer invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// Per-claim: does the draft anchor it with fulfilled (or class-A)
    /// evidence behind it?
    pub coverage: BTreeMap<String, bool>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub unanchored_assertions: Vec<String>,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    pub verdict: Verdict,
    pub confidence: f32,
}

impl ReviewReport {
    /// Claim ids flagged for another research round, with the reviewer's
    /// refined query when one was given. A claim flagged twice keeps its
    /// first position but picks up a query from any later issue.
    pub fn claims_to_research(&self) -> Vec<(String, Option<String>)> {
        let mut out: Vec<(String, Option<String>)> = Vec::new();
        for issue in &self.issues {
            if issue.suggested_action != SuggestedAction::Research {
                continue;
            }
            let Some(id) = &issue.claim_id else { continue };
            match out.iter_mut().find(|(existing, _)| existing == id) {
                Some((_, query)) => {
                    if query.is_none() {
                        *query = issue.research_query.clone();
                    }
                }
                None => out.push((id.clone(), issue.research_query.clone())),
            }
        }
        out
    }

    /// Claims the reviewer wants dropped from the register.
    pub fn claims_to_remove(&self) -> BTreeSet<String> {
        self.issues
            .iter()
            .filter(|i| i.suggested_action == SuggestedAction::Remove)
            .filter_map(|i| i.claim_id.clone())
            .collect()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    pub fn coverage_rate(&self) -> f32 {
        if self.coverage.is_empty() {
            return 0.0;
        }
        let covered = self.coverage.values().filter(|v| **v).count();
        covered as f32 / self.coverage.len() as f32
    }
}

/// Derive the verdict from the issue set. `Approved` requires a clean
/// report; minor-only issue sets terminate as `ApprovedWithNotes`; anything
/// research-flagged outranks a plain revise.
pub fn resolve_verdict(issues: &[ReviewIssue]) -> Verdict {
    if issues.is_empty() {
        return Verdict::Approved;
    }
    let worst = issues
        .iter()
        .map(|i| i.severity)
        .max()
        .unwrap_or(Severity::Minor);
    if worst == Severity::Minor {
        return Verdict::ApprovedWithNotes;
    }
    let needs_research = issues.iter().any(|i| {
        i.suggested_action == SuggestedAction::Research
            && i.claim_id.is_some()
            && i.severity > Severity::Minor
    });
    if needs_research {
        Verdict::Research
    } else {
        Verdict::Revise
    }
}
