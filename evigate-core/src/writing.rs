//! Claim-bounded drafting.
//!
//! The writer gets the register plus the evidence verdicts and produces the
//! article text. Class-A claims may be asserted freely; B and C claims are
//! usable only while their pack is fulfilled. Every revision replaces the
//! previous draft wholesale so anchor audits always run against one text.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::claim::ClaimRegister;
use crate::config::{ModelTier, length_policy};
use crate::draft::Draft;
use crate::error::ModelError;
use crate::events::EventSender;
use crate::evidence::{EvidencePack, EvidenceStatus, RatedSource};
use crate::gateway::{ModelGateway, ModelRequest, Role};
use crate::review::ReviewReport;

const AGENT: &str = "ClaimBoundedWriter";

pub struct ClaimBoundedWriter {
    gateway: Arc<ModelGateway>,
    tier: ModelTier,
}

impl ClaimBoundedWriter {
    pub fn new(gateway: Arc<ModelGateway>, tier: ModelTier) -> Self {
        Self { gateway, tier }
    }

    /// Draft the article, or revise the previous draft when a review report
    /// is on record. The returned draft replaces `previous` entirely.
    pub async fn write(
        &self,
        register: &ClaimRegister,
        packs: &BTreeMap<String, EvidencePack>,
        removed: &BTreeSet<String>,
        previous: Option<&Draft>,
        review: Option<&ReviewReport>,
        events: &EventSender,
    ) -> Result<Draft, ModelError> {
        let revision = previous.map_or(1, |d| d.revision + 1);
        let materials = WriterMaterials::collect(register, packs, removed);
        if revision == 1 {
            events.status(
                AGENT,
                format!(
                    "Writing draft from {} usable claims ({} sources on record)",
                    materials.usable_count,
                    materials.source_lines.len()
                ),
            );
        } else {
            events.status(AGENT, format!("Revising draft (revision {revision})"));
        }

        let (system, user) = build_write_prompt(register, &materials, previous, review);
        let request = ModelRequest::new(system, user);
        let reply = self.gateway.complete(Role::Writer, self.tier, &request).await?;

        let draft = Draft::new(reply.text.trim(), revision);
        events.response(
            AGENT,
            format!(
                "Draft revision {}: {} words, {} anchors",
                draft.revision,
                draft.word_count(),
                draft.anchors().len()
            ),
        );
        Ok(draft)
    }
}

/// The claim partition and numbered source list for one write call.
struct WriterMaterials {
    /// `- C-01 (B): text (sources [1], [2])` lines, register order.
    usable_lines: Vec<String>,
    /// `- C-04: reason` lines for everything the draft must not assert.
    unusable_lines: Vec<String>,
    /// `[n] publisher (date): title. url` lines; the counter runs across
    /// all fulfilled packs in register order.
    source_lines: Vec<String>,
    usable_count: usize,
}

impl WriterMaterials {
    fn collect(
        register: &ClaimRegister,
        packs: &BTreeMap<String, EvidencePack>,
        removed: &BTreeSet<String>,
    ) -> Self {
        let mut usable_lines = Vec::new();
        let mut unusable_lines = Vec::new();
        let mut source_lines = Vec::new();
        let mut counter = 0usize;

        for claim in &register.claims {
            if removed.contains(&claim.id) {
                unusable_lines.push(format!("- {}: removed by editorial review", claim.id));
                continue;
            }
            if !claim.requires_evidence() {
                usable_lines.push(format!("- {} (A): {}", claim.id, claim.text));
                continue;
            }
            let pack = packs.get(&claim.id);
            let status = pack.map_or(EvidenceStatus::Pending, |p| p.status);
            if status != EvidenceStatus::Fulfilled {
                let reason = match status {
                    EvidenceStatus::Conflict => "sources conflict",
                    EvidenceStatus::Insufficient => "not enough accepted evidence",
                    _ => "evidence still pending",
                };
                unusable_lines.push(format!("- {}: {reason}", claim.id));
                continue;
            }
            let mut refs = Vec::new();
            for source in pack.iter().flat_map(|p| &p.sources) {
                counter += 1;
                refs.push(format!("[{counter}]"));
                source_lines.push(format_source_line(counter, source));
            }
            let cited = if refs.is_empty() {
                String::new()
            } else {
                format!(" (sources {})", refs.join(", "))
            };
            usable_lines.push(format!(
                "- {} ({:?}): {}{cited}",
                claim.id, claim.evidence_class, claim.text
            ));
        }

        let usable_count = usable_lines.len();
        Self {
            usable_lines,
            unusable_lines,
            source_lines,
            usable_count,
        }
    }
}

fn format_source_line(number: usize, source: &RatedSource) -> String {
    let date = if source.hit.date.trim().is_empty() {
        "n.d."
    } else {
        source.hit.date.trim()
    };
    format!(
        "[{number}] {} ({date}): {}. {}",
        source.hit.publisher, source.hit.title, source.hit.url
    )
}

fn build_write_prompt(
    register: &ClaimRegister,
    materials: &WriterMaterials,
    previous: Option<&Draft>,
    review: Option<&ReviewReport>,
) -> (String, String) {
    let brief = &register.question_brief;
    let policy = length_policy(brief.length_tier);

    let system = "You are a claim-bounded writer. You draft long-form articles where every \
factual statement traces to an approved claim.\n\n\
Hard rules:\n\
1. Assert ONLY the usable claims. Class-A claims need no source; B and C claims are \
listed only when their evidence requirement is met.\n\
2. Anchor every sentence that asserts a definition, number, date, current state, or \
recommendation with its claim id in parentheses, e.g. \"... reduced build times by \
40% (C-05).\"\n\
3. Never assert a claim from the not-usable list, and never invent claims of your own. \
Transitions and framing sentences need no anchor.\n\
4. Do not write a reference list; the bibliography is compiled after verification.\n\n\
Structure: short executive summary, body sections following the outline, an \
implications section, and an explicit \"Limitations\" section covering the claims \
that lacked evidence. Sober, factual register throughout."
        .to_string();

    let outline_text = if register.outline.sections.is_empty() {
        "(no outline; structure the body yourself)".to_string()
    } else {
        register
            .outline
            .sections
            .iter()
            .map(|s| {
                format!(
                    "{}. {} (claims: {})",
                    s.number,
                    s.title,
                    if s.expected_claim_ids.is_empty() {
                        "-".to_string()
                    } else {
                        s.expected_claim_ids.join(", ")
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let unusable_text = if materials.unusable_lines.is_empty() {
        "(none)".to_string()
    } else {
        materials.unusable_lines.join("\n")
    };
    let sources_text = if materials.source_lines.is_empty() {
        "(no sources on record)".to_string()
    } else {
        materials.source_lines.join("\n")
    };

    let mut user = format!(
        r#"Write the article in Markdown.

QUESTION
{core}

AUDIENCE AND TONE
Audience: {audience}
Tone: {tone}
Length: {words_min} to {words_max} words

OUTLINE
{outline_text}

USABLE CLAIMS (anchor each assertion with its id)
{usable}

NOT USABLE (do not assert these)
{unusable_text}

SOURCES ON RECORD
{sources_text}"#,
        core = brief.core_question,
        audience = brief.audience,
        tone = brief.tone,
        words_min = policy.words_min,
        words_max = policy.words_max,
        usable = materials.usable_lines.join("\n"),
    );

    if let Some(report) = review {
        let issue_lines: Vec<String> = report
            .issues
            .iter()
            .map(|issue| {
                let claim = issue
                    .claim_id
                    .as_deref()
                    .map(|id| format!(" [{id}]"))
                    .unwrap_or_default();
                format!(
                    "- {:?}/{:?}{claim}: {}",
                    issue.kind, issue.severity, issue.description
                )
            })
            .collect();
        user.push_str(&format!(
            "\n\nREVIEW NOTES (fix these in the revision)\nVerdict: {:?}\n{}",
            report.verdict,
            if issue_lines.is_empty() {
                "(no itemized issues)".to_string()
            } else {
                issue_lines.join("\n")
            }
        ));
    }
    if let Some(draft) = previous {
        user.push_str(&format!(
            "\n\nPREVIOUS DRAFT (revise it; keep valid anchors, remove invalid ones)\n{}",
            draft.text
        ));
    }
    user.push_str("\n\nWrite the article now.");

    (system, user)
}
