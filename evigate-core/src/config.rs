//! Configuration for the Evigate pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> `evigate.toml` ->
//! environment variables prefixed with `EVIGATE_` (nested keys split on
//! `__`, e.g. `EVIGATE_REVIEW__MAX_REVIEW_CYCLES=1`).

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::claim::LengthTier;
use crate::error::ConfigError;

/// Cost tier for a model slot. Every logical role has one slot per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Premium,
    #[default]
    Budget,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Premium => write!(f, "premium"),
            ModelTier::Budget => write!(f, "budget"),
        }
    }
}

/// One concrete model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSlot {
    /// Provider name: "anthropic" or "openai" (covers OpenAI-compatible APIs).
    pub provider: String,
    /// Model identifier (e.g., "claude-sonnet-4-5", "gpt-5-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

impl ModelSlot {
    fn anthropic(model: &str, max_tokens: usize) -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: model.to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            max_tokens,
            temperature: 0.7,
        }
    }

    fn openai(model: &str, max_tokens: usize) -> Self {
        Self {
            provider: "openai".to_string(),
            model: model.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens,
            temperature: 0.7,
        }
    }
}

/// Premium and budget slots for one logical role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleModels {
    pub premium: ModelSlot,
    pub budget: ModelSlot,
}

impl RoleModels {
    pub fn slot(&self, tier: ModelTier) -> &ModelSlot {
        match tier {
            ModelTier::Premium => &self.premium,
            ModelTier::Budget => &self.budget,
        }
    }
}

/// Retry behavior for transient model/tool errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Model slots per role plus the shared request policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub miner: RoleModels,
    pub rater: RoleModels,
    pub writer: RoleModels,
    pub reviewer: RoleModels,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-request timeout applied around every completion call.
    pub request_timeout_secs: u64,
    /// Oversized completions are truncated at a sentence boundary near this cap.
    pub max_response_chars: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        // Mixed-provider defaults: reasoning-heavy roles on Anthropic,
        // long-form writing on OpenAI.
        Self {
            miner: RoleModels {
                premium: ModelSlot::anthropic("claude-sonnet-4-5", 8192),
                budget: ModelSlot::anthropic("claude-haiku-4-5", 8192),
            },
            rater: RoleModels {
                premium: ModelSlot::anthropic("claude-sonnet-4-5", 4096),
                budget: ModelSlot::anthropic("claude-haiku-4-5", 4096),
            },
            writer: RoleModels {
                premium: ModelSlot::openai("gpt-5", 16_384),
                budget: ModelSlot::openai("gpt-5-mini", 16_384),
            },
            reviewer: RoleModels {
                premium: ModelSlot::anthropic("claude-sonnet-4-5", 8192),
                budget: ModelSlot::anthropic("claude-haiku-4-5", 8192),
            },
            retry: RetryConfig::default(),
            request_timeout_secs: 120,
            max_response_chars: 60_000,
        }
    }
}

/// Budgets for the retrieval phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Per-claim cap on collected sources.
    pub max_sources_per_claim: usize,
    /// Hard per-run ceiling; tickets beyond it are truncated.
    pub max_sources_per_run: usize,
    /// Concurrent ticket workers (clamped to 1..=8).
    pub concurrency: usize,
    /// Results requested per query.
    pub results_per_query: usize,
    /// Queries kept per ticket after term-map enrichment.
    pub max_queries_per_claim: usize,
    pub tool_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_sources_per_claim: 6,
            max_sources_per_run: 60,
            concurrency: 4,
            results_per_query: 5,
            max_queries_per_claim: 5,
            tool_timeout_secs: 20,
        }
    }
}

impl RetrievalConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, 8)
    }
}

/// Review and gap-loop policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Disables the editorial review phase entirely (draft goes straight
    /// to verification).
    pub enabled: bool,
    pub max_review_cycles: u32,
    pub max_research_rounds: u32,
    /// Acceptance threshold on the 0-15 rating scale.
    pub min_source_score: u8,
    /// Longest allowed verbatim quotation, in words.
    pub max_quote_words: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_review_cycles: 2,
            max_research_rounds: 3,
            min_source_score: 10,
            max_quote_words: 25,
        }
    }
}

/// Per-run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub length_tier: LengthTier,
    /// Default tier for every role; individual roles can override.
    pub tier: ModelTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner_tier: Option<ModelTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rater_tier: Option<ModelTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_tier: Option<ModelTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_tier: Option<ModelTier>,
    /// As-of date for freshness checks; defaults to today at run start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of_date: Option<chrono::NaiveDate>,
    /// Directory that receives one subdirectory per run.
    pub artifacts_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            length_tier: LengthTier::Medium,
            tier: ModelTier::Premium,
            miner_tier: None,
            rater_tier: None,
            writer_tier: None,
            reviewer_tier: None,
            as_of_date: None,
            artifacts_dir: PathBuf::from("runs"),
        }
    }
}

/// Top-level configuration for an Evigate pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub models: ModelsConfig,
    pub retrieval: RetrievalConfig,
    pub review: ReviewConfig,
    pub run: RunConfig,
}

impl PipelineConfig {
    /// Load configuration with layered precedence (highest to lowest):
    /// environment (`EVIGATE_`), the given TOML file (or `evigate.toml` in
    /// the working directory), built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

        match config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: path.to_path_buf(),
                    });
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let default_path = Path::new("evigate.toml");
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        figment = figment.merge(Env::prefixed("EVIGATE_").split("__"));

        figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Validate the config and return human-readable warnings. Empty means
    /// clean; warnings do not block a run.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.retrieval.concurrency != self.retrieval.effective_concurrency() {
            warnings.push(format!(
                "retrieval.concurrency ({}) outside 1..=8; clamped to {}",
                self.retrieval.concurrency,
                self.retrieval.effective_concurrency()
            ));
        }
        if self.review.min_source_score > 15 {
            warnings.push(format!(
                "review.min_source_score ({}) exceeds the 0-15 rating scale",
                self.review.min_source_score
            ));
        }
        if self.review.max_review_cycles == 0 {
            warnings.push("review.max_review_cycles is 0; any non-approved review aborts the run".to_string());
        }
        if self.retrieval.results_per_query == 0 {
            warnings.push("retrieval.results_per_query is 0; retrieval cannot collect sources".to_string());
        }
        for (role, models) in [
            ("miner", &self.models.miner),
            ("rater", &self.models.rater),
            ("writer", &self.models.writer),
            ("reviewer", &self.models.reviewer),
        ] {
            for (tier, slot) in [("premium", &models.premium), ("budget", &models.budget)] {
                if !(0.0..=2.0).contains(&slot.temperature) {
                    warnings.push(format!(
                        "models.{role}.{tier}.temperature ({}) outside 0.0-2.0",
                        slot.temperature
                    ));
                }
            }
        }
        warnings
    }

    pub fn tier_for_role(&self, role: crate::gateway::Role) -> ModelTier {
        use crate::gateway::Role;
        let specific = match role {
            Role::Miner => self.run.miner_tier,
            Role::Rater => self.run.rater_tier,
            Role::Writer => self.run.writer_tier,
            Role::Reviewer => self.run.reviewer_tier,
        };
        specific.unwrap_or(self.run.tier)
    }
}

/// Word and claim-count bands for one output length tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthPolicy {
    pub words_min: usize,
    pub words_max: usize,
    pub min_claims: usize,
    pub min_c_claims: usize,
}

/// Policy table keyed by output-length tier.
pub fn length_policy(tier: LengthTier) -> LengthPolicy {
    match tier {
        LengthTier::Short => LengthPolicy {
            words_min: 600,
            words_max: 1200,
            min_claims: 8,
            min_c_claims: 2,
        },
        LengthTier::Medium => LengthPolicy {
            words_min: 1200,
            words_max: 2500,
            min_claims: 12,
            min_c_claims: 4,
        },
        LengthTier::Long => LengthPolicy {
            words_min: 2500,
            words_max: 4500,
            min_claims: 15,
            min_c_claims: 5,
        },
        LengthTier::Deep => LengthPolicy {
            words_min: 4500,
            words_max: 8000,
            min_claims: 20,
            min_c_claims: 7,
        },
    }
}
