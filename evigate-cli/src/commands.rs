//! Subcommand handlers: run, show, list, and config management.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use evigate_core::artifacts::{RunArtifacts, RunRecord, RunStatus};
use evigate_core::claim::LengthTier;
use evigate_core::config::{ModelTier, PipelineConfig};
use evigate_core::events::{EventKind, EventSender, PipelineEvent};
use evigate_core::evidence::EvidenceStatus;
use evigate_core::gateway::ModelGateway;
use evigate_core::orchestrator::{Orchestrator, RunOutcome};
use evigate_tools::{ToolRegistry, register_builtin_tools};
use uuid::Uuid;

use crate::{Cli, Commands, ConfigAction};

pub async fn handle(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config,
        quiet,
        command,
        ..
    } = cli;

    match command {
        Commands::Run {
            question,
            length,
            tier,
            as_of,
            artifacts_dir,
            no_review,
        } => {
            let overrides = RunOverrides {
                length,
                tier,
                as_of,
                artifacts_dir,
                no_review,
            };
            run(&question, overrides, config.as_deref(), quiet).await
        }
        Commands::Show {
            run_id,
            paper,
            artifacts_dir,
        } => show(run_id, paper, artifacts_dir, config.as_deref()),
        Commands::List {
            artifacts_dir,
            limit,
        } => list(artifacts_dir, limit, config.as_deref()),
        Commands::Config { action } => handle_config(action, config.as_deref()),
    }
}

/// Command-line overrides applied on top of the layered configuration.
struct RunOverrides {
    length: Option<String>,
    tier: Option<String>,
    as_of: Option<NaiveDate>,
    artifacts_dir: Option<PathBuf>,
    no_review: bool,
}

async fn run(
    question: &str,
    overrides: RunOverrides,
    config_path: Option<&Path>,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut config = PipelineConfig::load(config_path).context("failed to load configuration")?;
    apply_overrides(&mut config, &overrides)?;
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    let artifacts_dir = config.run.artifacts_dir.clone();

    let gateway = Arc::new(
        ModelGateway::from_config(&config.models)
            .context("failed to initialize model backends")?,
    );
    let mut registry = ToolRegistry::with_timeout(config.retrieval.tool_timeout_secs);
    register_builtin_tools(&mut registry);

    let orchestrator = Orchestrator::new(config, gateway, Arc::new(registry));

    // First Ctrl-C cancels at the next phase boundary; a second one exits
    // immediately.
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current phase (Ctrl-C again to exit now)...");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let (events, mut rx) = EventSender::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render_event(&event, quiet);
        }
    });

    let outcome = orchestrator.run(question, &events).await;
    drop(events);
    let _ = printer.await;

    print_outcome(&outcome, &artifacts_dir, quiet);
    match outcome {
        RunOutcome::Completed(_) => Ok(()),
        RunOutcome::Aborted { error, .. } => {
            eprintln!("\x1b[31mRun did not complete: {error}\x1b[0m");
            std::process::exit(1);
        }
    }
}

fn show(
    run_id: Uuid,
    paper_only: bool,
    artifacts_dir: Option<PathBuf>,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    let base = resolve_artifacts_dir(artifacts_dir, config_path)?;
    let record = RunArtifacts::load(&base, run_id)
        .with_context(|| format!("failed to load run {run_id} from {}", base.display()))?;

    if paper_only {
        match &record.paper {
            Some(text) => print!("{text}"),
            None => anyhow::bail!(
                "run {run_id} has no paper (stopped in phase {})",
                record.summary.phase
            ),
        }
        return Ok(());
    }

    print_run_detail(&record);
    Ok(())
}

fn list(
    artifacts_dir: Option<PathBuf>,
    limit: usize,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    let base = resolve_artifacts_dir(artifacts_dir, config_path)?;
    let runs = RunArtifacts::list_runs(&base);
    if runs.is_empty() {
        println!("No runs under {}", base.display());
        return Ok(());
    }

    for summary in runs.iter().take(limit.max(1)) {
        println!(
            "{}  {:<9}  {:<18}  {}  {}",
            summary.run_id,
            status_str(summary.status),
            summary.phase,
            summary.updated_at.format("%Y-%m-%d %H:%M"),
            ellipsize(&summary.question, 60),
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("evigate.toml"));
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&PipelineConfig::default())?;
            std::fs::write(&path, &toml_str)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config =
                PipelineConfig::load(config_path).context("failed to load configuration")?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut PipelineConfig, overrides: &RunOverrides) -> anyhow::Result<()> {
    if let Some(length) = &overrides.length {
        config.run.length_tier = parse_length_tier(length)?;
    }
    if let Some(tier) = &overrides.tier {
        config.run.tier = parse_model_tier(tier)?;
    }
    if let Some(date) = overrides.as_of {
        config.run.as_of_date = Some(date);
    }
    if let Some(dir) = &overrides.artifacts_dir {
        config.run.artifacts_dir = dir.clone();
    }
    if overrides.no_review {
        config.review.enabled = false;
    }
    Ok(())
}

fn parse_length_tier(value: &str) -> anyhow::Result<LengthTier> {
    match value {
        "short" => Ok(LengthTier::Short),
        "medium" => Ok(LengthTier::Medium),
        "long" => Ok(LengthTier::Long),
        "deep" => Ok(LengthTier::Deep),
        other => anyhow::bail!("unknown length tier '{other}' (expected short, medium, long, or deep)"),
    }
}

fn parse_model_tier(value: &str) -> anyhow::Result<ModelTier> {
    match value {
        "premium" => Ok(ModelTier::Premium),
        "budget" => Ok(ModelTier::Budget),
        other => anyhow::bail!("unknown model tier '{other}' (expected premium or budget)"),
    }
}

fn resolve_artifacts_dir(
    explicit: Option<PathBuf>,
    config_path: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let config = PipelineConfig::load(config_path).context("failed to load configuration")?;
    Ok(config.run.artifacts_dir)
}

fn render_event(event: &PipelineEvent, quiet: bool) {
    match event.kind {
        EventKind::Status if !quiet => {
            println!("\x1b[90m  [{}] {}\x1b[0m", event.agent, event.content);
        }
        EventKind::ToolCall if !quiet => {
            println!("\x1b[36m  [{}] {}\x1b[0m", event.agent, event.content);
        }
        EventKind::ToolResult if !quiet => {
            println!("\x1b[36m  [{}] {}\x1b[0m", event.agent, event.content);
        }
        EventKind::Response => {
            println!("\x1b[32m  [{}]\x1b[0m {}", event.agent, event.content);
        }
        EventKind::Error => {
            eprintln!("\x1b[31m  [{}] {}\x1b[0m", event.agent, event.content);
        }
        _ => {}
    }
}

/// Print the paper (read back from the artifact so stdout matches
/// `paper.md` exactly) and a dim footer with run accounting.
fn print_outcome(outcome: &RunOutcome, artifacts_dir: &Path, quiet: bool) {
    let output = outcome.output();
    let run_dir = artifacts_dir.join(output.run_id.to_string());

    if output.paper.is_some()
        && let Ok(text) = std::fs::read_to_string(run_dir.join("paper.md"))
    {
        println!();
        print!("{text}");
    }

    if quiet {
        return;
    }

    println!();
    println!(
        "\x1b[90m  run {} | {} review cycles, {} research rounds | {} references | {} unresolved claims\x1b[0m",
        output.run_id,
        output.review_cycles,
        output.research_rounds,
        output.paper.as_ref().map_or(0, |p| p.bibliography.len()),
        output.unresolved_claims.len(),
    );
    for diagnostic in &output.diagnostics {
        println!("\x1b[33m  note: {diagnostic}\x1b[0m");
    }
    println!("\x1b[90m  artifacts: {}\x1b[0m", run_dir.display());
}

fn print_run_detail(record: &RunRecord) {
    let summary = &record.summary;
    println!("Run {} ({})", summary.run_id, status_str(summary.status));
    println!("  Question:   {}", summary.question);
    println!("  Phase:      {}", summary.phase);
    println!(
        "  Started:    {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(finished) = summary.finished_at {
        println!("  Finished:   {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "  Review:     {} cycles, {} research rounds",
        summary.review_cycles, summary.research_rounds
    );
    if let Some(register) = &record.register {
        println!(
            "  Claims:     {} mined, {} removed, {} unresolved",
            register.claims.len(),
            summary.removed_claims.len(),
            summary.unresolved_claims.len()
        );
    }
    if !record.packs.is_empty() {
        let count = |status: EvidenceStatus| {
            record
                .packs
                .values()
                .filter(|pack| pack.status == status)
                .count()
        };
        println!(
            "  Evidence:   {} packs ({} fulfilled, {} insufficient, {} conflict)",
            record.packs.len(),
            count(EvidenceStatus::Fulfilled),
            count(EvidenceStatus::Insufficient),
            count(EvidenceStatus::Conflict),
        );
    }
    if !record.bibliography.is_empty() {
        println!("  References: {}", record.bibliography.len());
    }
    if !summary.unresolved_claims.is_empty() {
        println!("  Unresolved: {}", summary.unresolved_claims.join(", "));
    }
    if let Some(error) = &summary.error {
        println!("  Error:      {error}");
    }
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Aborted => "aborted",
        RunStatus::Failed => "failed",
    }
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}
