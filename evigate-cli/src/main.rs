//! Evigate CLI — run the evidence-gated research pipeline from a
//! terminal.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Evidence-gated research runs: ask a question, get a cited paper.
#[derive(Parser, Debug)]
#[command(name = "evigate", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./evigate.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output; print only the paper and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the pipeline on a question
    Run {
        /// The research question
        question: String,

        /// Output length tier: short, medium, long, deep
        #[arg(long)]
        length: Option<String>,

        /// Default model tier for every role: premium, budget
        #[arg(long)]
        tier: Option<String>,

        /// As-of date for freshness checks (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<chrono::NaiveDate>,

        /// Directory that receives run artifacts
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Skip the editorial review loop
        #[arg(long)]
        no_review: bool,
    },
    /// Show a stored run
    Show {
        /// Run ID
        run_id: uuid::Uuid,

        /// Print the paper text instead of the run summary
        #[arg(long)]
        paper: bool,

        /// Directory holding run artifacts
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,
    },
    /// List stored runs, newest activity first
    List {
        /// Directory holding run artifacts
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Maximum rows to print
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file
    Init,
    /// Print the effective configuration after layering
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // EVIGATE_LOG beats the verbosity flags when set.
    let filter = EnvFilter::try_from_env("EVIGATE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    if cli.log_json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    }

    commands::handle(cli).await
}
