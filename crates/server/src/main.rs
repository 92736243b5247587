//! Primer
//!
//! Command-line entry point: run a tutorial from the terminal, serve the
//! HTTP API, or list stored runs.

mod api;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use primer_core::config::DEFAULT_CONFIG_PATH;
use primer_core::state::{PrimerDb, RunStore};
use primer_core::workflow::{Coordinator, SqliteAuditSink};
use primer_core::{PipelineConfig, RunStatus, TutorialResult};

const DEFAULT_LOG_FILTER: &str = "primer=info,primer_core=info";
const LOG_FILE: &str = ".primer/primer.log";

#[derive(Parser, Clone)]
#[command(author, version, about = "Primer - getting-started tutorials for PyPI and npm libraries")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,

    /// Also write logs to .primer/primer.log
    #[arg(long, global = true)]
    log_file: bool,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Generate a tutorial (CLI mode, no server)
    Run {
        /// What to write about, e.g. "getting started with requests"
        request: String,
        /// Maximum critique-driven revisions
        #[arg(long)]
        max_revisions: Option<u32>,
        /// Wall-clock budget for the whole run, in seconds
        #[arg(long)]
        budget_secs: Option<u64>,
        /// Write the tutorial to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Answer follow-up questions from stdin after the run
        #[arg(long)]
        ask: bool,
        /// Keep the run out of .primer/primer.db
        #[arg(long)]
        no_store: bool,
    },
    /// Start the HTTP API (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// List stored runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Load `.env` and `.primer/.env` so provider keys reach the LLM clients
fn load_env() {
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_path(Path::new(".primer/.env"));
}

fn init_logging(log_file: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let file_layer = if log_file {
        std::fs::create_dir_all(".primer").context("Failed to create .primer directory")?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_FILE)
            .with_context(|| format!("Failed to open {}", LOG_FILE))?;
        Some(fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_cli(
    mut config: PipelineConfig,
    request: String,
    max_revisions: Option<u32>,
    budget_secs: Option<u64>,
    output: Option<PathBuf>,
    ask: bool,
    no_store: bool,
) -> anyhow::Result<ExitCode> {
    if let Some(budget) = budget_secs {
        config.run_budget_secs = budget;
    }
    let max_revisions = max_revisions.unwrap_or(config.max_revisions);

    let db = if no_store {
        PrimerDb::open_in_memory()?
    } else {
        PrimerDb::open()?
    };
    let coordinator = Coordinator::from_config(config)?.with_sink(Arc::new(SqliteAuditSink::new(&db)));

    eprintln!("Running: {}", request);
    let result = coordinator.run(&request, max_revisions).await;

    if let Err(e) = RunStore::new(&db).save(&result) {
        tracing::warn!("Failed to store run: {}", e);
    }

    report(&result, output.as_deref())?;

    if ask && result.index_handle.is_some() {
        ask_loop(&coordinator, &result).await?;
    } else if ask {
        eprintln!("No retrieval index was built; follow-up questions are unavailable.");
    }

    Ok(match result.status {
        RunStatus::Approved => ExitCode::SUCCESS,
        RunStatus::RevisionLimitExceeded => ExitCode::from(2),
        RunStatus::Failed | RunStatus::InProgress => ExitCode::FAILURE,
    })
}

/// Tutorial to stdout or a file; summary and notes to stderr
fn report(result: &TutorialResult, output: Option<&Path>) -> anyhow::Result<()> {
    if let Some(draft) = &result.draft {
        match output {
            Some(path) => {
                std::fs::write(path, draft).with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!("Tutorial written to {}", path.display());
            }
            None => println!("{}", draft),
        }
    }

    eprintln!();
    eprintln!("Status:    {}", result.status.as_str());
    if !result.library_name.is_empty() {
        eprintln!(
            "Library:   {} ({})",
            result.library_name,
            result.resolved_version.as_deref().unwrap_or("version unresolved")
        );
    }
    eprintln!("Revisions: {}/{}", result.revision_count, result.max_revisions);
    eprintln!("Sources:   {}", result.source_urls.len());
    if let Some(failure) = &result.failure {
        eprintln!("Failure:   {} - {}", failure.reason.as_str(), failure.message);
    }
    for note in result.latest_feedback() {
        let marker = if note.is_blocking() { "!" } else { "-" };
        eprintln!("  {} [{}] {}", marker, note.location_hint, note.message);
    }
    Ok(())
}

async fn ask_loop(coordinator: &Coordinator, result: &TutorialResult) -> anyhow::Result<()> {
    eprintln!();
    eprintln!("Ask follow-up questions about {} (empty line to quit).", result.library_name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("? ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() || question == "exit" {
            break;
        }
        match coordinator.ask(result, question).await {
            Ok(answer) => println!("{}\n", answer),
            Err(e) => eprintln!("Could not answer: {}", e),
        }
    }
    coordinator.release(result).await;
    Ok(())
}

fn history(limit: usize) -> anyhow::Result<()> {
    let db = PrimerDb::open()?;
    let runs = RunStore::new(&db).list(limit)?;
    if runs.is_empty() {
        println!("No stored runs.");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {:<24} {:<24} revisions={}  {}",
            run.created_at, run.library, run.status, run.revision_count, run.id
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    load_env();
    let args = Args::parse();
    init_logging(args.log_file)?;

    let config = PipelineConfig::load(DEFAULT_CONFIG_PATH)?;

    match args.command {
        Some(CliCommand::Run {
            request,
            max_revisions,
            budget_secs,
            output,
            ask,
            no_store,
        }) => run_cli(config, request, max_revisions, budget_secs, output, ask, no_store).await,
        Some(CliCommand::History { limit }) => {
            history(limit)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(CliCommand::Serve { port }) => {
            api::serve(config, PrimerDb::open()?, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            api::serve(config, PrimerDb::open()?, 8080).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
