mod display;
mod graph_file;
mod logging;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use display::{LevelsView, SummaryView};
use graft_core::{EngineConfig, Orchestrator, RunStatus, load_config};
use graph_file::read_graph;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "graft")]
#[command(about = "Run dependency graphs of external agent processes with retries, fallbacks and circuit breakers")]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    Validate(ValidateArgs),
    Config(ConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    graph: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    max_concurrency: Option<usize>,
    #[arg(long, default_value_t = false)]
    abort_on_failure: bool,
    /// Print the full recovery summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(long)]
    graph: PathBuf,
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_tracing(logging::DEFAULT_FILTER, cli.log_json);

    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Validate(args) => validate_command(args),
        Commands::Config(args) => config_command(args),
    }
}

async fn run_command(args: RunArgs) -> Result<ExitCode> {
    let mut config = effective_config(args.config.as_deref())?;
    if let Some(max_concurrency) = args.max_concurrency {
        config.execution.max_concurrency = max_concurrency;
    }
    if args.abort_on_failure {
        config.execution.abort_on_permanent_failure = true;
    }
    config.validate()?;

    let graph = read_graph(&args.graph)?
        .build()
        .with_context(|| format!("invalid graph {}", args.graph.display()))?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            trigger.cancel();
        }
    });

    let orchestrator = Orchestrator::from_config(config);
    let summary = orchestrator.run_with_cancel(&graph, cancel).await?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&summary).context("failed to render summary")?;
        println!("{rendered}");
    } else {
        print!(
            "{}",
            SummaryView::new(&summary, orchestrator.breakers().snapshots())
        );
    }

    Ok(if summary.status == RunStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate_command(args: ValidateArgs) -> Result<ExitCode> {
    let graph = read_graph(&args.graph)?
        .build()
        .with_context(|| format!("invalid graph {}", args.graph.display()))?;
    print!("{}", LevelsView(&graph));
    Ok(ExitCode::SUCCESS)
}

fn config_command(args: ConfigArgs) -> Result<ExitCode> {
    let config = effective_config(args.config.as_deref())?;
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}

fn effective_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("failed to load {}", path.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}
