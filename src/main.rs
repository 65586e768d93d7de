use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info};

use tabular_etl::app::build_processor;
use tabular_etl::config::Config;
use tabular_etl::logging;
use tabular_etl::metrics;
use tabular_etl::pipeline::{PipelineContext, RunSummary};
use tabular_etl::types::Stage;

#[derive(Parser)]
#[command(name = "tabular_etl")]
#[command(about = "Watch stage directories and move tabular files from raw to loaded")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse raw CSV/JSON files into flattened payloads
    Extract {
        /// Process the current backlog and exit
        #[arg(long)]
        once: bool,
    },
    /// Tag fields and apply the configured transformations
    Transform {
        #[arg(long)]
        once: bool,
    },
    /// Load enriched payloads into the table store and archive them
    Load {
        #[arg(long)]
        once: bool,
    },
    /// Run all three stages in one process
    Run {
        #[arg(long)]
        once: bool,
    },
}

impl Commands {
    fn stages(&self) -> Vec<Stage> {
        match self {
            Commands::Extract { .. } => vec![Stage::Extraction],
            Commands::Transform { .. } => vec![Stage::Transformation],
            Commands::Load { .. } => vec![Stage::Loading],
            Commands::Run { .. } => vec![Stage::Extraction, Stage::Transformation, Stage::Loading],
        }
    }

    fn once(&self) -> bool {
        match self {
            Commands::Extract { once }
            | Commands::Transform { once }
            | Commands::Load { once }
            | Commands::Run { once } => *once,
        }
    }

    fn process_name(&self) -> &'static str {
        match self {
            Commands::Extract { .. } => "etl_extract",
            Commands::Transform { .. } => "etl_transform",
            Commands::Load { .. } => "etl_load",
            Commands::Run { .. } => "etl_run",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    logging::init_logging(&config.logs_dir, cli.command.process_name());
    metrics::init_metrics(config.metrics_addr.as_deref());

    let ctx = PipelineContext::new(config);
    ctx.layout.ensure_all()?;
    info!("Data root: {}", ctx.layout.root().display());

    let mut runners = Vec::new();
    for stage in cli.command.stages() {
        runners.push(ctx.runner(build_processor(&ctx, stage)?));
    }

    if cli.command.once() {
        // Stages run in pipeline order so one pass carries a file end to end
        let mut total = RunSummary::default();
        for runner in &runners {
            info!("{} pass over {}", runner.stage(), runner.input_dir().display());
            let summary = runner.run_once().await?;
            total.processed += summary.processed;
            total.failed += summary.failed;
        }
        info!("Done: {} processed, {} failed", total.processed, total.failed);
        if let Some(text) = metrics::render() {
            debug!("Final metrics:\n{}", text);
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut stages = tokio::task::JoinSet::new();
    for runner in runners {
        let rx = shutdown_rx.clone();
        stages.spawn(async move {
            let stage = runner.stage();
            (stage, runner.run(rx).await)
        });
    }
    while let Some(joined) = stages.join_next().await {
        match joined {
            Ok((stage, Ok(summary))) => info!(
                "{} finished: {} processed, {} failed",
                stage, summary.processed, summary.failed
            ),
            Ok((stage, Err(e))) => error!("{} stage stopped with error: {}", stage, e),
            Err(e) => error!("Stage task failed: {}", e),
        }
    }
    info!("All stages stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing current files"),
        _ = terminate => info!("Received terminate signal, finishing current files"),
    }
}
