//! merge-assist CLI

mod cli;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cli::context::CommandContext;
use merge_assist::config::DEFAULT_CONFIG_FILE;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LOG_FILTER: &str = "merge_assist=info";

/// Automated merge gatekeeper for GitLab merge requests
#[derive(Parser)]
#[command(name = "merge-assist")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the merge service until interrupted
    Run,

    /// Check whether a merge request is ready, without changing anything
    Check {
        /// Project key from the configuration
        project: String,

        /// Merge request IID
        iid: u64,
    },

    /// Show governed merge requests and recent batches
    Status {
        /// Limit output to one project
        project: Option<String>,
    },

    /// Set the merge priority of a merge request
    Priority {
        /// Project key from the configuration
        project: String,

        /// Merge request IID
        iid: u64,

        /// New priority (higher merges first among equally old MRs)
        #[arg(allow_negative_numbers = true)]
        priority: i64,
    },
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let ctx = CommandContext::new(&cli.config)?;

    match cli.command {
        Commands::Run => cli::run_service(&ctx).await?,
        Commands::Check { project, iid } => cli::run_check(&ctx, &project, iid).await?,
        Commands::Status { project } => cli::run_status(&ctx, project.as_deref()).await?,
        Commands::Priority {
            project,
            iid,
            priority,
        } => cli::run_priority(&ctx, &project, iid, priority).await?,
    }

    Ok(())
}
