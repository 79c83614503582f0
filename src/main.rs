//! Composition root
//!
//! Wires the production collaborators to the orchestrator and runs until
//! interrupted. This is deliberately the only place that knows about
//! concrete service implementations.

use anyhow::{Context, Result};
use autonomic::bus::EventBus;
use autonomic::config::Config;
use autonomic::listener::ErrorListener;
use autonomic::orchestrator::Orchestrator;
use autonomic::pipeline::{PatchAgent, PrAgent, TestWriter};
use autonomic::services::{
    GitWorkspace, GithubHost, LocalFileStore, OpenRouterCompletion, ProcessTestRunner,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "autonomic",
    about = "Closed-loop error remediation: detect, reproduce, patch, verify, ship",
    version
)]
struct Args {
    /// Path to the repository to remediate (defaults to current directory)
    #[arg(default_value = ".")]
    repo: PathBuf,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Maximum concurrently running jobs
    #[arg(long)]
    max_jobs: Option<usize>,

    /// Disable automatic processing; errors wait for manual triggers
    #[arg(long)]
    no_auto: bool,

    /// Run a single poll pass, print status, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load();
    config.repo_path = args.repo.canonicalize().context("repository path not found")?;
    if let Some(interval) = args.poll_interval_ms {
        config.poll_interval_ms = interval;
    }
    if let Some(max) = args.max_jobs {
        config.max_concurrent_jobs = max;
    }
    if args.no_auto {
        config.auto_process = false;
    }

    let api_key = config
        .api_key()
        .ok_or_else(|| anyhow::anyhow!("AUTONOMIC_API_KEY is not set"))?;

    let bus = Arc::new(EventBus::new());
    let listener = Arc::new(ErrorListener::new());

    let completion = Arc::new(OpenRouterCompletion::new(
        api_key,
        config.completion_model.clone(),
        Duration::from_secs(config.completion_timeout_secs),
    )?);
    let files = Arc::new(LocalFileStore::new(config.repo_path.clone()));
    let runner = Arc::new(ProcessTestRunner::new(
        config.repo_path.clone(),
        Duration::from_secs(config.test_timeout_secs),
    ));
    let vcs = Arc::new(GitWorkspace::new(
        config.repo_path.clone(),
        Duration::from_secs(config.push_timeout_secs),
    ));
    let host = Arc::new(GithubHost::from_repo(&config.repo_path)?);

    let test_writer = TestWriter::new(completion.clone(), files.clone(), runner.clone());
    let patch_agent = PatchAgent::new(completion, files, runner);
    let pr_agent = PrAgent::new(vcs, host, config.base_branch.clone());

    let orchestrator = Orchestrator::new(
        listener,
        bus.clone(),
        test_writer,
        patch_agent,
        pr_agent,
        config,
    );

    orchestrator.start();

    if args.once {
        orchestrator.poll_once().await;
        let status = orchestrator.status();
        println!("{}", serde_json::to_string_pretty(&status)?);
        orchestrator.stop();
        return Ok(());
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    orchestrator.stop();

    Ok(())
}
