//! CLI entry point for the OAI-PMH harvester.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use oai_harvester::{
    CheckpointStore, ConfigError, FileCheckpointStore, HarvestError, Harvester, JobOutcome,
    LocalSink, NoCheckpointStore, ObjectStoreSink, RepositoryConfig, Sink,
};
use tracing::{debug, error, info, warn};
use url::Url;

mod app_config;
mod cli;
mod inspect;

use cli::{Cli, Command, HarvestArgs};

/// Bearer token for `--object-store-url` uploads.
const SINK_TOKEN_ENV: &str = "OAI_HARVESTER_SINK_TOKEN";

/// Checkpoint directory used when none is configured.
const DEFAULT_CHECKPOINT_DIR: &str = ".oai-harvester";

/// Process exit outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success = 0,
    Failure = 1,
    ConfigError = 2,
    Interrupted = 130,
}

impl From<ProcessExit> for ExitCode {
    fn from(outcome: ProcessExit) -> Self {
        ExitCode::from(outcome as u8)
    }
}

impl From<JobOutcome> for ProcessExit {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Success => Self::Success,
            JobOutcome::Failed => Self::Failure,
            JobOutcome::Interrupted => Self::Interrupted,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let outcome = match cli.command {
        Command::Harvest(args) => run_harvest(*args).await,
        Command::Identify(args) => report_inspection(inspect::run_identify(&args).await),
        Command::Sets(args) => report_inspection(inspect::run_sets(&args).await),
        Command::Formats(args) => report_inspection(inspect::run_formats(&args).await),
    };
    outcome.into()
}

fn report_inspection(result: Result<()>) -> ProcessExit {
    match result {
        Ok(()) => ProcessExit::Success,
        Err(e) => {
            error!("{e:#}");
            ProcessExit::Failure
        }
    }
}

async fn run_harvest(args: HarvestArgs) -> ProcessExit {
    let args = match app_config::load_file_config(args.config.as_deref()) {
        Ok(Some(file)) => app_config::apply_file_defaults(args, &file),
        Ok(None) => args,
        Err(e) => {
            error!("{e:#}");
            return ProcessExit::ConfigError;
        }
    };

    let config = match build_repository_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ProcessExit::ConfigError;
        }
    };

    let sink = match build_sink(&args, &config) {
        Ok(sink) => sink,
        Err(e) => {
            error!("{e:#}");
            return ProcessExit::ConfigError;
        }
    };
    let checkpoints = build_checkpoint_store(&args, &config);

    let mut harvester = match Harvester::new(config, sink, checkpoints) {
        Ok(harvester) => harvester,
        Err(e) => {
            error!(error = %e, "failed to start harvest");
            return exit_for_error(&e);
        }
    };
    if let Some(date) = args.harvest_date {
        harvester = harvester.with_harvest_date(date);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current page");
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    match harvester.run_interruptible(interrupted).await {
        Ok(report) => {
            print!("{report}");
            info!(outcome = %report.outcome, "harvest done");
            report.outcome.into()
        }
        Err(e) => {
            error!(error = %e, "harvest aborted");
            exit_for_error(&e)
        }
    }
}

fn exit_for_error(error: &HarvestError) -> ProcessExit {
    if error.is_config() {
        ProcessExit::ConfigError
    } else {
        ProcessExit::Failure
    }
}

fn build_repository_config(args: &HarvestArgs) -> Result<RepositoryConfig, ConfigError> {
    let mut builder = RepositoryConfig::builder()
        .fail_on_error(args.fail_on_error)
        .allow_sets(args.allow_sets.iter().cloned())
        .deny_sets(args.deny_sets.iter().cloned());

    if let Some(url) = &args.base_url {
        builder = builder.base_url(url.as_str());
    }
    if let Some(prefix) = &args.repo_prefix {
        builder = builder.repo_prefix(prefix.as_str());
    }
    if let Some(prefix) = &args.metadata_prefix {
        builder = builder.metadata_prefix(prefix.as_str());
    }
    if let Some(secs) = args.connect_timeout {
        builder = builder.connect_timeout_secs(secs);
    }
    if let Some(secs) = args.read_timeout {
        builder = builder.read_timeout_secs(secs);
    }
    if let Some(attempts) = args.max_attempts {
        builder = builder.max_attempts(attempts);
    }
    if let Some(secs) = args.attempt_delay {
        builder = builder.attempt_delay(Duration::from_secs(secs));
    }
    if let Some(path) = &args.allow_list {
        builder = builder.allow_list_file(path)?;
    }
    if let Some(path) = &args.deny_list {
        builder = builder.deny_list_file(path)?;
    }
    builder.build()
}

fn build_sink(args: &HarvestArgs, config: &RepositoryConfig) -> Result<Arc<dyn Sink>> {
    if let Some(raw) = &args.object_store_url {
        let endpoint =
            Url::parse(raw).with_context(|| format!("Invalid object store URL '{raw}'"))?;
        let token = std::env::var(SINK_TOKEN_ENV).ok();
        let sink = ObjectStoreSink::new(&endpoint, token, config.read_timeout())?;
        info!(endpoint = %endpoint, "archiving to object store");
        return Ok(Arc::new(sink));
    }

    let root = args
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    info!(root = %root.display(), "archiving to local directory");
    Ok(Arc::new(LocalSink::new(root)))
}

fn build_checkpoint_store(args: &HarvestArgs, config: &RepositoryConfig) -> Arc<dyn CheckpointStore> {
    if args.no_checkpoint {
        debug!("checkpointing disabled");
        return Arc::new(NoCheckpointStore);
    }
    let dir = args
        .checkpoint_dir
        .as_deref()
        .unwrap_or(Path::new(DEFAULT_CHECKPOINT_DIR));
    let store = FileCheckpointStore::new(dir, config.repo_prefix(), config.metadata_prefix());
    debug!(path = %store.path().display(), "checkpoint file");
    Arc::new(store)
}
