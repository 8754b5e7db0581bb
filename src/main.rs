//! auto-git - CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auto_git::config::{self, DEFAULT_REMOTE, PipelineConfig};
use auto_git::report::{self, EXIT_CONFIG, EXIT_FAILURES, EXIT_OK};
use auto_git::watch::{PipelineLock, RepoWatcher, TriggerLoop};
use auto_git::{GitBackend, Pipeline, RuleSet, RunMode};

/// Group pending working-tree changes into commits.
#[derive(Parser, Debug)]
#[command(name = "auto-git")]
#[command(about = "Watch a git working tree and group pending changes into commits")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Print the commit plans without applying any
    #[arg(long, global = true)]
    dry_run: bool,

    /// Repository to operate on
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// TOML rule file mapping path globs to cluster labels
    #[arg(long, global = true, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Push the current branch after a cycle that committed something
    #[arg(
        long,
        global = true,
        value_name = "REMOTE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = DEFAULT_REMOTE
    )]
    push: Option<String>,

    /// Print one JSON report per cycle instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the working tree and commit each settled burst of changes
    Watch {
        /// Quiet window before a run starts, in milliseconds
        #[arg(long, value_name = "MS")]
        debounce: Option<u64>,

        /// How long stopping waits for an in-flight run, in milliseconds
        #[arg(long, value_name = "MS")]
        hard_stop: Option<u64>,
    },
    /// Run a single cycle and exit
    RunOnce,
}

/// How long exiting waits for blocking work still running on the runtime.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: could not start the async runtime: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let code = runtime.block_on(run(cli));
    // A run abandoned at the hard stop may still occupy a blocking thread;
    // dropping the runtime would wait for it.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}

async fn run(cli: Cli) -> ExitCode {
    let pipeline = match build_pipeline(&cli) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let mode = if cli.dry_run {
        RunMode::DryRun
    } else {
        RunMode::Apply
    };

    match cli.command {
        Some(Command::Watch {
            debounce,
            hard_stop,
        }) => watch(pipeline, mode, debounce, hard_stop, cli.json).await,
        Some(Command::RunOnce) | None => run_once(pipeline, mode, cli.json),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "auto_git=debug"
    } else {
        "auto_git=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Open the repository and resolve everything a cycle needs.
///
/// Any error here is a startup error and ends the process with exit code 2.
fn build_pipeline(cli: &Cli) -> Result<Pipeline<GitBackend>> {
    let backend = GitBackend::open(&cli.repo)
        .with_context(|| format!("Cannot use {} as a repository", cli.repo.display()))?;

    let rules = match &cli.rules {
        Some(path) => RuleSet::load(path).context("Invalid rules")?,
        None => RuleSet::empty(),
    };

    let author = config::resolve_author(backend.configured_author())?;

    if cli.push.is_some() {
        config::check_git_installed()?;
    }

    let mut pipeline_config = PipelineConfig::new(author);
    pipeline_config.rules = rules;
    pipeline_config.classifier = config::classifier_config();
    pipeline_config.commit_time = config::commit_time()?;
    pipeline_config.push_remote = cli.push.clone();

    Ok(Pipeline::new(backend, pipeline_config))
}

fn run_once(mut pipeline: Pipeline<GitBackend>, mode: RunMode, json: bool) -> ExitCode {
    let report = pipeline.run(mode, &CancellationToken::new());
    report::print_report(&report, json);
    ExitCode::from(report::exit_code(&report))
}

async fn watch(
    pipeline: Pipeline<GitBackend>,
    mode: RunMode,
    debounce: Option<u64>,
    hard_stop: Option<u64>,
    json: bool,
) -> ExitCode {
    let root = pipeline.backend().workdir().to_path_buf();
    let (triggers, rx) = tokio::sync::mpsc::unbounded_channel();

    let watcher = match RepoWatcher::start(&root, triggers.clone()) {
        Ok(watcher) => watcher,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    // Changes made before the watcher started still need a cycle.
    let _ = triggers.send(());
    drop(triggers);

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            stop.cancel();
        }
    });

    let mut watch_config = config::watch_config(debounce, hard_stop);
    watch_config.mode = mode;

    if !json {
        println!(
            "Watching {} (debounce {} ms). Press Ctrl-C to stop.",
            watcher.root().display(),
            watch_config.debounce.as_millis()
        );
    }

    let summary = TriggerLoop::new(PipelineLock::new(pipeline), watch_config)
        .run(rx, shutdown, |cycle| {
            if json || !cycle.is_noop() {
                report::print_report(cycle, json);
            }
        })
        .await;
    drop(watcher);

    if !json {
        println!("{}", report::render_summary(&summary));
    }

    if summary.abandoned {
        ExitCode::from(EXIT_FAILURES)
    } else {
        ExitCode::from(EXIT_OK)
    }
}
