//! dqe-cli entry point.
//!
//! Thin by design: argument parsing and dispatch only. Every handler lives
//! in `commands/*.rs` and talks to `dqe-runtime` directly, in process — no
//! socket, no daemon, since CLI rendering and an HTTP surface are both
//! explicit non-goals here.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{compile, health, import_catalog, propose, run, status};

#[derive(Parser)]
#[command(name = "dqe")]
#[command(about = "Data Testing Orchestrator CLI", long_about = None)]
struct Cli {
    /// Layered config files in merge order (base -> env -> local).
    #[arg(long = "config", global = true, default_value = "config/base.yaml")]
    config_paths: Vec<String>,

    /// Secrets-resolution mode: local | ci | production.
    #[arg(long, global = true, default_value = "local")]
    mode: String,

    /// Directory of `*.yaml` suite definitions.
    #[arg(long = "suites", global = true)]
    suites_dir: Option<String>,

    /// Local directory artifacts are written under.
    #[arg(long = "artifacts", global = true, default_value = "artifacts")]
    artifacts_dir: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check AI-provider and database reachability.
    Health,

    /// Register a catalog source for later `propose` calls.
    ImportCatalog {
        #[arg(long)]
        file: String,
        #[arg(long = "source-type")]
        source_type: String,
        #[arg(long)]
        env: String,
    },

    /// Suggest candidate tests for a dataset from its catalog profile.
    Propose {
        #[arg(long, required = true)]
        datasets: Vec<String>,
        #[arg(long = "catalog-id")]
        catalog_id: String,
        #[arg(long, default_value = "standard")]
        profile: String,
    },

    /// Compile a free-text expression into IR + SQL preview.
    Compile {
        #[arg(long)]
        expr: String,
        #[arg(long)]
        dataset: String,
        #[arg(long = "type")]
        test_type: Option<String>,
    },

    /// Run a named suite.
    Run {
        #[arg(long)]
        suite: String,
        #[arg(long)]
        environment: String,
        #[arg(long)]
        connection: String,
        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,
        #[arg(long = "budget-seconds")]
        budget_seconds: Option<u64>,
        #[arg(long = "max-parallel", default_value_t = 1)]
        max_parallel: usize,
    },

    /// Fetch the current state of a run.
    Status {
        #[arg(long = "run-id")]
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let runtime_cfg = dqe_runtime::RuntimeConfig {
        config_paths: cli.config_paths,
        mode: cli.mode,
        suites_dir: cli.suites_dir.map(Into::into),
        artifacts_dir: cli.artifacts_dir.into(),
    };

    match cli.cmd {
        Commands::Health => health::run(runtime_cfg).await,
        Commands::ImportCatalog { file, source_type, env } => {
            import_catalog::run(file, source_type, env)
        }
        Commands::Propose { datasets, catalog_id, profile } => propose::run(datasets, catalog_id, profile),
        Commands::Compile { expr, dataset, test_type } => compile::run(runtime_cfg, expr, dataset, test_type).await,
        Commands::Run {
            suite,
            environment,
            connection,
            dry_run,
            budget_seconds,
            max_parallel,
        } => {
            run::run(
                runtime_cfg,
                suite,
                environment,
                connection,
                dry_run,
                budget_seconds,
                max_parallel,
            )
            .await
        }
        Commands::Status { run_id } => status::run(runtime_cfg, run_id).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
