use anyhow::Result;
use dqe_orchestrator::{CancelToken, RunOptions};

pub async fn run(
    cfg: dqe_runtime::RuntimeConfig,
    suite: String,
    environment: String,
    connection: String,
    dry_run: bool,
    budget_seconds: Option<u64>,
    max_parallel: usize,
) -> Result<()> {
    let runtime = dqe_runtime::Runtime::init(cfg).await?;

    let options = RunOptions {
        dry_run,
        budget_seconds,
        max_parallel_tests: max_parallel,
        sample_limit: None,
    };

    let outcome = runtime
        .run_suite_by_name(&suite, &environment, &connection, options, CancelToken::new())
        .await?;

    println!("run_id={}", outcome.run.id);
    println!("status={:?}", outcome.run.status);
    for t in &outcome.tests {
        println!("test={} status={:?}", t.name, t.status);
    }

    if outcome.run.status == dqe_schemas::RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
