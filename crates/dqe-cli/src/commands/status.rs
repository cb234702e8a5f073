use anyhow::{Context, Result};
use uuid::Uuid;

pub async fn run(cfg: dqe_runtime::RuntimeConfig, run_id: String) -> Result<()> {
    let runtime = dqe_runtime::Runtime::init(cfg).await?;
    let run_id: Uuid = run_id.parse().context("run-id must be a UUID")?;

    let run = runtime.status(run_id).await?;

    println!("run_id={}", run.id);
    println!("suite_name={}", run.suite_name);
    println!("status={:?}", run.status);
    println!("started_at={}", run.started_at);
    if let Some(finished_at) = run.finished_at {
        println!("finished_at={finished_at}");
    }
    if let Some(duration_ms) = run.duration_ms {
        println!("duration_ms={duration_ms}");
    }
    if let Some(error_message) = &run.error_message {
        println!("error_message={error_message}");
    }

    Ok(())
}
