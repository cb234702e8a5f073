use anyhow::Result;

pub async fn run(cfg: dqe_runtime::RuntimeConfig) -> Result<()> {
    let runtime = dqe_runtime::Runtime::init(cfg).await?;
    let report = runtime.health().await;

    println!("ok={}", report.ok);
    println!("config_hash={}", report.config_hash);
    println!("ai_ok={} ai_detail={}", report.ai_ok, report.ai_detail);
    println!("db_ok={}", report.db_ok);

    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}
