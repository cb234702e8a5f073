use anyhow::Result;
use dqe_ai::CompileExpressionRequest;

pub async fn run(
    cfg: dqe_runtime::RuntimeConfig,
    expr: String,
    dataset: String,
    test_type: Option<String>,
) -> Result<()> {
    let runtime = dqe_runtime::Runtime::init(cfg).await?;

    let req = CompileExpressionRequest {
        expression: expr,
        dataset,
        test_type,
        catalog_context: None,
    };
    let resp = runtime.compile(req).await?;

    println!("confidence={}", resp.confidence);
    for warning in &resp.warnings {
        println!("warning: {warning}");
    }
    println!("ir={}", serde_json::to_string(&resp.ir)?);

    // `sql_preview_allowed` requires both flags: most deployments never
    // echo generated SQL back to a caller.
    if runtime.policy().sql_preview_allowed() {
        println!("sql_preview={}", resp.sql_preview);
    }

    Ok(())
}
