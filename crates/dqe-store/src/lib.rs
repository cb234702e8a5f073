//! Run Store — the durable repository for Run, RunTest, and Artifact
//! records, backed by Postgres via `sqlx`.
//!
//! Matches the teacher's repository-function style: raw `query`/`query_as`
//! plus `Row::try_get`, not compile-time-checked `query!` macros — this
//! crate owns its schema via its own migrations, so there is no
//! `DATABASE_URL` available at anyone's compile time to check against.
//!
//! Concurrency discipline: a given `run_id` has at most one writer (the
//! orchestrator task that owns it) — this crate enforces terminal-state
//! idempotence but does not itself arbitrate multi-writer races.

pub mod audit;

use chrono::{DateTime, Utc};
use dqe_schemas::{Artifact, ArtifactKind, Run, RunStatus, RunTest, RunTestStatus};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "DQE_DATABASE_URL";

#[derive(Debug)]
pub enum StoreError {
    Connection(String),
    Migration(String),
    NotFound { entity: &'static str, id: Uuid },
    AlreadyTerminal { run_id: Uuid, status: RunStatus },
    Db(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection(d) => write!(f, "STORE_CONNECTION: {d}"),
            StoreError::Migration(d) => write!(f, "STORE_MIGRATION: {d}"),
            StoreError::NotFound { entity, id } => write!(f, "STORE_NOT_FOUND: {entity} {id}"),
            StoreError::AlreadyTerminal { run_id, status } => write!(
                f,
                "STORE_ALREADY_TERMINAL: run {run_id} is already {status:?}"
            ),
            StoreError::Db(d) => write!(f, "STORE_DB: {d}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}

/// Connect to Postgres using `DQE_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool, StoreError> {
    let url = std::env::var(ENV_DB_URL)
        .map_err(|_| StoreError::Connection(format!("missing env var {ENV_DB_URL}")))?;

    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))
}

fn status_as_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> Result<RunStatus, StoreError> {
    match s {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(StoreError::Db(format!("invalid run status: {other}"))),
    }
}

fn test_status_as_str(status: RunTestStatus) -> &'static str {
    match status {
        RunTestStatus::Pass => "pass",
        RunTestStatus::Fail => "fail",
        RunTestStatus::Error => "error",
        RunTestStatus::Skip => "skip",
    }
}

fn test_status_from_str(s: &str) -> Result<RunTestStatus, StoreError> {
    match s {
        "pass" => Ok(RunTestStatus::Pass),
        "fail" => Ok(RunTestStatus::Fail),
        "error" => Ok(RunTestStatus::Error),
        "skip" => Ok(RunTestStatus::Skip),
        other => Err(StoreError::Db(format!("invalid run test status: {other}"))),
    }
}

fn artifact_kind_as_str(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Report => "report",
        ArtifactKind::Logs => "logs",
        ArtifactKind::Samples => "samples",
    }
}

fn artifact_kind_from_str(s: &str) -> Result<ArtifactKind, StoreError> {
    match s {
        "report" => Ok(ArtifactKind::Report),
        "logs" => Ok(ArtifactKind::Logs),
        "samples" => Ok(ArtifactKind::Samples),
        other => Err(StoreError::Db(format!("invalid artifact kind: {other}"))),
    }
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<Run, StoreError> {
    let query_ids: Value = row.try_get("query_ids")?;
    Ok(Run {
        id: row.try_get("id")?,
        suite_name: row.try_get("suite_name")?,
        status: status_from_str(&row.try_get::<String, _>("status")?)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        duration_ms: row.try_get("duration_ms")?,
        bytes_scanned: row.try_get("bytes_scanned")?,
        query_ids: serde_json::from_value(query_ids).unwrap_or_default(),
        environment: row.try_get("environment")?,
        connection: row.try_get("connection")?,
        error_message: row.try_get("error_message")?,
    })
}

fn run_test_from_row(row: &sqlx::postgres::PgRow) -> Result<RunTest, StoreError> {
    Ok(RunTest {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        status: test_status_from_str(&row.try_get::<String, _>("status")?)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        duration_ms: row.try_get("duration_ms")?,
        observed: row.try_get("observed")?,
        expected: row.try_get("expected")?,
        query_id: row.try_get("query_id")?,
        error_message: row.try_get("error_message")?,
    })
}

fn artifact_from_row(row: &sqlx::postgres::PgRow) -> Result<Artifact, StoreError> {
    Ok(Artifact {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        kind: artifact_kind_from_str(&row.try_get::<String, _>("kind")?)?,
        path: row.try_get("path")?,
        url: row.try_get("url")?,
        size_bytes: row.try_get("size_bytes")?,
        content_type: row.try_get("content_type")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

/// Create a new run in `running` status with `started_at = now`.
pub async fn begin_run(
    pool: &PgPool,
    suite_name: &str,
    environment: &str,
    connection: &str,
) -> Result<Run, StoreError> {
    let id = Uuid::new_v4();
    let started_at = Utc::now();

    sqlx::query(
        r#"
        insert into runs (
          id, suite_name, status, started_at, query_ids, environment, connection
        ) values (
          $1, $2, 'running', $3, '[]'::jsonb, $4, $5
        )
        "#,
    )
    .bind(id)
    .bind(suite_name)
    .bind(started_at)
    .bind(environment)
    .bind(connection)
    .execute(pool)
    .await?;

    Ok(Run {
        id,
        suite_name: suite_name.to_string(),
        status: RunStatus::Running,
        started_at,
        finished_at: None,
        duration_ms: None,
        bytes_scanned: None,
        query_ids: Vec::new(),
        environment: environment.to_string(),
        connection: connection.to_string(),
        error_message: None,
    })
}

/// Append one test's terminal result. Written exactly once per test.
pub async fn append_test(pool: &PgPool, test: &RunTest) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into run_tests (
          id, run_id, name, kind, status, started_at, finished_at, duration_ms,
          observed, expected, query_id, error_message
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
        )
        "#,
    )
    .bind(test.id)
    .bind(test.run_id)
    .bind(&test.name)
    .bind(&test.kind)
    .bind(test_status_as_str(test.status))
    .bind(test.started_at)
    .bind(test.finished_at)
    .bind(test.duration_ms)
    .bind(&test.observed)
    .bind(&test.expected)
    .bind(&test.query_id)
    .bind(&test.error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Finalize a run into a terminal status. Refuses to overwrite an already
/// terminal run — idempotent replay of a finalize must not corrupt history.
pub async fn finalize_run(
    pool: &PgPool,
    run_id: Uuid,
    status: RunStatus,
    finished_at: DateTime<Utc>,
    duration_ms: i64,
    query_ids: &[String],
    bytes_scanned: Option<i64>,
    error_message: Option<&str>,
) -> Result<(), StoreError> {
    let current = get_run(pool, run_id).await?;
    if current.status.is_terminal() {
        return Err(StoreError::AlreadyTerminal {
            run_id,
            status: current.status,
        });
    }

    sqlx::query(
        r#"
        update runs
        set status = $2,
            finished_at = $3,
            duration_ms = $4,
            query_ids = $5,
            bytes_scanned = $6,
            error_message = $7
        where id = $1
        "#,
    )
    .bind(run_id)
    .bind(status_as_str(status))
    .bind(finished_at)
    .bind(duration_ms)
    .bind(serde_json::to_value(query_ids).unwrap_or(Value::Array(vec![])))
    .bind(bytes_scanned)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append one artifact record.
pub async fn append_artifact(pool: &PgPool, artifact: &Artifact) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into artifacts (
          id, run_id, kind, path, url, size_bytes, content_type, created_at, expires_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9
        )
        "#,
    )
    .bind(artifact.id)
    .bind(artifact.run_id)
    .bind(artifact_kind_as_str(artifact.kind))
    .bind(&artifact.path)
    .bind(&artifact.url)
    .bind(artifact.size_bytes)
    .bind(&artifact.content_type)
    .bind(artifact.created_at)
    .bind(artifact.expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_run(pool: &PgPool, run_id: Uuid) -> Result<Run, StoreError> {
    let row = sqlx::query(
        r#"
        select id, suite_name, status, started_at, finished_at, duration_ms,
               bytes_scanned, query_ids, environment, connection, error_message
        from runs
        where id = $1
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound {
        entity: "run",
        id: run_id,
    })?;

    run_from_row(&row)
}

/// Paginated run listing, optionally filtered by suite name.
pub async fn list_runs(
    pool: &PgPool,
    suite_name: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Run>, StoreError> {
    let rows = match suite_name {
        Some(name) => {
            sqlx::query(
                r#"
                select id, suite_name, status, started_at, finished_at, duration_ms,
                       bytes_scanned, query_ids, environment, connection, error_message
                from runs
                where suite_name = $1
                order by started_at desc
                limit $2 offset $3
                "#,
            )
            .bind(name)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                select id, suite_name, status, started_at, finished_at, duration_ms,
                       bytes_scanned, query_ids, environment, connection, error_message
                from runs
                order by started_at desc
                limit $1 offset $2
                "#,
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(run_from_row).collect()
}

pub async fn list_tests(
    pool: &PgPool,
    run_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<RunTest>, StoreError> {
    let rows = sqlx::query(
        r#"
        select id, run_id, name, kind, status, started_at, finished_at, duration_ms,
               observed, expected, query_id, error_message
        from run_tests
        where run_id = $1
        order by started_at asc
        limit $2 offset $3
        "#,
    )
    .bind(run_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_test_from_row).collect()
}

pub async fn list_artifacts(pool: &PgPool, run_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
    let rows = sqlx::query(
        r#"
        select id, run_id, kind, path, url, size_bytes, content_type, created_at, expires_at
        from artifacts
        where run_id = $1
        order by created_at asc
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(artifact_from_row).collect()
}
