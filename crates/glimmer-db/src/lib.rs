//! SQLite persistence for jobs, upscale jobs, and banned words.
//!
//! The pool is opened with WAL journaling, foreign-key enforcement, and a
//! busy timeout. The schema is applied idempotently on every open:
//! `CREATE TABLE IF NOT EXISTS` for the base shape, then additive column
//! migrations guarded by a live `PRAGMA table_info` introspection so
//! re-running against an up-to-date database is a no-op.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::Row;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::SqlitePool;

/// Open (creating if missing) the database at `path` and apply the schema.
pub async fn open(path: &str) -> Result<DbPool, sqlx::Error> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Open an in-memory database (tests). A single connection keeps every
/// query on the same in-memory instance.
pub async fn open_memory() -> Result<DbPool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Cheap connectivity probe.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the schema. Safe to run on every boot.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    ensure_jobs_table(pool).await?;
    ensure_upscale_jobs_table(pool).await?;
    ensure_banned_words_table(pool).await?;
    Ok(())
}

async fn ensure_jobs_table(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
          id TEXT PRIMARY KEY,
          requester_id TEXT NOT NULL,
          origin_scope_id TEXT NOT NULL,
          origin_channel_id TEXT NOT NULL,
          status TEXT NOT NULL,
          model TEXT NOT NULL,
          sampler TEXT NOT NULL,
          scheduler TEXT NOT NULL,
          steps INTEGER NOT NULL,
          cfg REAL NOT NULL,
          seed INTEGER NOT NULL,
          size TEXT NOT NULL,
          positive_prompt TEXT NOT NULL,
          negative_prompt TEXT NOT NULL,
          adapters TEXT NOT NULL DEFAULT '[]',
          backend_prompt_id TEXT,
          output_images TEXT,
          error_message TEXT,
          created_at INTEGER NOT NULL,
          started_at INTEGER,
          completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
        CREATE INDEX IF NOT EXISTS idx_jobs_requester ON jobs(requester_id);
        "#,
    )
    .execute(pool)
    .await?;

    // Adapter support postdates the first release; older databases gain
    // the column here.
    ensure_column(pool, "jobs", "adapters", "TEXT NOT NULL DEFAULT '[]'").await?;

    Ok(())
}

async fn ensure_upscale_jobs_table(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upscale_jobs (
          id TEXT PRIMARY KEY,
          source_job_id TEXT NOT NULL REFERENCES jobs(id),
          requester_id TEXT NOT NULL,
          origin_scope_id TEXT NOT NULL,
          origin_channel_id TEXT NOT NULL,
          status TEXT NOT NULL,
          source_image_filename TEXT NOT NULL,
          upscale_model TEXT NOT NULL,
          positive_prompt TEXT NOT NULL DEFAULT '',
          negative_prompt TEXT NOT NULL DEFAULT '',
          backend_prompt_id TEXT,
          output_images TEXT,
          error_message TEXT,
          created_at INTEGER NOT NULL,
          started_at INTEGER,
          completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_upscale_jobs_status ON upscale_jobs(status);
        CREATE INDEX IF NOT EXISTS idx_upscale_jobs_source ON upscale_jobs(source_job_id);
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn ensure_banned_words_table(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS banned_words (
          word TEXT PRIMARY KEY COLLATE NOCASE,
          partial INTEGER NOT NULL DEFAULT 0,
          added_by TEXT NOT NULL,
          added_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Add `column` to `table` unless `PRAGMA table_info` already lists it.
async fn ensure_column(
    pool: &DbPool,
    table: &str,
    column: &str,
    ddl: &str,
) -> Result<(), sqlx::Error> {
    let existing: Vec<String> = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?
        .into_iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .collect();

    if !existing.iter().any(|name| name == column) {
        tracing::info!(table, column, "Applying additive column migration");
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}"))
            .execute(pool)
            .await?;
    }
    Ok(())
}
