//! Database access for papr-ai
//!
//! - [`StoreBackend`]: the narrow set of queries the analysis pipeline needs
//! - [`SqliteBackend`]: the SQLite implementation
//! - [`DedupStore`]: retrying, chunking, idempotent layer on top of a backend

pub mod backend;
pub mod dedup_store;
pub mod sqlite;

pub use backend::StoreBackend;
pub use dedup_store::{ChunkReport, DedupStore};
pub use sqlite::SqliteBackend;

use papr_common::config::StoreConfig;
use papr_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the file and its parent directory if missing, then creates the
/// tables idempotently.
pub async fn init_database_pool(db_path: &Path, config: &StoreConfig) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!(
        path = %db_path.display(),
        busy_timeout_ms = config.busy_timeout_ms,
        "Connecting to database"
    );

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_millis(config.busy_timeout_ms.max(1000)))
        .connect_with(options)
        .await
        .map_err(Error::Database)?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_items (
            item_id INTEGER PRIMARY KEY AUTOINCREMENT,
            natural_key TEXT NOT NULL UNIQUE,
            primary_text TEXT NOT NULL,
            secondary_text TEXT NOT NULL DEFAULT '',
            external_ref TEXT,
            enrichment TEXT,
            ingested_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS domain_items (
            domain_key TEXT NOT NULL,
            item_id INTEGER NOT NULL REFERENCES work_items(item_id),
            PRIMARY KEY (domain_key, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_records (
            record_id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id INTEGER NOT NULL REFERENCES work_items(item_id),
            idempotency_key TEXT NOT NULL,
            result_payload TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (item_id, idempotency_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompts (
            prompt_key TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_records_key ON analysis_records(idempotency_key, item_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (work_items, domain_items, analysis_records, prompts)");

    Ok(())
}
