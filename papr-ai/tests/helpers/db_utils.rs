//! Database Test Utilities

use anyhow::Result;
use papr_ai::db::{init_database_pool, DedupStore, SqliteBackend, StoreBackend};
use papr_ai::models::NewWorkItem;
use papr_ai::utils::{MemoryGovernor, MemoryProbe};
use papr_common::config::{MemoryConfig, StoreConfig, TomlConfig};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Scratch database plus the store on top of it
///
/// `_temp_dir` must be kept alive for the duration of the test.
pub struct TestStore {
    pub _temp_dir: TempDir,
    pub pool: SqlitePool,
    pub backend: Arc<SqliteBackend>,
    pub store: Arc<DedupStore>,
}

/// Small pages and millisecond retries
pub fn fast_store_config() -> StoreConfig {
    StoreConfig {
        page_size: 10,
        in_chunk_size: 4,
        upsert_chunk_size: 8,
        suspect_page_sizes: vec![],
        retry_attempts: 3,
        retry_delay_ms: 1,
        busy_timeout_ms: 5000,
    }
}

/// Defaults with fast scoring retries
pub fn test_config(workers: usize) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.store = fast_store_config();
    config.orchestrator.workers = workers;
    config.orchestrator.score_attempts = 3;
    config.orchestrator.score_backoff_ms = 1;
    config.scoring.timeout_secs = 5;
    config.progress.poll_interval_ms = 5;
    config.progress.max_stream_secs = 30;
    config
}

/// Create a temporary SQLite store
pub async fn create_test_store(config: StoreConfig) -> Result<TestStore> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_papr.db");

    let pool = init_database_pool(&db_path, &config).await?;
    let backend = Arc::new(SqliteBackend::new(pool.clone()));
    let store = Arc::new(DedupStore::new(backend.clone() as Arc<dyn StoreBackend>, config));

    Ok(TestStore {
        _temp_dir: temp_dir,
        pool,
        backend,
        store,
    })
}

/// Insert `count` items into `domain_key`
///
/// Natural keys are `2508.00001` upward; titles are `paper-<n>` (1-based).
/// Returns ids in natural-key order.
pub async fn seed_domain(store: &DedupStore, domain_key: &str, count: usize) -> Result<Vec<i64>> {
    let rows: Vec<NewWorkItem> = (1..=count)
        .map(|n| NewWorkItem {
            natural_key: format!("2508.{:05}", n),
            primary_text: format!("paper-{}", n),
            secondary_text: format!("abstract of paper {}", n),
            external_ref: Some(format!("https://arxiv.org/abs/2508.{:05}", n)),
        })
        .collect();

    let mapping = store.bulk_upsert_items(&rows).await?;
    let ids: Vec<i64> = rows
        .iter()
        .filter_map(|row| mapping.get(&row.natural_key).copied())
        .collect();
    store.link_domain_items(domain_key, &ids).await?;
    Ok(ids)
}

struct ZeroProbe;

#[async_trait::async_trait]
impl MemoryProbe for ZeroProbe {
    async fn resident_bytes(&self) -> u64 {
        0
    }
}

/// Governor that never reports pressure
pub fn test_governor() -> Arc<MemoryGovernor> {
    Arc::new(MemoryGovernor::with_probe(MemoryConfig::default(), Arc::new(ZeroProbe)))
}
