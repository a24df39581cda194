//! Mock collaborators: scoring, enrichment, and a truncating store backend

use async_trait::async_trait;
use papr_ai::db::{SqliteBackend, StoreBackend};
use papr_ai::error::{ClientError, EnrichmentError, SetupError, StoreError};
use papr_ai::models::{AnalysisRecord, NewWorkItem, ScoreOutcome, TaskSignature, WorkItem};
use papr_ai::services::{Enricher, ScorerProvider, ScoringClient};
use papr_ai::utils::BoundedBuffer;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scorer replaying scripted outcomes per title
///
/// Titles without a script (or whose script ran out) get the default
/// outcome, `{"pass_filter": false}` unless changed.
pub struct ScriptedScorer {
    scripts: Mutex<HashMap<String, VecDeque<ScoreOutcome>>>,
    calls: Mutex<HashMap<String, usize>>,
    default: ScoreOutcome,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedScorer {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            default: ScoreOutcome::Parsed(json!({"pass_filter": false, "score": 3})),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_default(mut self, outcome: ScoreOutcome) -> Self {
        self.default = outcome;
        self
    }

    pub fn script(self, title: &str, outcomes: Vec<ScoreOutcome>) -> Self {
        self.scripts.lock().insert(title.to_string(), outcomes.into());
        self
    }

    pub fn calls_for(&self, title: &str) -> usize {
        self.calls.lock().get(title).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringClient for ScriptedScorer {
    async fn score(&self, primary_text: &str, _secondary_text: &str) -> ScoreOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        *self.calls.lock().entry(primary_text.to_string()).or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(primary_text)
            .and_then(|queue| queue.pop_front());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| self.default.clone())
    }
}

/// Hands out the same scorer for every task
pub struct StaticScorerProvider(pub Arc<dyn ScoringClient>);

#[async_trait]
impl ScorerProvider for StaticScorerProvider {
    async fn connect(&self, _signature: &TaskSignature) -> Result<Arc<dyn ScoringClient>, SetupError> {
        Ok(Arc::clone(&self.0))
    }
}

/// Setup always fails as if the API key were missing
pub struct FailingScorerProvider;

#[async_trait]
impl ScorerProvider for FailingScorerProvider {
    async fn connect(&self, _signature: &TaskSignature) -> Result<Arc<dyn ScoringClient>, SetupError> {
        Err(SetupError::MissingConfig("scoring.api_key is not set".to_string()))
    }
}

/// Every download fails with the given kind of error
pub struct FailingEnricher {
    pub transient: bool,
    pub downloads: AtomicUsize,
}

impl FailingEnricher {
    pub fn new(transient: bool) -> Self {
        Self {
            transient,
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for FailingEnricher {
    async fn download(&self, external_ref: &str) -> Result<BoundedBuffer, EnrichmentError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(EnrichmentError::Download(ClientError::Network(format!(
                "connection reset fetching {}",
                external_ref
            ))))
        } else {
            Err(EnrichmentError::Download(ClientError::Api {
                status: 404,
                message: format!("GET {}", external_ref),
            }))
        }
    }

    fn extract_lead_text(&self, _bytes: &[u8]) -> Result<String, EnrichmentError> {
        Err(EnrichmentError::Extraction("unreachable".to_string()))
    }

    async fn lookup(&self, _lead_text: &str) -> Result<Vec<String>, EnrichmentError> {
        Ok(Vec::new())
    }
}

/// Downloads the reference string itself and returns fixed entries
pub struct FixedEnricher {
    pub entries: Vec<String>,
    pub buffer_cap: usize,
    pub downloads: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl FixedEnricher {
    pub fn new(entries: &[&str]) -> Self {
        Self {
            entries: entries.iter().map(|e| e.to_string()).collect(),
            buffer_cap: 8,
            downloads: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for FixedEnricher {
    async fn download(&self, external_ref: &str) -> Result<BoundedBuffer, EnrichmentError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let mut buffer = BoundedBuffer::new(self.buffer_cap);
        for chunk in external_ref.as_bytes().chunks(5) {
            buffer.write(chunk)?;
        }
        Ok(buffer)
    }

    fn extract_lead_text(&self, bytes: &[u8]) -> Result<String, EnrichmentError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| EnrichmentError::Extraction(e.to_string()))
    }

    async fn lookup(&self, lead_text: &str) -> Result<Vec<String>, EnrichmentError> {
        assert!(lead_text.starts_with("https://"), "lead text should be the downloaded bytes");
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.clone())
    }
}

/// Backend whose batch writes always fail with a transient error
///
/// Single-row inserts and everything else go to the real backend.
pub struct FailingBatchBackend {
    pub inner: Arc<SqliteBackend>,
    pub batch_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
}

impl FailingBatchBackend {
    pub fn new(inner: Arc<SqliteBackend>) -> Self {
        Self {
            inner,
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.batch_calls.store(0, Ordering::SeqCst);
        self.single_calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreBackend for FailingBatchBackend {
    async fn fetch_item(&self, item_id: i64) -> Result<Option<WorkItem>, StoreError> {
        self.inner.fetch_item(item_id).await
    }

    async fn list_domain_items(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        self.inner.list_domain_items(domain_key, offset, limit).await
    }

    async fn list_domain_item_ids(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        self.inner.list_domain_item_ids(domain_key, offset, limit).await
    }

    async fn list_recorded_item_ids(
        &self,
        domain_key: &str,
        idempotency_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        self.inner
            .list_recorded_item_ids(domain_key, idempotency_key, offset, limit)
            .await
    }

    async fn recorded_among(&self, idempotency_key: &str, item_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        self.inner.recorded_among(idempotency_key, item_ids).await
    }

    async fn insert_analysis(
        &self,
        item_id: i64,
        idempotency_key: &str,
        payload: &str,
        created_by: &str,
    ) -> Result<i64, StoreError> {
        self.inner.insert_analysis(item_id, idempotency_key, payload, created_by).await
    }

    async fn fetch_analysis(&self, item_id: i64, idempotency_key: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        self.inner.fetch_analysis(item_id, idempotency_key).await
    }

    async fn set_enrichment(&self, item_id: i64, value: &str) -> Result<(), StoreError> {
        self.inner.set_enrichment(item_id, value).await
    }

    async fn upsert_items(&self, _rows: &[NewWorkItem]) -> Result<(), StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Transient("database is locked".to_string()))
    }

    async fn insert_item(&self, row: &NewWorkItem) -> Result<(), StoreError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_item(row).await
    }

    async fn lookup_item_ids(&self, natural_keys: &[String]) -> Result<Vec<(String, i64)>, StoreError> {
        self.inner.lookup_item_ids(natural_keys).await
    }

    async fn upsert_memberships(&self, _domain_key: &str, _item_ids: &[i64]) -> Result<(), StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Transient("database is locked".to_string()))
    }

    async fn insert_membership(&self, domain_key: &str, item_id: i64) -> Result<(), StoreError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_membership(domain_key, item_id).await
    }

    async fn prompt_content(&self, prompt_key: &str) -> Result<Option<String>, StoreError> {
        self.inner.prompt_content(prompt_key).await
    }

    async fn upsert_prompt(&self, prompt_key: &str, content: &str) -> Result<(), StoreError> {
        self.inner.upsert_prompt(prompt_key, content).await
    }
}

/// Backend whose listings silently return at most `cap` rows
pub struct TruncatingBackend {
    pub inner: Arc<SqliteBackend>,
    pub cap: usize,
}

#[async_trait]
impl StoreBackend for TruncatingBackend {
    async fn fetch_item(&self, item_id: i64) -> Result<Option<WorkItem>, StoreError> {
        self.inner.fetch_item(item_id).await
    }

    async fn list_domain_items(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        self.inner.list_domain_items(domain_key, offset, limit.min(self.cap)).await
    }

    async fn list_domain_item_ids(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        self.inner.list_domain_item_ids(domain_key, offset, limit.min(self.cap)).await
    }

    async fn list_recorded_item_ids(
        &self,
        domain_key: &str,
        idempotency_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        self.inner
            .list_recorded_item_ids(domain_key, idempotency_key, offset, limit.min(self.cap))
            .await
    }

    async fn recorded_among(&self, idempotency_key: &str, item_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        self.inner.recorded_among(idempotency_key, item_ids).await
    }

    async fn insert_analysis(
        &self,
        item_id: i64,
        idempotency_key: &str,
        payload: &str,
        created_by: &str,
    ) -> Result<i64, StoreError> {
        self.inner.insert_analysis(item_id, idempotency_key, payload, created_by).await
    }

    async fn fetch_analysis(&self, item_id: i64, idempotency_key: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        self.inner.fetch_analysis(item_id, idempotency_key).await
    }

    async fn set_enrichment(&self, item_id: i64, value: &str) -> Result<(), StoreError> {
        self.inner.set_enrichment(item_id, value).await
    }

    async fn upsert_items(&self, rows: &[NewWorkItem]) -> Result<(), StoreError> {
        self.inner.upsert_items(rows).await
    }

    async fn insert_item(&self, row: &NewWorkItem) -> Result<(), StoreError> {
        self.inner.insert_item(row).await
    }

    async fn lookup_item_ids(&self, natural_keys: &[String]) -> Result<Vec<(String, i64)>, StoreError> {
        self.inner.lookup_item_ids(natural_keys).await
    }

    async fn upsert_memberships(&self, domain_key: &str, item_ids: &[i64]) -> Result<(), StoreError> {
        self.inner.upsert_memberships(domain_key, item_ids).await
    }

    async fn insert_membership(&self, domain_key: &str, item_id: i64) -> Result<(), StoreError> {
        self.inner.insert_membership(domain_key, item_id).await
    }

    async fn prompt_content(&self, prompt_key: &str) -> Result<Option<String>, StoreError> {
        self.inner.prompt_content(prompt_key).await
    }

    async fn upsert_prompt(&self, prompt_key: &str, content: &str) -> Result<(), StoreError> {
        self.inner.upsert_prompt(prompt_key, content).await
    }
}
