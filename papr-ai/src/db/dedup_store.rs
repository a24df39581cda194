//! Idempotent, retrying store layer
//!
//! Wraps a [`StoreBackend`] with:
//! - transient-error retries on every call
//! - uniqueness conflicts translated into [`RecordOutcome::AlreadyExists`]
//! - chunked bulk writes with a row-by-row fallback
//! - explicit paging that detects backends silently truncating results

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use papr_common::config::StoreConfig;

use super::backend::StoreBackend;
use crate::error::StoreError;
use crate::models::{AnalysisRecord, IdMapping, NewWorkItem, RecordOutcome, StatusCounts, TaskSignature, WorkItem};
use crate::utils::retry::{retry_transient, RetryPolicy};

/// Offset/limit walker over a paged listing
///
/// A short page normally ends the walk. A short page whose length is one of
/// the configured suspect sizes looks like a backend-side cap instead, so
/// the walker clamps its page size to that length and keeps going until an
/// empty page comes back.
#[derive(Debug, Clone)]
pub struct PageCursor {
    label: &'static str,
    offset: usize,
    limit: usize,
    page_size: usize,
    suspect_sizes: Vec<usize>,
    exhaustive: bool,
    done: bool,
}

impl PageCursor {
    pub fn new(label: &'static str, page_size: usize, suspect_sizes: Vec<usize>) -> Self {
        let page_size = page_size.max(1);
        Self {
            label,
            offset: 0,
            limit: page_size,
            page_size,
            suspect_sizes,
            exhaustive: false,
            done: false,
        }
    }

    /// `(offset, limit)` of the next query, or `None` when the walk is over
    pub fn next_window(&self) -> Option<(usize, usize)> {
        if self.done {
            None
        } else {
            Some((self.offset, self.limit))
        }
    }

    /// Record how many rows the last query returned
    pub fn advance(&mut self, returned: usize) {
        if returned == 0 {
            self.done = true;
            return;
        }

        self.offset += returned;

        if self.exhaustive || returned >= self.limit {
            return;
        }

        if self.suspect_sizes.contains(&returned) {
            tracing::warn!(
                listing = self.label,
                returned,
                requested = self.limit,
                "Short page matches a known backend cap, switching to exhaustive paging"
            );
            self.exhaustive = true;
            self.limit = self.page_size.min(returned);
        } else {
            self.done = true;
        }
    }

    pub fn is_exhaustive(&self) -> bool {
        self.exhaustive
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Per-call accounting of a chunked write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub chunks: usize,
    pub batched_rows: usize,
    pub fallback_rows: usize,
    pub duplicates: usize,
    pub failed_rows: usize,
}

pub struct DedupStore {
    backend: Arc<dyn StoreBackend>,
    config: StoreConfig,
}

impl DedupStore {
    pub fn new(backend: Arc<dyn StoreBackend>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.config.retry_attempts, self.config.retry_delay())
    }

    pub fn page_cursor(&self, label: &'static str) -> PageCursor {
        PageCursor::new(label, self.config.page_size, self.config.suspect_page_sizes.clone())
    }

    /// Persist a result at most once per (item, key)
    pub async fn record_analysis(
        &self,
        item_id: i64,
        idempotency_key: &str,
        payload: &str,
        created_by: &str,
    ) -> Result<RecordOutcome, StoreError> {
        let backend = &self.backend;
        let result = retry_transient("record analysis", &self.policy(), move || {
            backend.insert_analysis(item_id, idempotency_key, payload, created_by)
        })
        .await;

        match result {
            Ok(record_id) => Ok(RecordOutcome::Recorded(record_id)),
            Err(StoreError::Uniqueness(_)) => {
                tracing::debug!(item_id, idempotency_key, "Analysis already recorded, skipping write");
                Ok(RecordOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn fetch_item(&self, item_id: i64) -> Result<Option<WorkItem>, StoreError> {
        let backend = &self.backend;
        retry_transient("fetch item", &self.policy(), move || backend.fetch_item(item_id)).await
    }

    pub async fn fetch_analysis(
        &self,
        item_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        let backend = &self.backend;
        retry_transient("fetch analysis", &self.policy(), move || {
            backend.fetch_analysis(item_id, idempotency_key)
        })
        .await
    }

    pub async fn set_enrichment(&self, item_id: i64, value: &str) -> Result<(), StoreError> {
        let backend = &self.backend;
        retry_transient("set enrichment", &self.policy(), move || backend.set_enrichment(item_id, value)).await
    }

    pub async fn prompt_content(&self, prompt_key: &str) -> Result<Option<String>, StoreError> {
        let backend = &self.backend;
        retry_transient("prompt lookup", &self.policy(), move || backend.prompt_content(prompt_key)).await
    }

    pub async fn upsert_prompt(&self, prompt_key: &str, content: &str) -> Result<(), StoreError> {
        let backend = &self.backend;
        retry_transient("prompt upsert", &self.policy(), move || backend.upsert_prompt(prompt_key, content)).await
    }

    /// One page of a domain's items, ascending by natural key
    pub async fn list_domain_items(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let backend = &self.backend;
        retry_transient("list domain items", &self.policy(), move || {
            backend.list_domain_items(domain_key, offset, limit)
        })
        .await
    }

    /// Which of `item_ids` already hold a record for `idempotency_key`
    ///
    /// Split into `IN` lookups of at most `in_chunk_size` ids.
    pub async fn recorded_among(&self, idempotency_key: &str, item_ids: &[i64]) -> Result<HashSet<i64>, StoreError> {
        let backend = &self.backend;
        let mut recorded = HashSet::new();
        for chunk in item_ids.chunks(self.config.in_chunk_size.max(1)) {
            let ids = retry_transient("recorded lookup", &self.policy(), move || {
                backend.recorded_among(idempotency_key, chunk)
            })
            .await?;
            recorded.extend(ids);
        }
        Ok(recorded)
    }

    /// Walk a paged listing to the end
    pub async fn collect_paged<T, F, Fut>(&self, label: &'static str, mut fetch: F) -> Result<Vec<T>, StoreError>
    where
        F: FnMut(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>, StoreError>>,
    {
        let policy = self.policy();
        let mut cursor = self.page_cursor(label);
        let mut rows = Vec::new();

        while let Some((offset, limit)) = cursor.next_window() {
            let page = retry_transient(label, &policy, || fetch(offset, limit)).await?;
            cursor.advance(page.len());
            rows.extend(page);
        }

        tracing::debug!(listing = label, rows = rows.len(), exhaustive = cursor.is_exhaustive(), "Paged listing complete");
        Ok(rows)
    }

    /// `{total, completed, pending}` for a signature, read from the store
    pub async fn status_for(&self, signature: &TaskSignature) -> Result<StatusCounts, StoreError> {
        let backend = &self.backend;
        let domain_key = signature.domain_key.as_str();
        let idempotency_key = signature.idempotency_key.as_str();

        let domain_ids: HashSet<i64> = self
            .collect_paged("domain item ids", move |offset, limit| {
                backend.list_domain_item_ids(domain_key, offset, limit)
            })
            .await?
            .into_iter()
            .collect();

        let recorded: HashSet<i64> = self
            .collect_paged("recorded item ids", move |offset, limit| {
                backend.list_recorded_item_ids(domain_key, idempotency_key, offset, limit)
            })
            .await?
            .into_iter()
            .collect();

        let completed = domain_ids.intersection(&recorded).count();
        let counts = StatusCounts {
            total: domain_ids.len(),
            completed,
            pending: domain_ids.len() - completed,
        };

        tracing::debug!(
            domain_key,
            idempotency_key,
            total = counts.total,
            completed = counts.completed,
            pending = counts.pending,
            "Computed status"
        );
        Ok(counts)
    }

    /// Insert or update items and return their ids keyed by natural key
    pub async fn bulk_upsert_items(&self, rows: &[NewWorkItem]) -> Result<IdMapping, StoreError> {
        let (mapping, _) = self.bulk_upsert_items_reported(rows).await?;
        Ok(mapping)
    }

    /// [`Self::bulk_upsert_items`] plus how the rows were written
    ///
    /// Rows replayed one by one after a failed chunk are plain inserts, so an
    /// existing natural key counts as a duplicate and keeps its stored text.
    pub async fn bulk_upsert_items_reported(
        &self,
        rows: &[NewWorkItem],
    ) -> Result<(IdMapping, ChunkReport), StoreError> {
        let backend = Arc::clone(&self.backend);
        let report = self
            .write_in_chunks(
                "item upsert",
                rows,
                |chunk: Vec<NewWorkItem>| {
                    let backend = Arc::clone(&backend);
                    async move { backend.upsert_items(&chunk).await }
                },
                |row: NewWorkItem| {
                    let backend = Arc::clone(&backend);
                    async move { backend.insert_item(&row).await }
                },
            )
            .await;

        tracing::info!(
            rows = rows.len(),
            chunks = report.chunks,
            fallback_rows = report.fallback_rows,
            duplicates = report.duplicates,
            failed_rows = report.failed_rows,
            "Bulk item upsert finished"
        );

        let keys: Vec<String> = rows.iter().map(|r| r.natural_key.clone()).collect();
        let mut mapping = IdMapping::with_capacity(keys.len());
        for chunk in keys.chunks(self.config.in_chunk_size.max(1)) {
            let backend = &self.backend;
            let pairs = retry_transient("item id lookup", &self.policy(), move || backend.lookup_item_ids(chunk)).await?;
            mapping.extend(pairs);
        }
        Ok((mapping, report))
    }

    /// Attach items to a domain; existing memberships are kept
    pub async fn link_domain_items(&self, domain_key: &str, item_ids: &[i64]) -> Result<ChunkReport, StoreError> {
        let backend = Arc::clone(&self.backend);
        let domain = domain_key.to_string();
        let report = self
            .write_in_chunks(
                "membership upsert",
                item_ids,
                |chunk: Vec<i64>| {
                    let backend = Arc::clone(&backend);
                    let domain = domain.clone();
                    async move { backend.upsert_memberships(&domain, &chunk).await }
                },
                |item_id: i64| {
                    let backend = Arc::clone(&backend);
                    let domain = domain.clone();
                    async move { backend.insert_membership(&domain, item_id).await }
                },
            )
            .await;

        tracing::info!(
            domain_key,
            items = item_ids.len(),
            fallback_rows = report.fallback_rows,
            failed_rows = report.failed_rows,
            "Domain membership linked"
        );
        Ok(report)
    }

    /// Write `rows` in chunks; a chunk that still fails after its retries is
    /// replayed one row at a time with uniqueness conflicts ignored
    async fn write_in_chunks<T, B, BFut, R, RFut>(
        &self,
        label: &'static str,
        rows: &[T],
        batch: B,
        single: R,
    ) -> ChunkReport
    where
        T: Clone,
        B: Fn(Vec<T>) -> BFut,
        BFut: Future<Output = Result<(), StoreError>>,
        R: Fn(T) -> RFut,
        RFut: Future<Output = Result<(), StoreError>>,
    {
        let policy = self.policy();
        let mut report = ChunkReport::default();

        for (index, chunk) in rows.chunks(self.config.upsert_chunk_size.max(1)).enumerate() {
            report.chunks += 1;

            match retry_transient(label, &policy, || batch(chunk.to_vec())).await {
                Ok(()) => {
                    report.batched_rows += chunk.len();
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        operation = label,
                        chunk = index,
                        rows = chunk.len(),
                        error = %e,
                        "Chunk write failed, falling back to row-by-row inserts"
                    );
                }
            }

            for row in chunk {
                match retry_transient(label, &policy, || single(row.clone())).await {
                    Ok(()) => report.fallback_rows += 1,
                    Err(StoreError::Uniqueness(_)) => report.duplicates += 1,
                    Err(e) => {
                        report.failed_rows += 1;
                        tracing::warn!(operation = label, chunk = index, error = %e, "Row insert failed");
                    }
                }
            }
        }

        report
    }
}
