//! Backing store seam
//!
//! Every listing takes an explicit `offset`/`limit`. Implementations must not
//! silently cap results beyond `limit`, but [`crate::db::DedupStore`] still
//! guards against backends that do.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{AnalysisRecord, NewWorkItem, WorkItem};

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn fetch_item(&self, item_id: i64) -> Result<Option<WorkItem>, StoreError>;

    /// Items of a domain in ascending natural-key order
    async fn list_domain_items(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Item ids of a domain in ascending id order
    async fn list_domain_item_ids(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError>;

    /// Ids of domain items holding a record for `idempotency_key`, ascending
    async fn list_recorded_item_ids(
        &self,
        domain_key: &str,
        idempotency_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError>;

    /// Subset of `item_ids` holding a record for `idempotency_key`
    async fn recorded_among(&self, idempotency_key: &str, item_ids: &[i64]) -> Result<Vec<i64>, StoreError>;

    /// Plain insert; a duplicate (item, key) surfaces as [`StoreError::Uniqueness`]
    async fn insert_analysis(
        &self,
        item_id: i64,
        idempotency_key: &str,
        payload: &str,
        created_by: &str,
    ) -> Result<i64, StoreError>;

    async fn fetch_analysis(&self, item_id: i64, idempotency_key: &str) -> Result<Option<AnalysisRecord>, StoreError>;

    async fn set_enrichment(&self, item_id: i64, value: &str) -> Result<(), StoreError>;

    /// Multi-row insert-or-update keyed on natural key
    async fn upsert_items(&self, rows: &[NewWorkItem]) -> Result<(), StoreError>;

    /// Single-row plain insert; a duplicate surfaces as [`StoreError::Uniqueness`]
    async fn insert_item(&self, row: &NewWorkItem) -> Result<(), StoreError>;

    /// (natural_key, item_id) pairs for the keys that exist
    async fn lookup_item_ids(&self, natural_keys: &[String]) -> Result<Vec<(String, i64)>, StoreError>;

    /// Multi-row domain membership insert; existing pairs are left alone
    async fn upsert_memberships(&self, domain_key: &str, item_ids: &[i64]) -> Result<(), StoreError>;

    /// Single membership insert; a duplicate surfaces as [`StoreError::Uniqueness`]
    async fn insert_membership(&self, domain_key: &str, item_id: i64) -> Result<(), StoreError>;

    async fn prompt_content(&self, prompt_key: &str) -> Result<Option<String>, StoreError>;

    async fn upsert_prompt(&self, prompt_key: &str, content: &str) -> Result<(), StoreError>;
}
