//! Pending work item resolution
//!
//! Pages through a domain in ascending natural-key order and keeps the items
//! that have no analysis record for the signature's idempotency key.

use std::sync::Arc;

use crate::db::DedupStore;
use crate::error::StoreError;
use crate::models::{TaskSignature, WorkItem};

pub struct WorkItemResolver {
    store: Arc<DedupStore>,
}

impl WorkItemResolver {
    pub fn new(store: Arc<DedupStore>) -> Self {
        Self { store }
    }

    /// Up to `cap` pending items (all of them when `cap` is `None`)
    pub async fn resolve(&self, signature: &TaskSignature, cap: Option<usize>) -> Result<Vec<WorkItem>, StoreError> {
        let cap = cap.unwrap_or(usize::MAX);
        let mut pending = Vec::new();
        if cap == 0 {
            return Ok(pending);
        }

        let mut scanned = 0usize;
        let mut cursor = self.store.page_cursor("domain items");

        'pages: while let Some((offset, limit)) = cursor.next_window() {
            let page = self
                .store
                .list_domain_items(&signature.domain_key, offset, limit)
                .await?;
            cursor.advance(page.len());
            scanned += page.len();

            if page.is_empty() {
                break;
            }

            let ids: Vec<i64> = page.iter().map(|item| item.item_id).collect();
            let recorded = self.store.recorded_among(&signature.idempotency_key, &ids).await?;

            for item in page {
                if recorded.contains(&item.item_id) {
                    continue;
                }
                pending.push(item);
                if pending.len() >= cap {
                    break 'pages;
                }
            }
        }

        tracing::info!(
            domain_key = %signature.domain_key,
            idempotency_key = %signature.idempotency_key,
            scanned,
            pending = pending.len(),
            "Resolved pending work items"
        );

        Ok(pending)
    }
}
