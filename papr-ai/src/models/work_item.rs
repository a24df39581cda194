//! Work items and task signatures

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one item, fetched once per task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub item_id: i64,
    /// Stable external identifier (e.g. arXiv id); defines dispatch order
    pub natural_key: String,
    /// Title
    pub primary_text: String,
    /// Abstract
    pub secondary_text: String,
    /// Landing page or document link used by enrichment
    pub external_ref: Option<String>,
    /// Previously stored enrichment value, if any
    pub enrichment: Option<String>,
}

impl WorkItem {
    pub fn needs_enrichment(&self) -> bool {
        self.enrichment
            .as_deref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
            && self
                .external_ref
                .as_deref()
                .map(|r| !r.trim().is_empty())
                .unwrap_or(false)
    }
}

/// Row accepted by bulk upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub natural_key: String,
    pub primary_text: String,
    #[serde(default)]
    pub secondary_text: String,
    #[serde(default)]
    pub external_ref: Option<String>,
}

/// Identifies which items a task covers and which processing configuration
/// decides whether an item is already done
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskSignature {
    /// Partition of items, e.g. `2025-08-01/cs.AI`
    pub domain_key: String,
    /// Processing configuration, e.g. the scoring prompt key
    pub idempotency_key: String,
}

impl TaskSignature {
    pub fn new(domain_key: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            domain_key: domain_key.into(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// Signature for a dated category partition
    pub fn for_partition(date: NaiveDate, category: &str, idempotency_key: impl Into<String>) -> Self {
        Self::new(format!("{}/{}", date.format("%Y-%m-%d"), category), idempotency_key)
    }

    /// Task identifier; one running task per signature
    pub fn task_id(&self) -> String {
        format!("{}::{}", self.domain_key, self.idempotency_key)
    }
}
