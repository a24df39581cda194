//! Analysis records and store-level result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted result of scoring one item under one idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub record_id: i64,
    pub item_id: i64,
    pub idempotency_key: String,
    /// Compact JSON text
    pub result_payload: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an idempotent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded(i64),
    /// A record for (item, key) existed already; nothing was written
    AlreadyExists,
}

/// Natural key → item id, as returned by bulk upsert
pub type IdMapping = HashMap<String, i64>;

/// Completion summary for one signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}
