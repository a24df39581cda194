//! Progress types shared between the orchestrator and its observers
//!
//! A [`ProgressSnapshot`] is the single mutable progress record of one task.
//! Observers never touch it directly; they receive clones wrapped in
//! [`ProgressEvent`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle state
///
/// `starting → processing → {fetching_enrichment ↔ processing} → completed | error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Starting,
    Processing,
    FetchingEnrichment,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Starting => "starting",
            TaskStatus::Processing => "processing",
            TaskStatus::FetchingEnrichment => "fetching_enrichment",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

/// What a worker is currently doing with its item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPhase {
    Scoring,
    Recording,
    Enriching,
}

/// One in-flight item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveItem {
    pub item_id: i64,
    pub natural_key: String,
    pub phase: ItemPhase,
    pub started_at: DateTime<Utc>,
}

/// Outcome of the most recently finished item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: i64,
    pub natural_key: String,
    pub success: bool,
    /// Failure reason, or a short note such as "already recorded"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Counts frozen when the task reaches `completed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalStats {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    pub elapsed_secs: f64,
    pub avg_secs_per_item: f64,
    pub workers: usize,
    pub cancelled: bool,
}

/// Live progress record of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub total: usize,
    /// Completed items (success or failure); never decreases
    pub current: usize,
    pub status: TaskStatus,
    /// Most recently dispatched item
    pub current_item: Option<String>,
    pub last_result: Option<ItemResult>,
    pub success_count: usize,
    pub error_count: usize,
    pub active_items: Vec<ActiveItem>,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub final_stats: Option<FinalStats>,
    pub error_message: Option<String>,
}

impl ProgressSnapshot {
    pub fn new(task_id: impl Into<String>, workers: usize) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            total: 0,
            current: 0,
            status: TaskStatus::Starting,
            current_item: None,
            last_result: None,
            success_count: 0,
            error_count: 0,
            active_items: Vec::new(),
            workers,
            started_at: now,
            updated_at: now,
            final_stats: None,
            error_message: None,
        }
    }

    /// Move to a new status
    ///
    /// Terminal states are sticky: returns false and leaves the snapshot
    /// unchanged if the task already finished.
    pub fn transition_to(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Count one finished item and record it as the last result
    ///
    /// Counts are frozen once the task is terminal; returns false then.
    pub fn record_item_finished(&mut self, result: ItemResult) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.active_items.retain(|a| a.item_id != result.item_id);
        if result.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.current += 1;
        self.last_result = Some(result);
        self.updated_at = Utc::now();
        true
    }

    /// Fraction of items completed (0.0 when nothing is pending)
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64) * 100.0
        }
    }
}

/// Event delivered to progress observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// A changed (or initial/terminal) snapshot
    Snapshot { snapshot: ProgressSnapshot },

    /// The observer's wall-clock budget ran out before the task finished
    Timeout {
        task_id: String,
        elapsed_secs: u64,
        last_status: TaskStatus,
    },
}

impl ProgressEvent {
    pub fn event_type(&self) -> &str {
        match self {
            ProgressEvent::Snapshot { .. } => "Snapshot",
            ProgressEvent::Timeout { .. } => "Timeout",
        }
    }

    pub fn snapshot(&self) -> Option<&ProgressSnapshot> {
        match self {
            ProgressEvent::Snapshot { snapshot } => Some(snapshot),
            ProgressEvent::Timeout { .. } => None,
        }
    }
}
