//! Per-task shared state
//!
//! One [`TaskContext`] exists per submitted task. It owns the progress
//! snapshot (behind a single lock), the cancellation token, and the
//! completion signal that [`TaskContext::wait`] blocks on.

use chrono::Utc;
use papr_common::events::{ActiveItem, FinalStats, ItemPhase, ItemResult, ProgressSnapshot, TaskStatus};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{TaskSignature, WorkItem};

pub struct TaskContext {
    task_id: String,
    signature: TaskSignature,
    run_id: Uuid,
    snapshot: Mutex<ProgressSnapshot>,
    cancel_token: CancellationToken,
    done_tx: watch::Sender<bool>,
    finished_at: Mutex<Option<Instant>>,
}

impl TaskContext {
    pub fn new(signature: TaskSignature, workers: usize) -> Self {
        let task_id = signature.task_id();
        let (done_tx, _) = watch::channel(false);
        Self {
            snapshot: Mutex::new(ProgressSnapshot::new(task_id.clone(), workers)),
            task_id,
            signature,
            run_id: Uuid::new_v4(),
            cancel_token: CancellationToken::new(),
            done_tx,
            finished_at: Mutex::new(None),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn signature(&self) -> &TaskSignature {
        &self.signature
    }

    /// Distinguishes two runs of the same task id
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Stop dispatching; in-flight items still finish
    pub fn cancel(&self) {
        if !self.cancel_token.is_cancelled() {
            tracing::info!(task_id = %self.task_id, "Cancellation requested");
        }
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Copy of the current progress record
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.snapshot.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// How long ago the task reached a terminal state
    pub fn finished_for(&self) -> Option<Duration> {
        self.finished_at.lock().map(|at| at.elapsed())
    }

    /// Counts recorded so far, or the frozen stats once completed
    pub fn frozen_stats(&self) -> FinalStats {
        let snapshot = self.snapshot.lock();
        snapshot.final_stats.clone().unwrap_or(FinalStats {
            total: snapshot.total,
            success: snapshot.success_count,
            errors: snapshot.error_count,
            elapsed_secs: 0.0,
            avg_secs_per_item: 0.0,
            workers: snapshot.workers,
            cancelled: self.cancel_token.is_cancelled(),
        })
    }

    // Every mutator below leaves a terminal snapshot untouched.

    pub fn begin_processing(&self, total: usize) {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_terminal() {
            return;
        }
        snapshot.total = total;
        snapshot.transition_to(TaskStatus::Processing);
    }

    pub fn item_dispatched(&self, item: &WorkItem) {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_terminal() {
            return;
        }
        snapshot.current_item = Some(item.natural_key.clone());
        snapshot.active_items.push(ActiveItem {
            item_id: item.item_id,
            natural_key: item.natural_key.clone(),
            phase: ItemPhase::Scoring,
            started_at: Utc::now(),
        });
        snapshot.updated_at = Utc::now();
    }

    /// Move one active item to `phase`
    ///
    /// Entering enrichment switches the task status to `fetching_enrichment`;
    /// leaving it switches back to `processing` once no other item is
    /// enriching.
    pub fn set_item_phase(&self, item_id: i64, phase: ItemPhase) {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_terminal() {
            return;
        }
        if let Some(active) = snapshot.active_items.iter_mut().find(|a| a.item_id == item_id) {
            active.phase = phase;
        }

        if phase == ItemPhase::Enriching {
            snapshot.transition_to(TaskStatus::FetchingEnrichment);
        } else if snapshot.status == TaskStatus::FetchingEnrichment
            && !snapshot.active_items.iter().any(|a| a.phase == ItemPhase::Enriching)
        {
            snapshot.transition_to(TaskStatus::Processing);
        }
        snapshot.updated_at = Utc::now();
    }

    pub fn item_finished(&self, result: ItemResult) {
        let mut snapshot = self.snapshot.lock();
        if !snapshot.record_item_finished(result) {
            return;
        }
        if snapshot.status == TaskStatus::FetchingEnrichment
            && !snapshot.active_items.iter().any(|a| a.phase == ItemPhase::Enriching)
        {
            snapshot.transition_to(TaskStatus::Processing);
        }
    }

    /// Freeze counts and mark the task completed
    pub fn complete(&self, stats: FinalStats) {
        {
            let mut snapshot = self.snapshot.lock();
            if snapshot.is_terminal() {
                return;
            }
            snapshot.active_items.clear();
            snapshot.final_stats = Some(stats);
            snapshot.transition_to(TaskStatus::Completed);
        }
        self.mark_finished();
    }

    /// Mark the task failed before any item was dispatched
    pub fn fail(&self, message: impl Into<String>) {
        {
            let mut snapshot = self.snapshot.lock();
            if snapshot.is_terminal() {
                return;
            }
            snapshot.error_message = Some(message.into());
            snapshot.transition_to(TaskStatus::Error);
        }
        self.mark_finished();
    }

    fn mark_finished(&self) {
        self.finished_at.lock().get_or_insert_with(Instant::now);
        self.done_tx.send_replace(true);
    }

    /// Resolve once the task reaches `completed` or `error`
    pub async fn wait(&self) -> ProgressSnapshot {
        let mut rx = self.done_tx.subscribe();
        // sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|done| *done).await;
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(item_id: i64) -> WorkItem {
        WorkItem {
            item_id,
            natural_key: format!("2501.{:05}", item_id),
            primary_text: "t".into(),
            secondary_text: "a".into(),
            external_ref: None,
            enrichment: None,
        }
    }

    fn context() -> TaskContext {
        TaskContext::new(TaskSignature::new("2025-01-01/cs.AI", "prompt"), 2)
    }

    fn stats(total: usize) -> FinalStats {
        FinalStats {
            total,
            success: total,
            errors: 0,
            elapsed_secs: 0.0,
            avg_secs_per_item: 0.0,
            workers: 2,
            cancelled: false,
        }
    }

    #[test]
    fn test_enrichment_phase_drives_task_status() {
        let ctx = context();
        ctx.begin_processing(2);
        ctx.item_dispatched(&item(1));
        ctx.item_dispatched(&item(2));

        ctx.set_item_phase(1, ItemPhase::Enriching);
        ctx.set_item_phase(2, ItemPhase::Enriching);
        assert_eq!(ctx.status(), TaskStatus::FetchingEnrichment);

        ctx.set_item_phase(1, ItemPhase::Recording);
        assert_eq!(ctx.status(), TaskStatus::FetchingEnrichment);

        ctx.set_item_phase(2, ItemPhase::Recording);
        assert_eq!(ctx.status(), TaskStatus::Processing);
    }

    #[test]
    fn test_fail_is_terminal_and_sticky() {
        let ctx = context();
        ctx.fail("scoring.api_key is not set");
        ctx.begin_processing(3);

        ctx.item_dispatched(&item(1));
        ctx.item_finished(ItemResult {
            item_id: 1,
            natural_key: "2501.00001".into(),
            success: true,
            message: None,
        });
        ctx.complete(stats(1));

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Error);
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.current, 0);
        assert_eq!(snapshot.success_count, 0);
        assert!(snapshot.active_items.is_empty());
        assert!(snapshot.last_result.is_none());
        assert!(snapshot.final_stats.is_none());
        assert_eq!(snapshot.error_message.as_deref(), Some("scoring.api_key is not set"));
        assert!(ctx.finished_for().is_some());
    }

    #[test]
    fn test_completed_counts_are_frozen() {
        let ctx = context();
        ctx.begin_processing(1);
        ctx.complete(stats(0));
        ctx.fail("late failure");
        ctx.begin_processing(5);

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.total, 1);
        assert!(snapshot.error_message.is_none());
        assert_eq!(ctx.frozen_stats(), stats(0));
    }

    #[tokio::test]
    async fn test_wait_returns_after_completion() {
        let ctx = std::sync::Arc::new(context());
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.wait().await })
        };

        ctx.begin_processing(0);
        ctx.complete(stats(0));

        let snapshot = waiter.await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
    }
}
