//! Task orchestrator
//!
//! Runs a resolved item list through a fixed pool of workers.
//!
//! # State Progression
//! STARTING → PROCESSING → {FETCHING_ENRICHMENT ↔ PROCESSING} → COMPLETED
//!
//! ERROR is only reached through [`TaskContext::fail`], before dispatch.
//!
//! Items are dispatched in the order given (ascending natural key) with at
//! most `workers` in flight. Each item runs on its own spawned task so slow
//! network calls overlap across runtime threads; completion order is
//! whatever the external calls make it.

mod context;
mod worker;

pub use context::TaskContext;

use futures::stream::{FuturesUnordered, StreamExt};
use papr_common::config::OrchestratorConfig;
use papr_common::events::{FinalStats, ItemResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::DedupStore;
use crate::models::WorkItem;
use crate::services::enrichment::EnrichmentPipeline;
use crate::services::scoring_client::ScoringClient;
use crate::utils::retry::RetryPolicy;
use worker::ItemWorker;

pub struct TaskOrchestrator {
    store: Arc<DedupStore>,
    scorer: Arc<dyn ScoringClient>,
    enrichment: Option<Arc<EnrichmentPipeline>>,
    config: OrchestratorConfig,
    score_timeout: Duration,
}

impl TaskOrchestrator {
    /// # Arguments
    /// * `store` - Idempotent result store
    /// * `scorer` - External scoring call for this task
    /// * `config` - Pool size, retry bounds and result handling
    /// * `score_timeout` - Per-call bound on each scoring attempt
    pub fn new(
        store: Arc<DedupStore>,
        scorer: Arc<dyn ScoringClient>,
        config: OrchestratorConfig,
        score_timeout: Duration,
    ) -> Self {
        Self {
            store,
            scorer,
            enrichment: None,
            config,
            score_timeout,
        }
    }

    /// Enable enrichment of positive items
    pub fn with_enrichment(mut self, pipeline: Arc<EnrichmentPipeline>) -> Self {
        self.enrichment = Some(pipeline);
        self
    }

    pub fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    /// Process `items` and complete the task
    ///
    /// Returns the frozen final stats. Cancellation through the context's
    /// token stops further dispatch; items already in flight finish. A
    /// context that already finished is left as is.
    pub async fn run(&self, ctx: Arc<TaskContext>, items: Vec<WorkItem>) -> FinalStats {
        if ctx.is_finished() {
            tracing::warn!(
                task_id = %ctx.task_id(),
                status = ctx.status().as_str(),
                skipped = items.len(),
                "Task already finished, nothing dispatched"
            );
            return ctx.frozen_stats();
        }

        let start = Instant::now();
        let total = items.len();
        let workers = self.workers();

        ctx.begin_processing(total);
        tracing::info!(
            task_id = %ctx.task_id(),
            run_id = %ctx.run_id(),
            total,
            workers,
            "Starting item processing"
        );

        let worker = Arc::new(ItemWorker {
            store: Arc::clone(&self.store),
            scorer: Arc::clone(&self.scorer),
            enrichment: self.enrichment.clone(),
            idempotency_key: ctx.signature().idempotency_key.clone(),
            positive_field: self.config.positive_field.clone(),
            created_by: self.config.created_by.clone(),
            score_policy: RetryPolicy::exponential(
                self.config.score_attempts,
                Duration::from_millis(self.config.score_backoff_ms),
            ),
            score_timeout: self.score_timeout,
        });

        let mut queue = items.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            // Refill the pool up to `workers`
            while in_flight.len() < workers && !ctx.is_cancelled() {
                let Some(item) = queue.next() else {
                    break;
                };

                ctx.item_dispatched(&item);
                let item_id = item.item_id;
                let natural_key = item.natural_key.clone();
                let worker = Arc::clone(&worker);
                let task_ctx = Arc::clone(&ctx);
                let handle = tokio::spawn(async move { worker.process(&task_ctx, item).await });
                in_flight.push(async move { (item_id, natural_key, handle.await) });
            }

            let Some((item_id, natural_key, joined)) = in_flight.next().await else {
                break;
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(task_id = %ctx.task_id(), item_id, error = %e, "Worker task failed");
                    ItemResult {
                        item_id,
                        natural_key,
                        success: false,
                        message: Some(format!("worker task failed: {}", e)),
                    }
                }
            };
            ctx.item_finished(result);
        }

        let skipped = queue.len();
        let snapshot = ctx.snapshot();
        let elapsed_secs = start.elapsed().as_secs_f64();
        let stats = FinalStats {
            total,
            success: snapshot.success_count,
            errors: snapshot.error_count,
            elapsed_secs,
            avg_secs_per_item: if snapshot.current > 0 {
                elapsed_secs / snapshot.current as f64
            } else {
                0.0
            },
            workers,
            cancelled: ctx.is_cancelled(),
        };

        if stats.cancelled {
            tracing::info!(task_id = %ctx.task_id(), processed = snapshot.current, skipped, "Task cancelled");
        }
        tracing::info!(
            task_id = %ctx.task_id(),
            total = stats.total,
            success = stats.success,
            errors = stats.errors,
            elapsed_secs = stats.elapsed_secs,
            avg_secs_per_item = stats.avg_secs_per_item,
            "Task completed"
        );

        ctx.complete(stats.clone());
        stats
    }
}
