//! Single-item pipeline: score → record → (enrich)

use papr_common::events::{ItemPhase, ItemResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::context::TaskContext;
use crate::db::DedupStore;
use crate::models::{RecordOutcome, ScoreOutcome, WorkItem};
use crate::services::enrichment::EnrichmentPipeline;
use crate::services::scoring_client::ScoringClient;
use crate::utils::retry::{retry, RetryError, RetryPolicy};

pub(super) struct ItemWorker {
    pub store: Arc<DedupStore>,
    pub scorer: Arc<dyn ScoringClient>,
    pub enrichment: Option<Arc<EnrichmentPipeline>>,
    pub idempotency_key: String,
    pub positive_field: String,
    pub created_by: String,
    pub score_policy: RetryPolicy,
    pub score_timeout: Duration,
}

impl ItemWorker {
    /// Run one item to an outcome; never panics on item-level failure
    pub async fn process(&self, ctx: &TaskContext, item: WorkItem) -> ItemResult {
        let start = Instant::now();

        let value = match self.score(&item).await {
            Ok(value) => value,
            Err(reason) => {
                tracing::warn!(
                    task_id = %ctx.task_id(),
                    item_id = item.item_id,
                    natural_key = %item.natural_key,
                    reason = %reason,
                    "Item scoring failed"
                );
                return failure(&item, reason);
            }
        };

        ctx.set_item_phase(item.item_id, ItemPhase::Recording);
        let payload = value.to_string();
        let note = match self
            .store
            .record_analysis(item.item_id, &self.idempotency_key, &payload, &self.created_by)
            .await
        {
            Ok(RecordOutcome::Recorded(record_id)) => {
                tracing::debug!(item_id = item.item_id, record_id, "Analysis recorded");
                None
            }
            Ok(RecordOutcome::AlreadyExists) => Some("already recorded".to_string()),
            Err(e) => {
                tracing::warn!(
                    task_id = %ctx.task_id(),
                    item_id = item.item_id,
                    error = %e,
                    "Recording analysis failed"
                );
                return failure(&item, format!("record failed: {}", e));
            }
        };

        let outcome = ScoreOutcome::Parsed(value);
        if outcome.is_positive(&self.positive_field) && item.needs_enrichment() {
            if let Some(pipeline) = &self.enrichment {
                self.enrich(ctx, pipeline, &item).await;
            }
        }

        tracing::debug!(
            task_id = %ctx.task_id(),
            item_id = item.item_id,
            elapsed_ms = start.elapsed().as_millis(),
            "Item processed"
        );

        ItemResult {
            item_id: item.item_id,
            natural_key: item.natural_key,
            success: true,
            message: note,
        }
    }

    /// Score with per-call timeout; anything but a parsed reply is retried
    async fn score(&self, item: &WorkItem) -> Result<Value, String> {
        let scorer = self.scorer.as_ref();
        let timeout = self.score_timeout;
        let primary = item.primary_text.as_str();
        let secondary = item.secondary_text.as_str();

        retry("score item", &self.score_policy, || async move {
            match tokio::time::timeout(timeout, scorer.score(primary, secondary)).await {
                Ok(ScoreOutcome::Parsed(value)) => Ok(value),
                Ok(other) => Err(RetryError::Retryable(other.describe())),
                Err(_) => Err(RetryError::Retryable(format!("scoring timed out after {:?}", timeout))),
            }
        })
        .await
    }

    /// Best effort; failures are logged and never change the item outcome
    async fn enrich(&self, ctx: &TaskContext, pipeline: &EnrichmentPipeline, item: &WorkItem) {
        let Some(external_ref) = item.external_ref.as_deref() else {
            return;
        };

        ctx.set_item_phase(item.item_id, ItemPhase::Enriching);

        match pipeline.enrich(external_ref).await {
            Ok(entries) if entries.is_empty() => {
                tracing::debug!(item_id = item.item_id, external_ref, "Enrichment found nothing");
            }
            Ok(entries) => match serde_json::to_string(&entries) {
                Ok(value) => {
                    if let Err(e) = self.store.set_enrichment(item.item_id, &value).await {
                        tracing::warn!(item_id = item.item_id, error = %e, "Storing enrichment failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(item_id = item.item_id, error = %e, "Enrichment value not serializable");
                }
            },
            Err(e) => {
                tracing::warn!(
                    task_id = %ctx.task_id(),
                    item_id = item.item_id,
                    external_ref,
                    error = %e,
                    "Enrichment failed"
                );
            }
        }

        ctx.set_item_phase(item.item_id, ItemPhase::Recording);
    }
}

fn failure(item: &WorkItem, reason: String) -> ItemResult {
    ItemResult {
        item_id: item.item_id,
        natural_key: item.natural_key.clone(),
        success: false,
        message: Some(reason),
    }
}
