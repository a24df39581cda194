//! Analysis service
//!
//! Entry point used by the binary (and by any outer transport layer):
//! submit a task for a signature, look it up, stream its progress, query
//! store-backed status, and clear caches.
//!
//! Task state lives in a [`TaskRegistry`] owned by the service. Finished
//! contexts are kept for the configured retention window so late observers
//! still see the final snapshot, then dropped when the window passes.
//! Submissions and memory pressure prune expired contexts as well.

use futures::stream::Stream;
use papr_common::config::{OrchestratorConfig, ProgressConfig, TomlConfig};
use papr_common::events::{ProgressEvent, ProgressSnapshot};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{DedupStore, SqliteBackend};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{StatusCounts, TaskSignature};
use crate::services::enrichment::{ArxivEnricher, EnrichmentPipeline, DEFAULT_AFFILIATION_PROMPT};
use crate::services::progress_channel::ProgressChannel;
use crate::services::resolver::WorkItemResolver;
use crate::services::scoring_client::{ChatClient, ChatScorerProvider, ScorerProvider};
use crate::services::task_orchestrator::{TaskContext, TaskOrchestrator};
use crate::utils::memory_governor::{MemoryGovernor, Reclaimable};

/// Which in-process state [`AnalysisService::clear_caches`] drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Enrichment,
    Progress,
    All,
}

impl std::str::FromStr for CacheScope {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enrichment" | "affiliation" => Ok(CacheScope::Enrichment),
            "progress" => Ok(CacheScope::Progress),
            "all" => Ok(CacheScope::All),
            other => Err(ServiceError::InvalidInput(format!("unknown cache scope '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub enrichment_entries: usize,
    pub task_contexts: usize,
}

/// Handle on a submitted task
#[derive(Clone)]
pub struct TaskHandle {
    ctx: Arc<TaskContext>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        self.ctx.task_id()
    }

    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.ctx.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.is_finished()
    }

    /// Stop dispatching new items
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// Final snapshot once the task is completed or failed
    pub async fn wait(&self) -> ProgressSnapshot {
        self.ctx.wait().await
    }
}

/// Task contexts by task id
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<TaskContext>>>,
    retention: Duration,
}

impl TaskRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<TaskContext>> {
        self.tasks.read().get(task_id).cloned()
    }

    /// The running context for `signature`, or a fresh one
    ///
    /// The flag is true when a new context was created.
    pub fn get_or_create(&self, signature: &TaskSignature, workers: usize) -> (Arc<TaskContext>, bool) {
        let task_id = signature.task_id();
        let mut tasks = self.tasks.write();

        if let Some(existing) = tasks.get(&task_id) {
            if !existing.is_finished() {
                return (Arc::clone(existing), false);
            }
        }

        let ctx = Arc::new(TaskContext::new(signature.clone(), workers));
        tasks.insert(task_id, Arc::clone(&ctx));
        (ctx, true)
    }

    /// Drop finished contexts older than `min_age`
    pub fn prune_finished(&self, min_age: Duration) -> usize {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, ctx| match ctx.finished_for() {
            Some(age) => age < min_age,
            None => true,
        });
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reclaimable for TaskRegistry {
    fn name(&self) -> &str {
        "task_registry"
    }

    fn evict_all(&self) -> usize {
        self.prune_finished(self.retention)
    }

    fn reclaim(&self) -> usize {
        self.prune_finished(Duration::ZERO)
    }
}

pub struct AnalysisService {
    store: Arc<DedupStore>,
    scorers: Arc<dyn ScorerProvider>,
    enrichment: Option<Arc<EnrichmentPipeline>>,
    governor: Arc<MemoryGovernor>,
    registry: Arc<TaskRegistry>,
    orchestrator_config: OrchestratorConfig,
    progress_config: ProgressConfig,
    score_timeout: Duration,
}

impl AnalysisService {
    pub fn new(
        store: Arc<DedupStore>,
        scorers: Arc<dyn ScorerProvider>,
        governor: Arc<MemoryGovernor>,
        config: &TomlConfig,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new(config.progress.retention()));
        governor.register(registry.clone());

        Self {
            store,
            scorers,
            enrichment: None,
            governor,
            registry,
            orchestrator_config: config.orchestrator.clone(),
            progress_config: config.progress.clone(),
            score_timeout: config.scoring.timeout(),
        }
    }

    /// Enrich positive items through `pipeline`
    pub fn with_enrichment(mut self, pipeline: Arc<EnrichmentPipeline>) -> Self {
        self.enrichment = Some(pipeline);
        self
    }

    /// Wire the production stack over an open pool
    ///
    /// Enrichment is enabled only when a chat client can be built from the
    /// scoring configuration; without one, tasks still score and record.
    pub async fn from_config(config: &TomlConfig, pool: SqlitePool) -> ServiceResult<Self> {
        let backend = Arc::new(SqliteBackend::new(pool));
        let store = Arc::new(DedupStore::new(backend, config.store.clone()));
        let governor = Arc::new(MemoryGovernor::new(config.memory.clone()));
        let scorers = Arc::new(ChatScorerProvider::new(config.scoring.clone(), Arc::clone(&store)));

        let mut service = Self::new(Arc::clone(&store), scorers, Arc::clone(&governor), config);

        match ChatClient::new(&config.scoring) {
            Ok(chat) => {
                let prompt = store
                    .prompt_content(&config.enrichment.prompt_key)
                    .await?
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_AFFILIATION_PROMPT.to_string());
                let enricher = ArxivEnricher::new(
                    Arc::new(chat),
                    prompt,
                    config.enrichment.clone(),
                    &config.buffer,
                    Arc::clone(&governor),
                )
                .map_err(crate::error::SetupError::from)?;
                let pipeline = EnrichmentPipeline::new(
                    Arc::new(enricher),
                    config.cache.affiliation_capacity,
                    Arc::clone(&governor),
                );
                service = service.with_enrichment(Arc::new(pipeline));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Enrichment disabled: chat client unavailable");
            }
        }

        Ok(service)
    }

    pub fn store(&self) -> &Arc<DedupStore> {
        &self.store
    }

    pub fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.governor
    }

    /// Start processing `signature` in the background
    ///
    /// Resubmitting while the same task id is still running returns that id
    /// without starting a second pool.
    pub fn submit_task(&self, signature: TaskSignature, item_cap: Option<usize>) -> ServiceResult<String> {
        if signature.domain_key.trim().is_empty() || signature.idempotency_key.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "domain_key and idempotency_key must not be empty".to_string(),
            ));
        }

        let pruned = self.registry.prune_finished(self.progress_config.retention());
        if pruned > 0 {
            tracing::debug!(pruned, "Dropped expired task contexts");
        }

        let workers = self.orchestrator_config.workers.max(1);
        let (ctx, created) = self.registry.get_or_create(&signature, workers);
        let task_id = ctx.task_id().to_string();

        if !created {
            tracing::info!(task_id = %task_id, "Task already running, returning existing id");
            return Ok(task_id);
        }

        tracing::info!(task_id = %task_id, run_id = %ctx.run_id(), item_cap, workers, "Task submitted");

        let run = TaskRun {
            store: Arc::clone(&self.store),
            scorers: Arc::clone(&self.scorers),
            enrichment: self.enrichment.clone(),
            orchestrator_config: self.orchestrator_config.clone(),
            score_timeout: self.score_timeout,
        };
        let registry = Arc::downgrade(&self.registry);
        let retention = self.progress_config.retention();
        tokio::spawn(async move {
            run.execute(ctx, item_cap).await;

            // Finished contexts stay readable for the retention window only
            tokio::time::sleep(retention).await;
            if let Some(registry) = registry.upgrade() {
                let pruned = registry.prune_finished(retention);
                if pruned > 0 {
                    tracing::debug!(pruned, "Dropped expired task contexts");
                }
            }
        });

        Ok(task_id)
    }

    pub fn task(&self, task_id: &str) -> Option<TaskHandle> {
        self.registry.get(task_id).map(|ctx| TaskHandle { ctx })
    }

    /// Completion counts read from the store
    pub async fn status_of(&self, signature: &TaskSignature) -> ServiceResult<StatusCounts> {
        Ok(self.store.status_for(signature).await?)
    }

    /// Live progress of a registered task
    pub fn stream_progress(&self, task_id: &str) -> ServiceResult<impl Stream<Item = ProgressEvent> + Send + 'static> {
        let ctx = self
            .registry
            .get(task_id)
            .ok_or_else(|| ServiceError::NotFound(task_id.to_string()))?;
        Ok(ProgressChannel::new(&self.progress_config).stream(ctx))
    }

    /// Drop cached enrichment results and/or finished task contexts
    ///
    /// Running tasks are never dropped.
    pub fn clear_caches(&self, scope: CacheScope) -> ClearReport {
        let mut report = ClearReport::default();

        if matches!(scope, CacheScope::Enrichment | CacheScope::All) {
            if let Some(pipeline) = &self.enrichment {
                report.enrichment_entries = pipeline.cache().clear();
            }
        }
        if matches!(scope, CacheScope::Progress | CacheScope::All) {
            report.task_contexts = self.registry.prune_finished(Duration::ZERO);
        }

        tracing::info!(
            ?scope,
            enrichment_entries = report.enrichment_entries,
            task_contexts = report.task_contexts,
            "Caches cleared"
        );
        report
    }
}

/// Everything a background task needs, detached from the service
struct TaskRun {
    store: Arc<DedupStore>,
    scorers: Arc<dyn ScorerProvider>,
    enrichment: Option<Arc<EnrichmentPipeline>>,
    orchestrator_config: OrchestratorConfig,
    score_timeout: Duration,
}

impl TaskRun {
    async fn execute(self, ctx: Arc<TaskContext>, item_cap: Option<usize>) {
        let signature = ctx.signature().clone();

        let scorer = match self.scorers.connect(&signature).await {
            Ok(scorer) => scorer,
            Err(e) => {
                tracing::error!(task_id = %ctx.task_id(), error = %e, "Task setup failed");
                ctx.fail(e.to_string());
                return;
            }
        };

        let items = match WorkItemResolver::new(Arc::clone(&self.store))
            .resolve(&signature, item_cap)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(task_id = %ctx.task_id(), error = %e, "Resolving pending items failed");
                ctx.fail(format!("resolving pending items failed: {}", e));
                return;
            }
        };

        let mut orchestrator =
            TaskOrchestrator::new(self.store, scorer, self.orchestrator_config, self.score_timeout);
        if let Some(pipeline) = self.enrichment {
            orchestrator = orchestrator.with_enrichment(pipeline);
        }

        orchestrator.run(ctx, items).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_scope_parsing() {
        assert_eq!("all".parse::<CacheScope>().unwrap(), CacheScope::All);
        assert_eq!("Affiliation".parse::<CacheScope>().unwrap(), CacheScope::Enrichment);
        assert!("nope".parse::<CacheScope>().is_err());
    }

    #[test]
    fn test_registry_reuses_running_context() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let signature = TaskSignature::new("2025-08-01/cs.AI", "prompt");

        let (first, created) = registry.get_or_create(&signature, 2);
        assert!(created);
        let (second, created) = registry.get_or_create(&signature, 2);
        assert!(!created);
        assert_eq!(first.run_id(), second.run_id());

        first.fail("setup");
        let (third, created) = registry.get_or_create(&signature, 2);
        assert!(created);
        assert_ne!(first.run_id(), third.run_id());
    }

    #[test]
    fn test_registry_reclaim_drops_only_finished() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let (running, _) = registry.get_or_create(&TaskSignature::new("a", "k"), 1);
        let (finished, _) = registry.get_or_create(&TaskSignature::new("b", "k"), 1);
        finished.fail("setup");

        assert_eq!(registry.evict_all(), 0);
        assert_eq!(registry.reclaim(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(running.task_id()).is_some());
    }
}
