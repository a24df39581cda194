//! Service modules for the analysis pipeline
//!
//! - `resolver`: pending work items for a signature
//! - `scoring_client`: chat-completions scoring seam
//! - `enrichment`: PDF download and affiliation lookup for positive items
//! - `task_orchestrator`: worker pool over resolved items
//! - `progress_channel`: snapshot polling stream
//! - `analysis_service`: submission, status and cache control

pub mod analysis_service;
pub mod enrichment;
pub mod progress_channel;
pub mod resolver;
pub mod scoring_client;
pub mod task_orchestrator;

pub use analysis_service::{AnalysisService, CacheScope, ClearReport, TaskHandle, TaskRegistry};
pub use enrichment::{ArxivEnricher, Enricher, EnrichmentPipeline};
pub use progress_channel::ProgressChannel;
pub use resolver::WorkItemResolver;
pub use scoring_client::{ChatClient, ChatScorerProvider, PromptScorer, ScorerProvider, ScoringClient};
pub use task_orchestrator::{TaskContext, TaskOrchestrator};
