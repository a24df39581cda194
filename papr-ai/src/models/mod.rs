//! Data models for papr-ai
//!
//! - Work items and the signature that groups and deduplicates them
//! - Analysis records and store-level outcomes
//! - Tagged outcome of a scoring call

pub mod analysis;
pub mod score_outcome;
pub mod work_item;

pub use analysis::{AnalysisRecord, IdMapping, RecordOutcome, StatusCounts};
pub use score_outcome::ScoreOutcome;
pub use work_item::{NewWorkItem, TaskSignature, WorkItem};
