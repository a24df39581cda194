//! papr-ai library interface
//!
//! Exposes the analysis pipeline for the `papr-ai` binary and for
//! integration testing.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ServiceError, ServiceResult};
pub use crate::services::AnalysisService;
