//! # papr Common Library
//!
//! Shared code for the papr analysis crates including:
//! - Error types
//! - Bootstrap configuration loading
//! - Progress snapshot and event types

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
