//! Test Helper Utilities
//!
//! Shared utilities for testing papr-ai

#![allow(dead_code)]

pub mod db_utils;
pub mod mocks;

pub use db_utils::{create_test_store, fast_store_config, seed_domain, test_config, test_governor, TestStore};
pub use mocks::{
    FailingBatchBackend, FailingEnricher, FailingScorerProvider, FixedEnricher, ScriptedScorer, StaticScorerProvider, TruncatingBackend,
};
