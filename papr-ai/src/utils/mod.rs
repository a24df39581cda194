//! Utility modules for papr-ai

pub mod bounded_buffer;
pub mod memory_governor;
pub mod resource_cache;
pub mod retry;

pub use bounded_buffer::BoundedBuffer;
pub use memory_governor::{
    MemoryGovernor, MemoryProbe, MemoryState, PressureLevel, ProcessMemoryProbe, Reclaimable, ReclaimReport,
};
pub use resource_cache::ResourceCache;
pub use retry::{retry, retry_transient, Backoff, RetryError, RetryPolicy};
