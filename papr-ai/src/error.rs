//! Error types for papr-ai
//!
//! Errors are split by the layer that produces them so that callers can
//! decide locally whether a failure is worth retrying.

use std::time::Duration;
use thiserror::Error;

/// Backing store failure, classified for retry decisions
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock contention, pool exhaustion, dropped connections
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Write rejected by a uniqueness constraint
    #[error("Uniqueness conflict: {0}")]
    Uniqueness(String),

    /// Anything retrying will not fix
    #[error("Store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_uniqueness(&self) -> bool {
        matches!(self, StoreError::Uniqueness(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return StoreError::Uniqueness(db_err.message().to_string());
                }
                let message = db_err.message().to_lowercase();
                if message.contains("database is locked")
                    || message.contains("busy")
                    || message.contains("connection reset")
                {
                    StoreError::Transient(db_err.message().to_string())
                } else {
                    StoreError::Fatal(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(err.to_string()),
            _ => StoreError::Fatal(err.to_string()),
        }
    }
}

/// Failure talking to an external HTTP service
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Network and timeout failures; worth a retry and worth caching as empty
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Timeout(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            ClientError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

/// Failure of the optional enrichment step for one item
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Download failed: {0}")]
    Download(ClientError),

    #[error("Buffer I/O error: {0}")]
    Buffer(#[from] std::io::Error),

    #[error("Download aborted under critical memory pressure after {downloaded_bytes} bytes")]
    MemoryPressure { downloaded_bytes: usize },

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Lookup failed: {0}")]
    Lookup(ClientError),

    #[error("Lookup refused: {0}")]
    Refused(String),

    #[error("Enrichment store error: {0}")]
    Store(#[from] StoreError),
}

impl EnrichmentError {
    /// Network-level failures; an empty result is cached for these
    pub fn is_transient(&self) -> bool {
        match self {
            EnrichmentError::Download(e) | EnrichmentError::Lookup(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Failure while preparing a task, before any item is dispatched
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Scoring client error: {0}")]
    Client(#[from] ClientError),

    #[error("Store error during setup: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by [`crate::services::AnalysisService`]
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_is_fatal() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Fatal(_)));
    }

    #[test]
    fn test_enrichment_transience_follows_client_error() {
        let network = EnrichmentError::Download(ClientError::Network("reset".into()));
        let api = EnrichmentError::Lookup(ClientError::Api {
            status: 400,
            message: "bad".into(),
        });
        assert!(network.is_transient());
        assert!(!api.is_transient());
        assert!(!EnrichmentError::MemoryPressure { downloaded_bytes: 1 }.is_transient());
    }
}
