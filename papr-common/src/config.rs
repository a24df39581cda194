//! Bootstrap configuration loading
//!
//! Configuration comes from a single TOML file. Every table is optional and
//! every field carries a built-in default, so an absent or partial file still
//! produces a usable configuration.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--config, --database)
//! 2. Environment variables (PAPR_CONFIG, PAPR_DATABASE, PAPR_SCORING_*)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the TOML file
pub const ENV_CONFIG_PATH: &str = "PAPR_CONFIG";
/// Environment variable naming the SQLite database file
pub const ENV_DATABASE_PATH: &str = "PAPR_DATABASE";
/// Environment variable carrying the scoring API key
pub const ENV_SCORING_API_KEY: &str = "PAPR_SCORING_API_KEY";
/// Environment variable carrying the scoring model name
pub const ENV_SCORING_MODEL: &str = "PAPR_SCORING_MODEL";
/// Environment variable overriding the scoring endpoint
pub const ENV_SCORING_BASE_URL: &str = "PAPR_SCORING_BASE_URL";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (relative or absolute)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// OpenAI-compatible chat endpoint used for scoring and affiliation lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model (or endpoint) identifier; required before a task can start
    #[serde(default)]
    pub model: Option<String>,

    /// Bearer token; required before a task can start
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: None,
            api_key: None,
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl ScoringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Worker pool and per-item retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of concurrent workers (W)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per scoring call before the item is failed
    #[serde(default = "default_score_attempts")]
    pub score_attempts: u32,

    /// Base delay for the exponential backoff between scoring attempts
    #[serde(default = "default_score_backoff_ms")]
    pub score_backoff_ms: u64,

    /// Boolean field of a parsed result that triggers enrichment
    #[serde(default = "default_positive_field")]
    pub positive_field: String,

    /// Recorded as `created_by` on every analysis record
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            score_attempts: default_score_attempts(),
            score_backoff_ms: default_score_backoff_ms(),
            positive_field: default_positive_field(),
            created_by: default_created_by(),
        }
    }
}

/// Paging and chunking parameters for the backing store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Rows requested per paged listing query
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum ids per `IN (...)` lookup
    #[serde(default = "default_in_chunk_size")]
    pub in_chunk_size: usize,

    /// Rows per multi-row upsert statement
    #[serde(default = "default_upsert_chunk_size")]
    pub upsert_chunk_size: usize,

    /// Result lengths that indicate a silently truncated listing
    #[serde(default = "default_suspect_page_sizes")]
    pub suspect_page_sizes: Vec<usize>,

    /// Attempts per store call on transient errors
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between store retries
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// SQLite busy timeout
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            in_chunk_size: default_in_chunk_size(),
            upsert_chunk_size: default_upsert_chunk_size(),
            suspect_page_sizes: default_suspect_page_sizes(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Resident memory ceiling and pressure thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_ceiling_mb")]
    pub ceiling_mb: u64,

    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,

    #[serde(default = "default_critical_ratio")]
    pub critical_ratio: f64,

    /// Reclamation rounds run at critical pressure
    #[serde(default = "default_reclaim_rounds")]
    pub reclaim_rounds: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ceiling_mb: default_ceiling_mb(),
            warning_ratio: default_warning_ratio(),
            critical_ratio: default_critical_ratio(),
            reclaim_rounds: default_reclaim_rounds(),
        }
    }
}

impl MemoryConfig {
    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Bytes held in memory before a download spills to disk
    #[serde(default = "default_max_in_memory_bytes")]
    pub max_in_memory_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_in_memory_bytes: default_max_in_memory_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub affiliation_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            affiliation_capacity: default_cache_capacity(),
        }
    }
}

/// Progress streaming and task retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock budget of one progress stream
    #[serde(default = "default_max_stream_secs")]
    pub max_stream_secs: u64,

    /// How long a finished task stays queryable before it is reclaimed
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_stream_secs: default_max_stream_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_stream(&self) -> Duration {
        Duration::from_secs(self.max_stream_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// PDF download and affiliation lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Downloaded byte count after which memory pressure is checked
    #[serde(default = "default_pressure_checkpoint_bytes")]
    pub pressure_checkpoint_bytes: usize,

    /// Characters of first-page text sent to the lookup
    #[serde(default = "default_lead_text_chars")]
    pub lead_text_chars: usize,

    #[serde(default = "default_lookup_attempts")]
    pub lookup_attempts: u32,

    #[serde(default = "default_lookup_backoff_ms")]
    pub lookup_backoff_ms: u64,

    /// Upper bound on entries parsed from a free-text lookup reply
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Stored prompt used as the lookup system prompt, if present
    #[serde(default = "default_affiliation_prompt_key")]
    pub prompt_key: String,

    /// Base URL that document ids are appended to
    #[serde(default = "default_pdf_base_url")]
    pub pdf_base_url: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: default_download_timeout_secs(),
            pressure_checkpoint_bytes: default_pressure_checkpoint_bytes(),
            lead_text_chars: default_lead_text_chars(),
            lookup_attempts: default_lookup_attempts(),
            lookup_backoff_ms: default_lookup_backoff_ms(),
            max_entries: default_max_entries(),
            prompt_key: default_affiliation_prompt_key(),
            pdf_base_url: default_pdf_base_url(),
        }
    }
}

impl EnrichmentConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn lookup_backoff(&self) -> Duration {
        Duration::from_millis(self.lookup_backoff_ms)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    5
}

fn default_score_attempts() -> u32 {
    3
}

fn default_score_backoff_ms() -> u64 {
    1000
}

fn default_positive_field() -> String {
    "pass_filter".to_string()
}

fn default_created_by() -> String {
    "system".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_in_chunk_size() -> usize {
    200
}

fn default_upsert_chunk_size() -> usize {
    100
}

fn default_suspect_page_sizes() -> Vec<usize> {
    vec![5000, 10000]
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_ceiling_mb() -> u64 {
    400
}

fn default_warning_ratio() -> f64 {
    0.8
}

fn default_critical_ratio() -> f64 {
    0.95
}

fn default_reclaim_rounds() -> u32 {
    3
}

fn default_max_in_memory_bytes() -> usize {
    15 * 1024 * 1024
}

fn default_cache_capacity() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_stream_secs() -> u64 {
    1800
}

fn default_retention_secs() -> u64 {
    300
}

fn default_download_timeout_secs() -> u64 {
    15
}

fn default_pressure_checkpoint_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_lead_text_chars() -> usize {
    2000
}

fn default_lookup_attempts() -> u32 {
    3
}

fn default_lookup_backoff_ms() -> u64 {
    1000
}

fn default_max_entries() -> usize {
    20
}

fn default_affiliation_prompt_key() -> String {
    "author_affiliation".to_string()
}

fn default_pdf_base_url() -> String {
    "https://arxiv.org/pdf".to_string()
}

impl TomlConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file is not an error: a warning is logged and built-in
    /// defaults are returned. A file that exists but fails to parse is a
    /// configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using built-in defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content).map_err(|e| Error::config_file(path, e))?;

        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Overlay scoring credentials from the environment
    ///
    /// Environment values take priority over the TOML file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ENV_SCORING_API_KEY) {
            if !key.trim().is_empty() {
                self.scoring.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var(ENV_SCORING_MODEL) {
            if !model.trim().is_empty() {
                self.scoring.model = Some(model);
            }
        }
        if let Ok(url) = std::env::var(ENV_SCORING_BASE_URL) {
            if !url.trim().is_empty() {
                self.scoring.base_url = url;
            }
        }
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.workers == 0 {
            return Err(Error::Config("orchestrator.workers must be at least 1".to_string()));
        }
        if self.store.page_size == 0 || self.store.in_chunk_size == 0 || self.store.upsert_chunk_size == 0 {
            return Err(Error::Config("store page and chunk sizes must be at least 1".to_string()));
        }
        let memory = &self.memory;
        if !(0.0 < memory.warning_ratio
            && memory.warning_ratio < memory.critical_ratio
            && memory.critical_ratio <= 1.0)
        {
            return Err(Error::Config(format!(
                "memory thresholds must satisfy 0 < warning ({}) < critical ({}) <= 1",
                memory.warning_ratio, memory.critical_ratio
            )));
        }
        Ok(())
    }
}

/// Write a configuration to disk as TOML
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolve the TOML file location
///
/// Priority: CLI argument, then `PAPR_CONFIG`, then `<config_dir>/papr/config.toml`.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("papr")
        .join("config.toml")
}

/// Resolve the SQLite database location
///
/// Priority: CLI argument, then `PAPR_DATABASE`, then the TOML `database_path`,
/// then `<data_local_dir>/papr/papr.db`.
pub fn resolve_database_path(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("papr")
        .join("papr.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.page_size, 1000);
        assert_eq!(config.store.suspect_page_sizes, vec![5000, 10000]);
        assert_eq!(config.memory.ceiling_bytes(), 400 * 1024 * 1024);
        assert_eq!(config.scoring.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_table_keeps_field_defaults() {
        let config: TomlConfig = toml::from_str("[orchestrator]\nworkers = 2\n").unwrap();
        assert_eq!(config.orchestrator.workers, 2);
        assert_eq!(config.orchestrator.score_attempts, 3);
        assert_eq!(config.orchestrator.positive_field, "pass_filter");
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = TomlConfig::default();
        config.memory.warning_ratio = 0.96;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = TomlConfig::default();
        config.orchestrator.workers = 0;
        assert!(config.validate().is_err());
    }
}
