//! Author affiliation enrichment
//!
//! Positive items get a second, optional pass: the paper PDF is downloaded
//! into a [`BoundedBuffer`], the first-page text is extracted, and a chat
//! lookup turns that text into a de-duplicated list of institutions.
//! Results are cached by external reference. Transient failures cache an
//! empty result so the same link is not hammered again; other failures are
//! not cached and may be retried by a later task.

use async_trait::async_trait;
use papr_common::config::{BufferConfig, EnrichmentConfig};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use crate::error::{ClientError, EnrichmentError};
use crate::services::scoring_client::ChatClient;
use crate::utils::memory_governor::{MemoryGovernor, PressureLevel};
use crate::utils::resource_cache::ResourceCache;
use crate::utils::retry::{retry, RetryError, RetryPolicy};
use crate::utils::BoundedBuffer;

/// Memory is re-sampled every time this many more bytes arrive past the checkpoint
const PRESSURE_RECHECK_BYTES: usize = 1024 * 1024;

const USER_AGENT: &str = concat!("papr/", env!("CARGO_PKG_VERSION"));

/// Used when no `author_affiliation` prompt is stored
pub const DEFAULT_AFFILIATION_PROMPT: &str = "You extract author affiliations from the first page of an academic paper. \
Return only a JSON array of distinct institution names, in the order they first appear. \
Return [] if no affiliation can be identified.";

const REFUSAL_PATTERNS: &[&str] = &[
    "无法回答",
    "不能回答",
    "无法提供",
    "无法帮助",
    "询问其他话题",
    "尽力提供帮助",
    "努力理解你的需求",
    "sorry",
    "cannot",
    "unable",
    "can't help",
];

/// External enrichment seam
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Fetch the document behind `external_ref`
    async fn download(&self, external_ref: &str) -> Result<BoundedBuffer, EnrichmentError>;

    /// Leading text of the document (CPU-bound; called off the async runtime)
    fn extract_lead_text(&self, bytes: &[u8]) -> Result<String, EnrichmentError>;

    /// Turn lead text into enrichment entries
    async fn lookup(&self, lead_text: &str) -> Result<Vec<String>, EnrichmentError>;
}

/// True when the reply is empty or reads like a refusal
pub fn is_refusal(reply: &str) -> bool {
    let lowered = reply.trim().to_lowercase();
    lowered.is_empty() || REFUSAL_PATTERNS.iter().any(|p| lowered.contains(p))
}

static JSON_ARRAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\[.*?\]").expect("valid JSON array pattern"));

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s*|^-\s*|^\*\s*").expect("valid list marker pattern"));

/// Parse a lookup reply into entries
///
/// The first `[...]` span is read as a JSON array. Without one, the reply is
/// read line by line with list markers stripped, up to `max_entries` lines.
pub fn parse_affiliations(reply: &str, max_entries: usize) -> Vec<String> {
    if let Some(found) = JSON_ARRAY.find(reply) {
        return match serde_json::from_str::<Vec<Value>>(found.as_str()) {
            Ok(values) => values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Bracketed span in lookup reply is not a JSON array");
                Vec::new()
            }
        };
    }

    if reply.to_lowercase().contains("error") {
        return Vec::new();
    }

    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("```"))
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|line| line.chars().count() > 2)
        .take(max_entries)
        .collect()
}

/// Drop repeats, keeping first occurrences in order
pub fn dedup_preserving_order(entries: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    entries.into_iter().filter(|e| seen.insert(e.clone())).collect()
}

/// Downloads arXiv PDFs and looks up affiliations through the chat endpoint
pub struct ArxivEnricher {
    http_client: reqwest::Client,
    chat: Arc<ChatClient>,
    system_prompt: String,
    config: EnrichmentConfig,
    buffer_cap: usize,
    governor: Arc<MemoryGovernor>,
}

impl ArxivEnricher {
    pub fn new(
        chat: Arc<ChatClient>,
        system_prompt: String,
        config: EnrichmentConfig,
        buffer: &BufferConfig,
        governor: Arc<MemoryGovernor>,
    ) -> Result<Self, ClientError> {
        // connect timeout; the whole transfer gets eight times that
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.download_timeout())
            .timeout(config.download_timeout() * 8)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            chat,
            system_prompt,
            config,
            buffer_cap: buffer.max_in_memory_bytes,
            governor,
        })
    }

    /// PDF location for an abstract link, PDF link, or bare id
    pub fn pdf_url(&self, external_ref: &str) -> String {
        pdf_url_for(&self.config.pdf_base_url, external_ref)
    }

    fn lookup_message(lead_text: &str) -> String {
        format!(
            "You are a specialized academic paper parser. Extract the affiliations of all authors \
             from the first-page text below and return them as a JSON array of distinct institution names.\n\n\
             Paper text:\n{}\n\n\
             Return [] if no affiliation can be identified.",
            lead_text
        )
    }
}

/// `https://arxiv.org/abs/2508.00001v2` → `<base>/2508.00001v2`
pub fn pdf_url_for(pdf_base_url: &str, external_ref: &str) -> String {
    let trimmed = external_ref.trim();
    let id = ["/abs/", "/pdf/"]
        .iter()
        .find_map(|marker| trimmed.split_once(marker).map(|(_, rest)| rest))
        .or_else(|| (!trimmed.contains('/')).then_some(trimmed));

    match id {
        Some(id) => {
            let id = id.trim_end_matches('/').trim_end_matches(".pdf");
            format!("{}/{}", pdf_base_url.trim_end_matches('/'), id)
        }
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl Enricher for ArxivEnricher {
    async fn download(&self, external_ref: &str) -> Result<BoundedBuffer, EnrichmentError> {
        let url = self.pdf_url(external_ref);
        let start = Instant::now();

        let mut response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/pdf")
            .send()
            .await
            .map_err(|e| EnrichmentError::Download(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Download(ClientError::Api {
                status: status.as_u16(),
                message: format!("GET {}", url),
            }));
        }

        let mut buffer = BoundedBuffer::new(self.buffer_cap);
        let mut next_check = self.config.pressure_checkpoint_bytes;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EnrichmentError::Download(e.into()))?
        {
            buffer.write(&chunk)?;

            if buffer.len() > next_check {
                let state = self.governor.sample().await;
                if state.pressure == PressureLevel::Critical {
                    tracing::warn!(
                        url = %url,
                        downloaded_bytes = buffer.len(),
                        "Aborting download under critical memory pressure"
                    );
                    return Err(EnrichmentError::MemoryPressure {
                        downloaded_bytes: buffer.len(),
                    });
                }
                next_check = buffer.len() + PRESSURE_RECHECK_BYTES;
            }
        }

        tracing::debug!(
            url = %url,
            bytes = buffer.len(),
            spilled = buffer.is_spilled(),
            elapsed_ms = start.elapsed().as_millis(),
            "Document downloaded"
        );

        Ok(buffer)
    }

    fn extract_lead_text(&self, bytes: &[u8]) -> Result<String, EnrichmentError> {
        // pdf-extract can panic on malformed PDFs
        let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));

        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(EnrichmentError::Extraction(format!("PDF: {}", e))),
            Err(_) => {
                return Err(EnrichmentError::Extraction(
                    "PDF extraction panicked (malformed file)".to_string(),
                ))
            }
        };

        let lead: String = text.trim().chars().take(self.config.lead_text_chars).collect();
        if lead.is_empty() {
            return Err(EnrichmentError::Extraction("document has no extractable text".to_string()));
        }
        Ok(lead)
    }

    async fn lookup(&self, lead_text: &str) -> Result<Vec<String>, EnrichmentError> {
        let policy = RetryPolicy::exponential(self.config.lookup_attempts, self.config.lookup_backoff());
        let message = Self::lookup_message(lead_text);
        let message = message.as_str();
        let chat = self.chat.as_ref();
        let system_prompt = self.system_prompt.as_str();

        let reply = retry("affiliation lookup", &policy, || async move {
            match chat.chat(Some(system_prompt), message).await {
                Ok(reply) if is_refusal(&reply) => {
                    let preview: String = reply.chars().take(100).collect();
                    Err(RetryError::Retryable(EnrichmentError::Refused(preview)))
                }
                Ok(reply) => Ok(reply),
                Err(e) => Err(RetryError::Retryable(EnrichmentError::Lookup(e))),
            }
        })
        .await;

        match reply {
            Ok(reply) => Ok(parse_affiliations(&reply, self.config.max_entries)),
            Err(EnrichmentError::Refused(preview)) => {
                tracing::warn!(reply = %preview, "Affiliation lookup refused on every attempt");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// Cache-fronted enrichment flow used by workers
pub struct EnrichmentPipeline {
    enricher: Arc<dyn Enricher>,
    cache: Arc<ResourceCache<String, Vec<String>>>,
    governor: Arc<MemoryGovernor>,
}

impl EnrichmentPipeline {
    pub fn new(enricher: Arc<dyn Enricher>, capacity: usize, governor: Arc<MemoryGovernor>) -> Self {
        let cache = Arc::new(ResourceCache::with_label("affiliation_cache", capacity));
        governor.register(cache.clone());
        Self {
            enricher,
            cache,
            governor,
        }
    }

    pub fn cache(&self) -> &Arc<ResourceCache<String, Vec<String>>> {
        &self.cache
    }

    /// Entries for `external_ref`, from cache when possible
    pub async fn enrich(&self, external_ref: &str) -> Result<Vec<String>, EnrichmentError> {
        let key = external_ref.to_string();
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(external_ref, entries = hit.len(), "Enrichment cache hit");
            return Ok(hit);
        }

        match self.run(external_ref).await {
            Ok(entries) => {
                self.cache.put(key, entries.clone());
                Ok(entries)
            }
            Err(e) => {
                if e.is_transient() {
                    self.cache.put(key, Vec::new());
                    tracing::debug!(external_ref, "Cached empty result for transient failure");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, external_ref: &str) -> Result<Vec<String>, EnrichmentError> {
        let start = Instant::now();

        let mut buffer = self.enricher.download(external_ref).await?;
        let bytes = buffer.content()?;
        drop(buffer);
        self.governor.check_and_react().await;

        let enricher = Arc::clone(&self.enricher);
        let lead_text = tokio::task::spawn_blocking(move || enricher.extract_lead_text(&bytes))
            .await
            .map_err(|e| EnrichmentError::Extraction(format!("extraction task failed: {}", e)))??;

        let entries = dedup_preserving_order(self.enricher.lookup(&lead_text).await?);

        tracing::info!(
            external_ref,
            entries = entries.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Enrichment finished"
        );
        Ok(entries)
    }
}
