//! Scoring service client
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint. The same
//! [`ChatClient`] serves item scoring and the affiliation lookup used by
//! enrichment.

use async_trait::async_trait;
use papr_common::config::ScoringConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::DedupStore;
use crate::error::{ClientError, SetupError};
use crate::models::{ScoreOutcome, TaskSignature};

const USER_AGENT: &str = concat!("papr/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Minimal chat-completions client
pub struct ChatClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ChatClient {
    /// Requires both an API key and a model
    pub fn new(config: &ScoringConfig) -> Result<Self, ClientError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ClientError::Config("scoring.api_key is not set".to_string()))?;
        let model = config
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ClientError::Config("scoring.model is not set".to_string()))?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            timeout: config.timeout(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat turn; returns the reply text
    pub async fn chat(&self, system_prompt: Option<&str>, message: &str) -> Result<String, ClientError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: message,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let start = Instant::now();
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(300).collect();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis(),
            reply_len = content.len(),
            "Chat call completed"
        );

        Ok(content)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ClientError {
        match ClientError::from(err) {
            ClientError::Timeout(_) => ClientError::Timeout(self.timeout),
            other => other,
        }
    }
}

/// External scoring seam
#[async_trait]
pub trait ScoringClient: Send + Sync {
    async fn score(&self, primary_text: &str, secondary_text: &str) -> ScoreOutcome;
}

/// Scores an item with a stored system prompt
pub struct PromptScorer {
    chat: Arc<ChatClient>,
    system_prompt: String,
}

impl PromptScorer {
    pub fn new(chat: Arc<ChatClient>, system_prompt: String) -> Self {
        Self { chat, system_prompt }
    }
}

#[async_trait]
impl ScoringClient for PromptScorer {
    async fn score(&self, primary_text: &str, secondary_text: &str) -> ScoreOutcome {
        let message = format!("Title: {}\nAbstract: {}", primary_text, secondary_text);
        match self.chat.chat(Some(&self.system_prompt), &message).await {
            Ok(reply) => ScoreOutcome::from_reply(Some(&reply)),
            Err(e) => ScoreOutcome::Failed(e.to_string()),
        }
    }
}

/// Builds the scoring client for a task during setup
#[async_trait]
pub trait ScorerProvider: Send + Sync {
    async fn connect(&self, signature: &TaskSignature) -> Result<Arc<dyn ScoringClient>, SetupError>;
}

/// Resolves the prompt named by the idempotency key and wraps it in a
/// [`PromptScorer`]
pub struct ChatScorerProvider {
    config: ScoringConfig,
    store: Arc<DedupStore>,
}

impl ChatScorerProvider {
    pub fn new(config: ScoringConfig, store: Arc<DedupStore>) -> Self {
        Self { config, store }
    }
}

#[async_trait]
impl ScorerProvider for ChatScorerProvider {
    async fn connect(&self, signature: &TaskSignature) -> Result<Arc<dyn ScoringClient>, SetupError> {
        let chat = ChatClient::new(&self.config).map_err(|e| match e {
            ClientError::Config(msg) => SetupError::MissingConfig(msg),
            other => SetupError::Client(other),
        })?;

        let system_prompt = self
            .store
            .prompt_content(&signature.idempotency_key)
            .await?
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| SetupError::PromptNotFound(signature.idempotency_key.clone()))?;

        tracing::info!(
            prompt_key = %signature.idempotency_key,
            model = chat.model(),
            "Scoring client ready"
        );

        Ok(Arc::new(PromptScorer::new(Arc::new(chat), system_prompt)))
    }
}
