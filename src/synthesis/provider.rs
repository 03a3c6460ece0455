//! Code-synthesis backends
//!
//! Both supported backends speak the OpenAI `/v1/chat/completions` format, so a
//! single HTTP client parameterized by [`ProviderId`] serves them.

use crate::error::PipelineError;
use crate::LlmConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Known synthesis backends, in detection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "cerebras")]
    Cerebras,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::OpenAi, ProviderId::Cerebras];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Cerebras => "cerebras",
        }
    }

    /// Environment variable holding the credential
    pub fn credential_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Cerebras => "CEREBRAS_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "cerebras" => Ok(Self::Cerebras),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// A chat-completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn model_name(&self) -> &str;

    /// Send one system/user exchange and return the raw assistant content.
    ///
    /// # Errors
    ///
    /// `SynthesisTransport` for network failures, timeouts and non-2xx
    /// statuses; `SynthesisShape` when the reply has no content.
    async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible error response
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// HTTP provider for any OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct HttpLlmProvider {
    id: ProviderId,
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl HttpLlmProvider {
    pub fn new(
        id: ProviderId,
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::FatalConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            id,
            client,
            url: url.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Build the provider for `id` from configuration and its credential
    pub fn from_config(id: ProviderId, config: &LlmConfig, api_key: String) -> Result<Self, PipelineError> {
        let (url, model) = match id {
            ProviderId::OpenAi => (&config.openai_url, &config.openai_model),
            ProviderId::Cerebras => (&config.cerebras_url, &config.cerebras_model),
        };
        Self::new(
            id,
            url.clone(),
            model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.6,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::SynthesisTransport(format!("{} timed out: {}", self.id, e))
                } else {
                    PipelineError::SynthesisTransport(format!("failed to reach {} at {}: {}", self.id, self.url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&text) {
                if let Some(detail) = err.error {
                    return Err(PipelineError::SynthesisTransport(format!(
                        "{} API error ({}): {}",
                        self.id,
                        status.as_u16(),
                        detail.message
                    )));
                }
            }
            return Err(PipelineError::SynthesisTransport(format!(
                "{} API returned {}: {}",
                self.id,
                status.as_u16(),
                text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::SynthesisShape(format!("unreadable {} response: {}", self.id, e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::SynthesisShape(format!("{} returned no content", self.id)))
    }
}
