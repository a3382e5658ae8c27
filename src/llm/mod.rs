//! LLM integration for topic summarization.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! `RigClient` bridges rig's `CompletionModel` to the small `LlmClient`
//! trait the summarizer is written against.

pub mod summarizer;

pub use summarizer::LlmSummarizer;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::{ExposeSecret, SecretString};

use crate::config::env_opt;
use crate::error::{ConfigError, SummaryError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

/// Configuration for creating an LLM client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Anthropic wins when both keys are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let (backend, api_key) = match (env_opt("ANTHROPIC_API_KEY"), env_opt("OPENAI_API_KEY")) {
            (Some(key), _) => (LlmBackend::Anthropic, key),
            (None, Some(key)) => (LlmBackend::OpenAi, key),
            (None, None) => {
                return Err(ConfigError::MissingEnvVar(
                    "ANTHROPIC_API_KEY or OPENAI_API_KEY".into(),
                ));
            }
        };
        let model = env_opt("DIGEST_MODEL").unwrap_or_else(|| backend.default_model().to_string());
        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model,
        })
    }
}

/// One-shot completion: system preamble plus a user prompt, text back.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        preamble: &str,
        prompt: &str,
        max_tokens: u64,
    ) -> Result<String, SummaryError>;
}

/// `LlmClient` over any rig completion model.
pub struct RigClient<M: CompletionModel> {
    model: M,
    provider: &'static str,
    model_name: String,
}

impl<M: CompletionModel> RigClient<M> {
    pub fn new(model: M, provider: &'static str, model_name: &str) -> Self {
        Self {
            model,
            provider,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmClient for RigClient<M>
where
    M: CompletionModel + 'static,
{
    fn provider_name(&self) -> &str {
        self.provider
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(
        &self,
        preamble: &str,
        prompt: &str,
        max_tokens: u64,
    ) -> Result<String, SummaryError> {
        let agent = rig::agent::AgentBuilder::new(self.model.clone())
            .preamble(preamble)
            .max_tokens(max_tokens)
            .temperature(0.3)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| SummaryError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Create an LLM client from configuration.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, SummaryError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_client(config),
        LlmBackend::OpenAi => create_openai_client(config),
    }
}

fn create_anthropic_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, SummaryError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            SummaryError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigClient::new(model, "anthropic", &config.model)))
}

fn create_openai_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, SummaryError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            SummaryError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigClient::new(model, "openai", &config.model)))
}
