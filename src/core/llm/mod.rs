pub mod generic_provider;
pub mod registry;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::core::config::LlmConfig;
use generic_provider::GenericProvider;
use registry::ProviderRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with every request. Defaults favour
/// deterministic, schema-shaped answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4000,
            top_p: 0.05,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    // Execute a prompt against a model using a structured conversation
    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String>;
}

/// A provider bound to one model and one set of sampling parameters.
#[derive(Clone)]
pub struct LlmManager {
    provider: Arc<dyn LlmProvider>,
    model: String,
    params: SamplingParams,
}

impl LlmManager {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            provider,
            model: model.into(),
            params,
        }
    }

    /// Resolve the configured provider through the built-in registry and
    /// read its API key from the environment.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let registry = ProviderRegistry::load()?;
        let mut provider_def = registry
            .get_provider(&config.provider)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown LLM provider '{}'", config.provider))?;
        if let Some(base_url) = &config.base_url {
            provider_def.base_url = base_url.clone();
        }

        let key_env = config
            .api_key_env
            .clone()
            .unwrap_or_else(|| provider_def.auth.api_key_env.clone());
        let api_key = std::env::var(&key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("API key for {} not set ({})", provider_def.name, key_env))?;

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| provider_def.default_model.clone());
        info!("Using LLM: {} ({})", provider_def.name, model);

        let params = SamplingParams {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
        };
        Ok(Self::new(
            Arc::new(GenericProvider::new(provider_def, api_key)),
            model,
            params,
        ))
    }

    pub fn describe(&self) -> String {
        format!("{}/{}", self.provider.provider_id(), self.model)
    }

    pub async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.provider
            .generate(&self.model, messages, &self.params)
            .await
    }
}
