// src/llm/registry.rs
// Small registry keyed by string name (§9): construction params come from
// Config, not positional call sites, and swapping providers is a config edit.

use std::collections::HashMap;
use std::sync::Arc;

use super::embeddings::{EmbeddingProvider, HashEmbeddingProvider, OpenAiEmbeddingProvider};
use super::provider::openai::OpenAiProvider;
use super::provider::LlmProvider;
use crate::config::llm::{EmbeddingConfig, LlmConfig};

pub struct LlmRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default: String,
}

impl LlmRegistry {
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
            config.api_base.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.timeout_secs,
        ));
        providers.insert("openai".to_string(), provider);
        Self {
            providers,
            default: config.provider.clone(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown LLM provider: {name}"))
    }

    pub fn default_provider(&self) -> anyhow::Result<Arc<dyn LlmProvider>> {
        self.get(&self.default)
    }
}

pub struct EmbeddingRegistry {
    providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
    default: String,
}

impl EmbeddingRegistry {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn EmbeddingProvider>> = HashMap::new();
        let openai: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddingProvider::new(
            config.api_key.clone(),
            config.model.clone(),
            config.dimensions,
        ));
        providers.insert("openai".to_string(), openai);
        let hash: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(config.dimensions));
        providers.insert("hash".to_string(), hash);

        Self {
            providers,
            default: config.provider.clone(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn EmbeddingProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown embedding provider: {name}"))
    }

    pub fn default_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        self.get(&self.default)
    }
}
