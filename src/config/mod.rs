// src/config/mod.rs
// Central configuration for the dbnotebook core - composes domain configs.

pub mod helpers;
pub mod llm;
pub mod server;
pub mod sql_chat;
pub mod store;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

/// Top-level configuration, composed from the individual domain configs
/// below rather than one flat struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: llm::LlmConfig,
    pub embedding: llm::EmbeddingConfig,
    pub reranker: llm::RerankerConfig,
    pub retrieval: llm::RetrievalConfig,
    pub chunk: llm::ChunkConfig,
    pub rag_memory: llm::RagMemoryConfig,

    pub postgres: store::PostgresConfig,

    pub sql_chat: sql_chat::SqlChatConfig,
    pub confidence: sql_chat::ConfidenceConfig,

    pub server: server::ServerConfig,
    pub database: server::DatabaseConfig,
    pub logging: server::LoggingConfig,
    pub auth: server::AuthConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            llm: llm::LlmConfig::from_env(),
            embedding: llm::EmbeddingConfig::from_env(),
            reranker: llm::RerankerConfig::from_env(),
            retrieval: llm::RetrievalConfig::from_env(),
            chunk: llm::ChunkConfig::from_env(),
            rag_memory: llm::RagMemoryConfig::from_env(),

            postgres: store::PostgresConfig::from_env(),

            sql_chat: sql_chat::SqlChatConfig::from_env(),
            confidence: sql_chat::ConfidenceConfig::from_env(),

            server: server::ServerConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            auth: server::AuthConfig::from_env(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.llm.provider == "openai" && self.llm.api_key.is_empty() {
            anyhow::bail!("OPENAI_API_KEY is required when LLM_PROVIDER=openai");
        }
        if self.postgres.embed_dim == 0 {
            anyhow::bail!("PGVECTOR_EMBED_DIM must be > 0");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
