// src/config/llm.rs
// LLM, embedding, and reranker provider configuration (§6 LLM_PROVIDER / EMBEDDING_PROVIDER / RERANKER_MODEL)

use serde::{Deserialize, Serialize};

use super::helpers::{env_bool, env_f32, env_or, env_usize};

/// Selects the concrete chat-completion backend by string name. Mirrors the
/// teacher's multi-provider router, but keyed by name rather than task tier
/// (spec §9: "a small registry keyed by string name").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub api_base: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            provider: env_or("LLM_PROVIDER", "openai"),
            model: env_or("LLM_MODEL", "gpt-4o-mini"),
            api_key: env_or("OPENAI_API_KEY", ""),
            api_base: env_or("OPENAI_API_BASE", "https://api.openai.com/v1"),
            timeout_secs: super::helpers::env_u64("LLM_TIMEOUT_SECS", 60),
            max_retries: super::helpers::env_u32("LLM_MAX_RETRIES", 3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub dimensions: usize,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            provider: env_or("EMBEDDING_PROVIDER", "openai"),
            model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            api_key: env_or("OPENAI_API_KEY", ""),
            dimensions: env_usize("EMBEDDING_DIMENSIONS", 1536),
        }
    }
}

/// Reranker singleton configuration (§4.15). Matches the original's
/// HuggingFace-alias / local-path / model-id resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model: String,
    pub top_n: usize,
    pub api_base: Option<String>,
}

impl RerankerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("RERANKER_ENABLED", true),
            model: env_or("RERANKER_MODEL", "base"),
            top_n: env_usize("RERANKER_TOP_N", 10),
            api_base: super::helpers::env_opt("RERANKER_API_BASE"),
        }
    }
}

/// Hybrid retrieval strategy selection and fusion weights (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub strategy: String,
    pub rerank_threshold: usize,
    pub similarity_top_k: usize,
    pub rerank_top_k: usize,
    pub lexical_weight: f32,
    pub vector_weight: f32,
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        Self {
            strategy: env_or("RETRIEVAL_STRATEGY", "hybrid"),
            rerank_threshold: env_usize("RETRIEVAL_RERANK_THRESHOLD", 20),
            similarity_top_k: env_usize("RETRIEVAL_SIMILARITY_TOP_K", 20),
            rerank_top_k: env_usize("RETRIEVAL_RERANK_TOP_K", 6),
            lexical_weight: env_f32("RETRIEVAL_LEXICAL_WEIGHT", 0.5),
            vector_weight: env_f32("RETRIEVAL_VECTOR_WEIGHT", 0.5),
        }
    }
}

/// Text chunking configuration (§4 Chunker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkConfig {
    pub fn from_env() -> Self {
        Self {
            chunk_size: env_usize("CHUNK_SIZE", 1000),
            chunk_overlap: env_usize("CHUNK_OVERLAP", 200),
        }
    }
}

/// RAG conversation memory configuration (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagMemoryConfig {
    pub max_tokens: usize,
    pub load_last_n: usize,
}

impl RagMemoryConfig {
    pub fn from_env() -> Self {
        Self {
            max_tokens: env_usize("RAG_MEMORY_MAX_TOKENS", 3000),
            load_last_n: env_usize("RAG_MEMORY_LOAD_LAST_N", 50),
        }
    }
}
