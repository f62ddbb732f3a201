// src/config/sql_chat.rs
// Text-to-SQL pipeline configuration (§4.9-§4.18, §6 SQL_CHAT_*)

use serde::{Deserialize, Serialize};

use super::helpers::{env_bool, env_f32, env_or, env_u64, env_usize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlChatConfig {
    /// Source secret the credential cipher key is derived from (SHA-256).
    pub encryption_key: String,
    pub skip_readonly_check: bool,

    pub pool_size: u32,
    pub pool_max_overflow: u32,
    pub pool_timeout_secs: u64,

    pub schema_cache_ttl_secs: u64,
    pub schema_link_top_k: usize,

    pub few_shot_top_k: usize,
    pub few_shot_rerank_top_k: usize,
    pub few_shot_lexical_weight: f32,
    pub few_shot_vector_weight: f32,

    pub max_syntactic_retries: u32,
    pub max_semantic_retries: u32,
    pub max_acceptable_rows: i64,

    pub max_estimated_rows: i64,
    pub max_cost: f64,

    pub max_result_rows: i64,
    pub statement_timeout_secs: u64,

    pub max_decompose_subquestions: usize,
    pub conversation_memory_cap: usize,

    pub telemetry_ring_cap: usize,
}

impl SqlChatConfig {
    pub fn from_env() -> Self {
        Self {
            encryption_key: env_or(
                "SQL_CHAT_ENCRYPTION_KEY",
                "dev-only-default-encryption-key-do-not-use-in-production",
            ),
            skip_readonly_check: env_bool("SQL_CHAT_SKIP_READONLY_CHECK", false),

            pool_size: super::helpers::env_u32("SQL_CHAT_POOL_SIZE", 5),
            pool_max_overflow: super::helpers::env_u32("SQL_CHAT_POOL_MAX_OVERFLOW", 10),
            pool_timeout_secs: env_u64("SQL_CHAT_POOL_TIMEOUT_SECS", 30),

            schema_cache_ttl_secs: env_u64("SQL_CHAT_SCHEMA_CACHE_TTL_SECS", 300),
            schema_link_top_k: env_usize("SQL_CHAT_SCHEMA_LINK_TOP_K", 5),

            few_shot_top_k: env_usize("SQL_CHAT_FEW_SHOT_TOP_K", 5),
            few_shot_rerank_top_k: env_usize("SQL_CHAT_FEW_SHOT_RERANK_TOP_K", 15),
            few_shot_lexical_weight: env_f32("SQL_CHAT_FEW_SHOT_LEXICAL_WEIGHT", 0.3),
            few_shot_vector_weight: env_f32("SQL_CHAT_FEW_SHOT_VECTOR_WEIGHT", 0.7),

            max_syntactic_retries: super::helpers::env_u32("SQL_CHAT_MAX_SYNTACTIC_RETRIES", 3),
            max_semantic_retries: super::helpers::env_u32("SQL_CHAT_MAX_SEMANTIC_RETRIES", 3),
            max_acceptable_rows: env_u64("SQL_CHAT_MAX_ACCEPTABLE_ROWS", 5000) as i64,

            max_estimated_rows: env_u64("SQL_CHAT_MAX_ESTIMATED_ROWS", 100_000) as i64,
            max_cost: env_f32("SQL_CHAT_MAX_COST", 50_000.0) as f64,

            max_result_rows: env_u64("SQL_CHAT_MAX_RESULT_ROWS", 10_000) as i64,
            statement_timeout_secs: env_u64("SQL_CHAT_STATEMENT_TIMEOUT_SECS", 30),

            max_decompose_subquestions: env_usize("SQL_CHAT_MAX_DECOMPOSE_SUBQUESTIONS", 5),
            conversation_memory_cap: env_usize("SQL_CHAT_CONVERSATION_MEMORY_CAP", 10),

            telemetry_ring_cap: env_usize("SQL_CHAT_TELEMETRY_RING_CAP", 1000),
        }
    }
}

/// Confidence scoring weights and thresholds (§4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    pub weight_table_relevance: f32,
    pub weight_few_shot_similarity: f32,
    pub weight_retry_penalty: f32,
    pub weight_column_overlap: f32,
    pub high_threshold: f32,
    pub medium_threshold: f32,
}

impl ConfidenceConfig {
    pub fn from_env() -> Self {
        Self {
            weight_table_relevance: env_f32("CONFIDENCE_WEIGHT_TABLE_RELEVANCE", 0.30),
            weight_few_shot_similarity: env_f32("CONFIDENCE_WEIGHT_FEW_SHOT_SIMILARITY", 0.30),
            weight_retry_penalty: env_f32("CONFIDENCE_WEIGHT_RETRY_PENALTY", 0.20),
            weight_column_overlap: env_f32("CONFIDENCE_WEIGHT_COLUMN_OVERLAP", 0.20),
            high_threshold: env_f32("CONFIDENCE_HIGH_THRESHOLD", 0.8),
            medium_threshold: env_f32("CONFIDENCE_MEDIUM_THRESHOLD", 0.5),
        }
    }
}
