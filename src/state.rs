// src/state.rs
// App wiring: builds every shared collaborator once at startup and hands out
// `Arc<AppState>` to the HTTP layer, with every router mounted against it.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::chunk::Chunker;
use crate::config::AppConfig;
use crate::conversation::ConversationStore;
use crate::llm::{EmbeddingProvider, EmbeddingRegistry, LlmProvider, LlmRegistry};
use crate::rag::RagChatEngine;
use crate::reranker::RerankerProvider;
use crate::retrieval::HybridRetriever;
use crate::sql_chat::SqlChatService;
use crate::store::VectorStore;
use crate::telemetry::TelemetryLogger;

pub struct AppState {
    pub config: AppConfig,
    pub vector_store: Arc<VectorStore>,
    pub conversation_store: Arc<ConversationStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub reranker: Arc<RerankerProvider>,
    pub retriever: Arc<HybridRetriever>,
    pub chunker: Chunker,
    pub sql_chat: Arc<SqlChatService>,
    pub telemetry: Arc<TelemetryLogger>,
    pub database_pool: Option<PgPool>,
    /// One RAG engine per (notebook_id, user_id), lazily built and reused so
    /// conversation memory survives across requests in the same process
    /// (§4.3 memory preservation).
    rag_engines: parking_lot::Mutex<HashMap<(String, String), RagChatEngine>>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let database_pool = if let Some(url) = &config.database.url {
            Some(
                PgPoolOptions::new()
                    .max_connections(config.database.max_connections)
                    .connect(url)
                    .await?,
            )
        } else {
            None
        };

        let vector_store = Arc::new(VectorStore::connect(&config.postgres).await?);

        let conversation_store = Arc::new(match &database_pool {
            Some(pool) => ConversationStore::postgres(pool.clone()),
            None => ConversationStore::in_memory(),
        });
        conversation_store.ensure_schema().await?;

        let llm_registry = LlmRegistry::from_config(&config.llm);
        let llm = llm_registry.default_provider()?;

        let embedding_registry = EmbeddingRegistry::from_config(&config.embedding);
        let embeddings = embedding_registry.default_provider()?;

        let reranker = Arc::new(RerankerProvider::new(&config.reranker));

        let retriever = Arc::new(HybridRetriever::new(
            vector_store.clone(),
            embeddings.clone(),
            reranker.clone(),
            Some(llm.clone()),
            config.retrieval.clone(),
        ));

        let chunker = Chunker::new(&config.chunk);

        let telemetry = Arc::new(match &database_pool {
            Some(pool) => TelemetryLogger::postgres(pool.clone(), config.sql_chat.telemetry_ring_cap),
            None => TelemetryLogger::in_memory(config.sql_chat.telemetry_ring_cap),
        });
        telemetry.ensure_schema().await?;

        let sql_chat = Arc::new(SqlChatService::new(
            config.sql_chat.clone(),
            config.confidence.clone(),
            llm.clone(),
            embeddings.clone(),
            reranker.clone(),
            telemetry.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            vector_store,
            conversation_store,
            llm,
            embeddings,
            reranker,
            retriever,
            chunker,
            sql_chat,
            telemetry,
            database_pool,
            rag_engines: parking_lot::Mutex::new(HashMap::new()),
        }))
    }

    /// Returns the RAG engine for `(notebook_id, user_id)`, constructing one
    /// on first use. Engines are process-lifetime, matching the per-process
    /// schema/table-embedding caches described in §5.
    pub fn rag_engine_for(&self, notebook_id: &str, user_id: &str) -> RagChatEngine {
        let key = (notebook_id.to_string(), user_id.to_string());
        let mut engines = self.rag_engines.lock();
        if let Some(engine) = engines.get(&key) {
            return engine.clone();
        }
        let engine = RagChatEngine::new(
            self.retriever.clone(),
            self.llm.clone(),
            self.conversation_store.clone(),
            notebook_id,
            user_id,
            self.config.rag_memory.clone(),
        );
        engines.insert(key, engine.clone());
        engine
    }

    /// Persists the engine's current memory buffer back into the cache after
    /// a request mutates it (push of the new exchange).
    pub fn store_rag_engine(&self, notebook_id: &str, user_id: &str, engine: RagChatEngine) {
        let key = (notebook_id.to_string(), user_id.to_string());
        self.rag_engines.lock().insert(key, engine);
    }
}
