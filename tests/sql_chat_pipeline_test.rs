// tests/sql_chat_pipeline_test.rs
// End-to-end exercises of the NL->SQL pipeline against a real file-backed
// SQLite database. No network calls: the LLM is a canned-response stub, the
// embedding provider is the deterministic hash-based one, and the reranker
// is constructed disabled. Covers the read-only-enforcement, syntactic
// self-correction, schema-change-detection, and follow-up-refinement paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::any::AnyPoolOptions;
use uuid::Uuid;

use dbnotebook_core::config::sql_chat::{ConfidenceConfig, SqlChatConfig};
use dbnotebook_core::llm::{ChatResponse, ChatStream, EmbeddingProvider, LlmProvider, Message, TokenUsage};
use dbnotebook_core::llm::embeddings::HashEmbeddingProvider;
use dbnotebook_core::reranker::RerankerProvider;
use dbnotebook_core::config::llm::RerankerConfig;
use dbnotebook_core::sql_chat::connection::DatabaseConnectionManager;
use dbnotebook_core::sql_chat::schema::SchemaIntrospector;
use dbnotebook_core::sql_chat::service::SqlChatService;
use dbnotebook_core::sql_chat::types::{DatabaseConnection, DatabaseType};
use dbnotebook_core::telemetry::TelemetryLogger;

/// Returns queued responses in order, falling back to a harmless default
/// once exhausted. Shared `call_count` lets tests assert an LLM was never
/// (or only exactly N times) invoked.
struct StubLlm {
    responses: Mutex<VecDeque<String>>,
    call_count: AtomicUsize,
}

impl StubLlm {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            call_count: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }

    async fn chat(&self, _messages: &[Message], _temperature: f32) -> anyhow::Result<ChatResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let content = self.responses.lock().pop_front().unwrap_or_else(|| "SELECT 1".to_string());
        Ok(ChatResponse {
            content,
            usage: TokenUsage::default(),
        })
    }

    async fn stream(&self, _messages: &[Message], _temperature: f32) -> anyhow::Result<ChatStream> {
        anyhow::bail!("streaming is not exercised by these tests")
    }
}

fn test_config() -> SqlChatConfig {
    SqlChatConfig {
        encryption_key: "test-only-encryption-key".to_string(),
        skip_readonly_check: true,
        pool_size: 1,
        pool_max_overflow: 0,
        pool_timeout_secs: 10,
        schema_cache_ttl_secs: 300,
        schema_link_top_k: 5,
        few_shot_top_k: 5,
        few_shot_rerank_top_k: 15,
        few_shot_lexical_weight: 0.3,
        few_shot_vector_weight: 0.7,
        max_syntactic_retries: 3,
        max_semantic_retries: 3,
        max_acceptable_rows: 5000,
        max_estimated_rows: 100_000,
        max_cost: 50_000.0,
        max_result_rows: 10_000,
        statement_timeout_secs: 30,
        max_decompose_subquestions: 5,
        conversation_memory_cap: 10,
        telemetry_ring_cap: 1000,
    }
}

fn test_confidence_config() -> ConfidenceConfig {
    ConfidenceConfig {
        weight_table_relevance: 0.30,
        weight_few_shot_similarity: 0.30,
        weight_retry_penalty: 0.20,
        weight_column_overlap: 0.20,
        high_threshold: 0.8,
        medium_threshold: 0.5,
    }
}

fn disabled_reranker() -> Arc<RerankerProvider> {
    Arc::new(RerankerProvider::new(&RerankerConfig {
        enabled: false,
        model: "disabled".to_string(),
        top_n: 5,
        api_base: None,
    }))
}

/// Creates a fresh SQLite-backed database file, populates a `customers`
/// table, and returns the (tempdir, file path) -- the tempdir must stay
/// alive for the file to stick around.
async fn seed_customers_db() -> (tempfile::TempDir, String) {
    sqlx::any::install_default_drivers();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pipeline.db");
    std::fs::File::create(&path).expect("touch sqlite file");
    let database = path.to_str().unwrap().to_string();

    let setup_pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite://{database}"))
        .await
        .expect("open setup pool");

    sqlx::query(
        "CREATE TABLE customers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            revenue REAL NOT NULL,
            region TEXT NOT NULL
        )",
    )
    .execute(&setup_pool)
    .await
    .expect("create customers table");

    for (name, revenue, region) in [
        ("Alice", 100.0, "Europe"),
        ("Bob", 200.0, "Europe"),
        ("Carol", 150.0, "US"),
        ("Dave", 300.0, "Europe"),
        ("Eve", 50.0, "Asia"),
    ] {
        sqlx::query("INSERT INTO customers (name, revenue, region) VALUES (?, ?, ?)")
            .bind(name)
            .bind(revenue)
            .bind(region)
            .execute(&setup_pool)
            .await
            .expect("insert customer row");
    }

    setup_pool.close().await;
    (dir, database)
}

fn sqlite_connection(database: &str) -> DatabaseConnection {
    DatabaseConnection {
        id: Uuid::new_v4(),
        name: "test".to_string(),
        db_type: DatabaseType::Sqlite,
        host: None,
        port: None,
        database: database.to_string(),
        username: None,
        password_ciphertext: None,
        schema: None,
        masking_policy: None,
        user_id: "test-user".to_string(),
        created_at: Utc::now(),
        last_used_at: None,
    }
}

fn build_service(llm: Arc<dyn LlmProvider>) -> SqlChatService {
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
    SqlChatService::new(
        test_config(),
        test_confidence_config(),
        llm,
        embeddings,
        disabled_reranker(),
        Arc::new(TelemetryLogger::in_memory(100)),
    )
}

#[tokio::test]
async fn raw_sql_like_question_is_rejected_before_any_llm_call() {
    let (_dir, database) = seed_customers_db().await;
    let llm = Arc::new(StubLlm::new(vec![]));
    let service = build_service(llm.clone());

    let connection = service
        .register_connection(sqlite_connection(&database), None)
        .await
        .expect("register connection");
    let session = service
        .create_session("test-user", connection.id)
        .await
        .expect("create session");

    let result = service
        .execute_query(session.session_id, "delete everything")
        .await
        .expect("execute_query should not error");

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or_default().contains("raw SQL"));
    assert_eq!(llm.calls(), 0, "validator must reject before the LLM is ever called");
}

#[tokio::test]
async fn generated_delete_is_rejected_with_forbidden_operation_message() {
    let (_dir, database) = seed_customers_db().await;
    // Every attempt, including all syntactic self-correction retries, comes
    // back with a forbidden DELETE -- exhausting the retry budget and
    // surfacing the validator's own error message.
    let llm = Arc::new(StubLlm::new(vec![
        "SELECT DELETE FROM accounts",
        "SELECT DELETE FROM accounts",
        "SELECT DELETE FROM accounts",
        "SELECT DELETE FROM accounts",
    ]));
    let service = build_service(llm.clone());

    let connection = service
        .register_connection(sqlite_connection(&database), None)
        .await
        .expect("register connection");
    let session = service
        .create_session("test-user", connection.id)
        .await
        .expect("create session");

    let result = service
        .execute_query(session.session_id, "show me a list of user accounts")
        .await
        .expect("execute_query should not error");

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Query contains forbidden operation: DELETE"));
    assert_eq!(result.retry_count, 3);
    assert_eq!(llm.calls(), 4);
}

#[tokio::test]
async fn syntactic_self_correction_recovers_from_an_unknown_table() {
    let (_dir, database) = seed_customers_db().await;
    let llm = Arc::new(StubLlm::new(vec![
        "SELECT name FROM customerz",
        "SELECT name FROM customers",
    ]));
    let service = build_service(llm.clone());

    let connection = service
        .register_connection(sqlite_connection(&database), None)
        .await
        .expect("register connection");
    let session = service
        .create_session("test-user", connection.id)
        .await
        .expect("create session");

    let result = service
        .execute_query(session.session_id, "list the name")
        .await
        .expect("execute_query should not error");

    assert!(result.success, "error was: {:?}", result.error);
    assert_eq!(result.sql_generated.as_deref(), Some("SELECT name FROM customers"));
    assert_eq!(result.retry_count, 1);
}

#[tokio::test]
async fn follow_up_question_refines_previous_sql_without_reclassifying_intent() {
    let (_dir, database) = seed_customers_db().await;
    let llm = Arc::new(StubLlm::new(vec![
        "SELECT name, revenue FROM customers ORDER BY revenue DESC LIMIT 5",
        "Shows the top 5 customers by revenue.",
        "SELECT name, revenue FROM customers WHERE region = 'Europe' ORDER BY revenue DESC LIMIT 5",
    ]));
    let service = build_service(llm.clone());

    let connection = service
        .register_connection(sqlite_connection(&database), None)
        .await
        .expect("register connection");
    let session = service
        .create_session("test-user", connection.id)
        .await
        .expect("create session");

    let first = service
        .execute_query(session.session_id, "top 5 customers by revenue")
        .await
        .expect("first query should not error");
    assert!(first.success, "error was: {:?}", first.error);
    assert!(first.intent.is_some());

    let follow_up = service
        .execute_query(session.session_id, "only in Europe")
        .await
        .expect("follow-up should not error");

    assert!(follow_up.success, "error was: {:?}", follow_up.error);
    let sql = follow_up.sql_generated.expect("refined sql present");
    assert!(sql.contains("region = 'Europe'"), "sql was: {sql}");
    assert!(sql.contains("LIMIT 5"), "sql was: {sql}");
    assert!(follow_up.intent.is_none(), "refinement branch skips intent classification");
    assert!(follow_up.cost_estimate.is_none(), "refinement branch skips cost estimation");
    assert_eq!(follow_up.retry_count, 0);
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn schema_change_is_detected_via_fingerprint() {
    let (_dir, database) = seed_customers_db().await;
    let connection = sqlite_connection(&database);
    let manager = DatabaseConnectionManager::new(test_config());
    let introspector = SchemaIntrospector::new(300);

    let schema = introspector
        .introspect(&manager, &connection, false)
        .await
        .expect("initial introspect");
    assert_eq!(schema.tables.len(), 1);
    assert!(!introspector.has_schema_changed(&manager, &connection).await);

    let pool = manager.pool_for(&connection).await.expect("pool");
    sqlx::query("ALTER TABLE customers ADD COLUMN loyalty_tier TEXT")
        .execute(pool.as_ref())
        .await
        .expect("alter table");

    assert!(introspector.has_schema_changed(&manager, &connection).await);

    let refreshed = introspector
        .introspect(&manager, &connection, true)
        .await
        .expect("forced re-introspect");
    let customers = refreshed.table("customers").expect("customers table");
    assert!(customers.columns.iter().any(|c| c.name == "loyalty_tier"));
}
