// src/sql_chat/service.rs
// SQL Chat Service (§4.16): wires every pipeline stage together behind one
// call per natural-language question, owns connection/session state, and is
// the thing the HTTP layer talks to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use super::connection::DatabaseConnectionManager;
use super::cost::CostEstimator;
use super::decompose::{needs_decomposition, JoinPatternCache, QueryDecomposer};
use super::executor::SafeExecutor;
use super::few_shot::{infer_domain, FewShotRetriever};
use super::generator::{format_schema_for_prompt, GenerationRequest, SqlGenerator};
use super::inspector::SemanticInspector;
use super::intent::IntentClassifier;
use super::linker::SchemaLinker;
use super::masker::DataMasker;
use super::memory::{SqlChatMemory, SqlExchange};
use super::schema::SchemaIntrospector;
use super::types::{
    ConfidenceScore, DatabaseConnection, QueryHistoryEntry, QueryResult, SchemaInfo,
    SessionStatus, SqlChatSession, StageTimings,
};
use super::validator::QueryValidator;
use crate::config::sql_chat::{ConfidenceConfig, SqlChatConfig};
use crate::llm::{EmbeddingProvider, LlmProvider};
use crate::metrics;
use crate::reranker::RerankerProvider;
use crate::telemetry::{QueryTelemetry, SharedTelemetryLogger};

fn record(timings: &mut StageTimings, stage: &str, start: Instant) {
    timings.record(stage, start.elapsed().as_secs_f64() * 1000.0);
}

pub struct SqlChatService {
    connections: Arc<DatabaseConnectionManager>,
    connection_registry: parking_lot::RwLock<HashMap<Uuid, DatabaseConnection>>,
    schema: SchemaIntrospector,
    linker: SchemaLinker,
    few_shot: FewShotRetriever,
    intent: IntentClassifier,
    validator: Arc<QueryValidator>,
    generator: SqlGenerator,
    cost: CostEstimator,
    executor: SafeExecutor,
    inspector: SemanticInspector,
    masker: DataMasker,
    confidence_config: ConfidenceConfig,
    decomposer: QueryDecomposer,
    join_patterns: JoinPatternCache,
    llm: Arc<dyn LlmProvider>,
    telemetry: SharedTelemetryLogger,
    config: SqlChatConfig,
    sessions: parking_lot::RwLock<HashMap<Uuid, SqlChatSession>>,
    memories: parking_lot::RwLock<HashMap<Uuid, SqlChatMemory>>,
}

impl SqlChatService {
    pub fn new(
        config: SqlChatConfig,
        confidence_config: ConfidenceConfig,
        llm: Arc<dyn LlmProvider>,
        embeddings: Arc<dyn EmbeddingProvider>,
        reranker: Arc<RerankerProvider>,
        telemetry: SharedTelemetryLogger,
    ) -> Self {
        let connections = Arc::new(DatabaseConnectionManager::new(config.clone()));
        let validator = Arc::new(QueryValidator::new());
        let generator = SqlGenerator::new(llm.clone(), validator.clone(), config.max_syntactic_retries);
        let few_shot = FewShotRetriever::new(
            embeddings.clone(),
            reranker,
            config.few_shot_lexical_weight,
            config.few_shot_vector_weight,
            config.few_shot_rerank_top_k,
        );
        let linker = SchemaLinker::new(embeddings, config.schema_link_top_k);
        let cost = CostEstimator::new(&config);
        let executor = SafeExecutor::new(config.max_result_rows, config.statement_timeout_secs);
        let inspector = SemanticInspector::new(config.max_acceptable_rows, config.max_semantic_retries);
        let decomposer = QueryDecomposer::new(llm.clone(), config.max_decompose_subquestions);
        let schema = SchemaIntrospector::new(config.schema_cache_ttl_secs);

        Self {
            connections,
            connection_registry: parking_lot::RwLock::new(HashMap::new()),
            schema,
            linker,
            few_shot,
            intent: IntentClassifier::new(),
            validator,
            generator,
            cost,
            executor,
            inspector,
            masker: DataMasker::new(),
            confidence_config,
            decomposer,
            join_patterns: JoinPatternCache::new(),
            llm,
            telemetry,
            config,
            sessions: parking_lot::RwLock::new(HashMap::new()),
            memories: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Loads an initial corpus of worked natural-language -> SQL examples
    /// that the few-shot retriever draws from (§4.6).
    pub fn load_few_shot_examples(&self, examples: Vec<super::types::FewShotExample>) {
        self.few_shot.load(examples);
    }

    /// Registers a connection, encrypting `plaintext_password` at rest and
    /// running the read-only verification probe before the connection is
    /// usable by any session (§4.9).
    pub async fn register_connection(
        &self,
        mut connection: DatabaseConnection,
        plaintext_password: Option<&str>,
    ) -> anyhow::Result<DatabaseConnection> {
        if let Some(password) = plaintext_password {
            connection.password_ciphertext = Some(self.connections.encrypt_password(password)?);
        }
        if !self.connections.verify_readonly(&connection).await? {
            anyhow::bail!("connection credential is not read-only; refusing to register");
        }
        self.connection_registry
            .write()
            .insert(connection.id, connection.clone());
        Ok(connection)
    }

    pub fn list_connections(&self, user_id: &str) -> Vec<DatabaseConnection> {
        self.connection_registry
            .read()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn get_connection(&self, connection_id: Uuid) -> Option<DatabaseConnection> {
        self.connection_registry.read().get(&connection_id).cloned()
    }

    pub async fn test_connection(&self, connection_id: Uuid) -> anyhow::Result<()> {
        let connection = self
            .get_connection(connection_id)
            .ok_or_else(|| anyhow::anyhow!("unknown connection"))?;
        self.connections.test_connection(&connection).await
    }

    pub fn remove_connection(&self, connection_id: Uuid) {
        self.connections.close(connection_id);
        self.connection_registry.write().remove(&connection_id);
    }

    pub async fn create_session(
        &self,
        user_id: impl Into<String>,
        connection_id: Uuid,
    ) -> anyhow::Result<SqlChatSession> {
        let connection = self
            .get_connection(connection_id)
            .ok_or_else(|| anyhow::anyhow!("unknown connection"))?;

        let mut session = SqlChatSession::new(user_id, connection_id);
        session.status = SessionStatus::GeneratingDictionary;
        let schema = self.schema.introspect(&self.connections, &connection, false).await?;
        session.schema = Some(schema);
        session.status = SessionStatus::Ready;

        self.sessions.write().insert(session.session_id, session.clone());
        self.memories
            .write()
            .insert(session.session_id, SqlChatMemory::new(self.config.conversation_memory_cap));
        metrics::session_opened();
        Ok(session)
    }

    pub fn get_session(&self, session_id: Uuid) -> Option<SqlChatSession> {
        self.sessions.read().get(&session_id).cloned()
    }

    pub fn close_session(&self, session_id: Uuid) {
        self.sessions.write().remove(&session_id);
        self.memories.write().remove(&session_id);
        metrics::session_closed();
    }

    /// Forces a fresh schema introspection for the session's connection,
    /// bypassing the TTL/fingerprint cache (§4.4).
    pub async fn refresh_schema(&self, session_id: Uuid) -> anyhow::Result<SchemaInfo> {
        let connection_id = self
            .sessions
            .read()
            .get(&session_id)
            .map(|s| s.connection_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session"))?;
        let connection = self
            .get_connection(connection_id)
            .ok_or_else(|| anyhow::anyhow!("unknown connection"))?;

        let schema = self.schema.introspect(&self.connections, &connection, true).await?;
        if let Some(session) = self.sessions.write().get_mut(&session_id) {
            session.schema = Some(schema.clone());
        }
        Ok(schema)
    }

    /// Runs the full NL -> SQL pipeline (§4.16): validate, classify,
    /// link/retrieve, generate with syntactic self-correction, cost-gate,
    /// execute, semantically inspect with bounded regeneration, mask, score
    /// confidence, explain, and log telemetry. Returns `Ok` with a
    /// `success: false` result for any pipeline-stage rejection; `Err` only
    /// for an unknown session/connection.
    pub async fn execute_query(&self, session_id: Uuid, user_query: &str) -> anyhow::Result<QueryResult> {
        let mut timings = StageTimings::default();

        let session = self
            .get_session(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session"))?;
        let connection = self
            .get_connection(session.connection_id)
            .ok_or_else(|| anyhow::anyhow!("unknown connection"))?;
        let schema = match session.schema.clone() {
            Some(schema) => schema,
            None => return Ok(self.finish(session_id, user_query, None, None, 0, QueryResult::failure("session has no introspected schema", timings)).await),
        };

        let start = Instant::now();
        if let Err(err) = self.validator.validate_user_input(user_query) {
            record(&mut timings, "validate_input", start);
            return Ok(self.finish(session_id, user_query, None, None, 0, QueryResult::failure(err.to_string(), timings)).await);
        }
        record(&mut timings, "validate_input", start);

        self.set_status(session_id, SessionStatus::Generating);

        let start = Instant::now();
        let is_follow_up = self
            .memories
            .read()
            .get(&session_id)
            .map(|m| m.is_follow_up(user_query))
            .unwrap_or(false);
        record(&mut timings, "refinement_check", start);

        if is_follow_up {
            if let Some(result) = self
                .execute_refinement(session_id, user_query, &connection, &schema, timings.clone())
                .await
            {
                return Ok(result);
            }
            // No prior exchange to refine against (memory was empty); fall
            // through to the full pipeline instead of failing the query.
        }

        let effective_query = user_query.to_string();
        let start = Instant::now();
        let classified = self.intent.classify(&effective_query);
        record(&mut timings, "intent", start);

        let start = Instant::now();
        let (linked_schema, table_relevance) = match self
            .linker
            .link_with_relevance(connection.id, &effective_query, &schema)
            .await
        {
            Ok(result) => result,
            Err(err) => return Ok(self.finish(session_id, user_query, None, None, 0, QueryResult::failure(format!("schema linking failed: {err}"), timings)).await),
        };
        record(&mut timings, "schema_link", start);

        let start = Instant::now();
        let domain_hint = infer_domain(&format_schema_for_prompt(&linked_schema));
        let examples = self
            .few_shot
            .retrieve(&effective_query, self.config.few_shot_top_k, domain_hint.as_deref(), None, true)
            .await
            .unwrap_or_default();
        let few_shot_similarity = examples
            .iter()
            .filter_map(|e| e.similarity)
            .fold(0.0f32, f32::max);
        record(&mut timings, "few_shot", start);

        let join_hints = self.join_patterns.hints(connection.id);

        self.set_status(session_id, SessionStatus::Validating);
        let start = Instant::now();
        let (sql, syntactic_retries) = if needs_decomposition(&effective_query) {
            match self
                .generate_decomposed(&effective_query, &linked_schema, &classified, &examples, &join_hints)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => return Ok(self.finish(session_id, user_query, None, Some(classified.intent.as_str().to_string()), 0, QueryResult::failure(format!("decomposition failed: {err}"), timings)).await),
            }
        } else {
            let request = GenerationRequest {
                user_query: &effective_query,
                intent: &classified,
                schema: &linked_schema,
                few_shot_examples: &examples,
                join_hints: &join_hints,
            };
            match self.generator.generate(&request).await {
                Ok(outcome) => (outcome.sql, outcome.retry_count),
                Err(err) => return Ok(self.finish(session_id, user_query, None, Some(classified.intent.as_str().to_string()), 0, QueryResult::failure(format!("SQL generation failed: {err}"), timings)).await),
            }
        };
        record(&mut timings, "generate", start);

        if let Err(err) = self.validator.validate_generated_sql(&sql, Some(&linked_schema)) {
            let mut result = QueryResult::failure(err.to_string(), timings);
            result.sql_generated = Some(sql.clone());
            result.intent = Some(classified.intent.as_str().to_string());
            result.retry_count = syntactic_retries;
            return Ok(self.finish(session_id, user_query, Some(sql), Some(classified.intent.as_str().to_string()), syntactic_retries, result).await);
        }

        self.set_status(session_id, SessionStatus::Executing);
        let start = Instant::now();
        let pool = match self.connections.pool_for(&connection).await {
            Ok(pool) => pool,
            Err(err) => return Ok(self.finish(session_id, user_query, Some(sql), Some(classified.intent.as_str().to_string()), syntactic_retries, QueryResult::failure(format!("could not open connection pool: {err}"), timings)).await),
        };
        let cost_estimate = self.cost.estimate(pool.as_ref(), connection.db_type, &sql).await;
        if let Some(estimate) = &cost_estimate {
            if !self.cost.is_safe(estimate) {
                let mut result = QueryResult::failure("Query was rejected as too costly to run safely", timings);
                result.sql_generated = Some(sql.clone());
                result.cost_estimate = Some(estimate.clone());
                result.intent = Some(classified.intent.as_str().to_string());
                result.retry_count = syntactic_retries;
                return Ok(self.finish(session_id, user_query, Some(sql), Some(classified.intent.as_str().to_string()), syntactic_retries, result).await);
            }
        }
        record(&mut timings, "cost_estimate", start);

        let start = Instant::now();
        let mut current_sql = sql;
        let mut outcome = match self.executor.execute(pool.as_ref(), &current_sql).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut result = QueryResult::failure(err.to_string(), timings);
                result.sql_generated = Some(current_sql);
                result.intent = Some(classified.intent.as_str().to_string());
                result.retry_count = syntactic_retries;
                return Ok(self.finish(session_id, user_query, result.sql_generated.clone(), Some(classified.intent.as_str().to_string()), syntactic_retries, result).await);
            }
        };

        let mut semantic_retries = 0u32;
        while let Some(issue) = self.inspector.inspect(&outcome, &effective_query) {
            if semantic_retries >= self.config.max_semantic_retries {
                break;
            }
            let corrected = match self
                .generator
                .regenerate_with_feedback(&effective_query, &current_sql, &issue.correction_hint())
                .await
            {
                Ok(sql) => sql,
                Err(_) => break,
            };
            if self
                .validator
                .validate_generated_sql(&corrected, Some(&linked_schema))
                .is_err()
            {
                break;
            }
            match self.executor.execute(pool.as_ref(), &corrected).await {
                Ok(next) => {
                    current_sql = corrected;
                    outcome = next;
                    semantic_retries += 1;
                }
                Err(_) => break,
            }
        }
        record(&mut timings, "execute_and_inspect", start);

        self.remember_join_patterns(connection.id, &current_sql);

        let masking_policy = connection.masking_policy.clone().unwrap_or_default();
        let masked_rows = self.masker.apply(&outcome.rows, &masking_policy);

        let total_retries = syntactic_retries + semantic_retries;
        let confidence = {
            let scorer = super::confidence::ConfidenceScorer::new(&self.confidence_config);
            scorer.score(table_relevance, few_shot_similarity, total_retries, &effective_query, &outcome.columns)
        };

        let start = Instant::now();
        let explanation = self.explain(&effective_query, &current_sql, &outcome.columns, outcome.rows.len()).await;
        record(&mut timings, "explain", start);

        let result = QueryResult {
            success: true,
            sql_generated: Some(current_sql.clone()),
            columns: outcome.columns,
            row_count: masked_rows.len() as i64,
            rows: masked_rows,
            execution_time_ms: outcome.execution_time_ms,
            error: None,
            confidence: Some(confidence),
            cost_estimate,
            intent: Some(classified.intent.as_str().to_string()),
            retry_count: total_retries,
            explanation,
            validation_warnings: Vec::new(),
            timings,
        };

        metrics::record_sql_chat_query(classified.intent.as_str(), true, syntactic_retries);
        Ok(self
            .finish(session_id, user_query, Some(current_sql), Some(classified.intent.as_str().to_string()), total_retries, result)
            .await)
    }

    /// Refinement branch (§4.17): modifies the previous exchange's SQL per
    /// the new instruction, skipping intent classification and cost
    /// estimation, then executes/masks/logs like the full pipeline. Returns
    /// `None` when there is no prior exchange to refine, in which case the
    /// caller falls back to the full pipeline.
    async fn execute_refinement(
        &self,
        session_id: Uuid,
        user_query: &str,
        connection: &DatabaseConnection,
        schema: &SchemaInfo,
        mut timings: StageTimings,
    ) -> Option<QueryResult> {
        let previous = self.memories.read().get(&session_id)?.last().cloned()?;

        let start = Instant::now();
        let refined_sql = match self
            .generator
            .refine_previous_sql(user_query, &previous.sql)
            .await
        {
            Ok(sql) => sql,
            Err(err) => {
                let result = QueryResult::failure(format!("refinement failed: {err}"), timings);
                return Some(self.finish(session_id, user_query, None, None, 0, result).await);
            }
        };
        record(&mut timings, "refine", start);

        if let Err(err) = self.validator.validate_generated_sql(&refined_sql, Some(schema)) {
            let mut result = QueryResult::failure(err.to_string(), timings);
            result.sql_generated = Some(refined_sql.clone());
            return Some(
                self.finish(session_id, user_query, Some(refined_sql), None, 0, result)
                    .await,
            );
        }

        self.set_status(session_id, SessionStatus::Executing);
        let start = Instant::now();
        let pool = match self.connections.pool_for(connection).await {
            Ok(pool) => pool,
            Err(err) => {
                let mut result = QueryResult::failure(format!("could not open connection pool: {err}"), timings);
                result.sql_generated = Some(refined_sql.clone());
                return Some(
                    self.finish(session_id, user_query, Some(refined_sql), None, 0, result)
                        .await,
                );
            }
        };
        let outcome = match self.executor.execute(pool.as_ref(), &refined_sql).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut result = QueryResult::failure(err.to_string(), timings);
                result.sql_generated = Some(refined_sql.clone());
                return Some(
                    self.finish(session_id, user_query, Some(refined_sql), None, 0, result)
                        .await,
                );
            }
        };
        record(&mut timings, "execute", start);

        let masking_policy = connection.masking_policy.clone().unwrap_or_default();
        let masked_rows = self.masker.apply(&outcome.rows, &masking_policy);

        let result = QueryResult {
            success: true,
            sql_generated: Some(refined_sql.clone()),
            columns: outcome.columns,
            row_count: masked_rows.len() as i64,
            rows: masked_rows,
            execution_time_ms: outcome.execution_time_ms,
            error: None,
            confidence: None,
            cost_estimate: None,
            intent: None,
            retry_count: 0,
            explanation: None,
            validation_warnings: Vec::new(),
            timings,
        };

        metrics::record_sql_chat_query("refinement", true, 0);
        Some(
            self.finish(session_id, user_query, Some(refined_sql), None, 0, result)
                .await,
        )
    }

    async fn generate_decomposed(
        &self,
        query: &str,
        schema: &SchemaInfo,
        classified: &super::intent::ClassifiedIntent,
        examples: &[super::types::FewShotExample],
        join_hints: &[String],
    ) -> anyhow::Result<(String, u32)> {
        let schema_summary = format_schema_for_prompt(schema);
        let mut sub_questions = self.decomposer.plan(query, &schema_summary).await?;
        let mut total_retries = 0u32;

        for sub in sub_questions.iter_mut() {
            let request = GenerationRequest {
                user_query: &sub.question,
                intent: classified,
                schema,
                few_shot_examples: examples,
                join_hints,
            };
            let outcome = self.generator.generate(&request).await?;
            total_retries += outcome.retry_count;
            sub.sql = Some(outcome.sql);
        }

        let assembled = self
            .decomposer
            .assemble_cte(&sub_questions)
            .ok_or_else(|| anyhow::anyhow!("could not assemble sub-questions into a single query"))?;
        self.validator
            .validate_generated_sql(&assembled, None)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok((assembled, total_retries))
    }

    fn remember_join_patterns(&self, connection_id: Uuid, sql: &str) {
        static JOIN_ON: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
            regex::Regex::new(r"(?i)join\s+([a-zA-Z_][a-zA-Z0-9_]*)\s+.*?on\s+([a-zA-Z_][a-zA-Z0-9_.]*\s*=\s*[a-zA-Z_][a-zA-Z0-9_.]*)").unwrap()
        });
        for caps in JOIN_ON.captures_iter(sql) {
            let table_b = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let join_col_pair = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let table_a = join_col_pair
                .split('=')
                .next()
                .and_then(|side| side.trim().split('.').next())
                .unwrap_or_default();
            if !table_a.is_empty() && !table_b.is_empty() {
                self.join_patterns.record(connection_id, table_a, table_b, join_col_pair);
            }
        }
    }

    async fn explain(&self, query: &str, sql: &str, columns: &[String], row_count: usize) -> Option<String> {
        let prompt = format!(
            "In one short sentence, explain what this SQL query answers for the question below. Do not restate the SQL.\n\nQuestion: {query}\nSQL: {sql}\nColumns returned: {}\nRows returned: {row_count}",
            columns.join(", ")
        );
        self.llm.complete(&prompt).await.ok()
    }

    fn set_status(&self, session_id: Uuid, status: SessionStatus) {
        if let Some(session) = self.sessions.write().get_mut(&session_id) {
            session.status = status;
        }
    }

    async fn finish(
        &self,
        session_id: Uuid,
        user_query: &str,
        sql: Option<String>,
        intent: Option<String>,
        retries: u32,
        result: QueryResult,
    ) -> QueryResult {
        let telemetry = QueryTelemetry {
            session_id: session_id.to_string(),
            user_query: user_query.to_string(),
            generated_sql: sql.clone(),
            intent,
            confidence_score: result.confidence.as_ref().map(|c| c.value),
            retry_count: retries,
            execution_time_ms: result.execution_time_ms,
            row_count: if result.success { Some(result.row_count) } else { None },
            cost_estimate: result.cost_estimate.as_ref().and_then(|c| c.total_cost),
            success: result.success,
            error: result.error.clone(),
            timestamp: Utc::now(),
        };
        let _ = self.telemetry.log(telemetry).await;

        if let Some(session) = self.sessions.write().get_mut(&session_id) {
            session.status = if result.success { SessionStatus::Complete } else { SessionStatus::Error };
            session.last_query_at = Some(Utc::now());
            session.query_history.push(QueryHistoryEntry {
                user_query: user_query.to_string(),
                result: result.clone(),
                timestamp: Utc::now(),
            });
        }

        if result.success {
            if let (Some(sql), Some(memory)) = (sql, self.memories.write().get_mut(&session_id)) {
                memory.push(SqlExchange {
                    user_query: user_query.to_string(),
                    sql,
                    result_summary: format!("{} row(s)", result.row_count),
                    columns: result.columns.clone(),
                });
            }
        }

        result
    }

    pub fn confidence_suggestions(&self, score: &ConfidenceScore) -> Vec<String> {
        super::confidence::ConfidenceScorer::new(&self.confidence_config).get_improvement_suggestions(score)
    }
}
