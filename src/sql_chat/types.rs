// src/sql_chat/types.rs
// Data-model types for the Text-to-SQL pipeline (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgres,
    Mysql,
    Sqlite,
}

impl DatabaseType {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Postgres => 5432,
            DatabaseType::Mysql => 3306,
            DatabaseType::Sqlite => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConnection {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: DatabaseType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password_ciphertext: Option<String>,
    pub schema: Option<String>,
    pub masking_policy: Option<MaskingPolicy>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Three disjoint sets of column names (§3, §4.13). Case-insensitive
/// membership; a column only ever belongs to one set (redact > mask > hash).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaskingPolicy {
    #[serde(default)]
    pub mask_columns: HashSet<String>,
    #[serde(default)]
    pub redact_columns: HashSet<String>,
    #[serde(default)]
    pub hash_columns: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    /// `"table.col"` when this column is a foreign key.
    pub foreign_key: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: Option<i64>,
    pub sample_values: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub database_name: String,
    pub tables: Vec<TableInfo>,
    pub relationships: Vec<ForeignKey>,
    pub cached_at: DateTime<Utc>,
    pub fingerprint: String,
}

impl SchemaInfo {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Basic,
    Joins,
    Aggregation,
    Subqueries,
    Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotExample {
    pub id: Uuid,
    pub natural_question: String,
    pub sql: String,
    pub sql_context: Option<String>,
    pub complexity: Option<Complexity>,
    pub domain: Option<String>,
    pub embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    GeneratingDictionary,
    Ready,
    Generating,
    Validating,
    Executing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub user_query: String,
    pub result: QueryResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlChatSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub connection_id: Uuid,
    pub schema: Option<SchemaInfo>,
    pub status: SessionStatus,
    pub query_history: Vec<QueryHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub last_query_at: Option<DateTime<Utc>>,
}

impl SqlChatSession {
    pub fn new(user_id: impl Into<String>, connection_id: Uuid) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            connection_id,
            schema: None,
            status: SessionStatus::Pending,
            query_history: Vec::new(),
            created_at: Utc::now(),
            last_query_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub level: ConfidenceLevel,
    pub value: f32,
    pub table_relevance: f32,
    pub few_shot_similarity: f32,
    pub retry_penalty: f32,
    pub column_overlap: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimings(pub HashMap<String, f64>);

impl StageTimings {
    pub fn record(&mut self, stage: &str, millis: f64) {
        self.0.insert(stage.to_string(), millis);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    pub total_cost: Option<f64>,
    pub estimated_rows: Option<i64>,
    pub has_seq_scan: bool,
    pub has_cartesian: bool,
    pub plan_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub sql_generated: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, serde_json::Value>>,
    pub row_count: i64,
    pub execution_time_ms: i64,
    pub error: Option<String>,
    pub confidence: Option<ConfidenceScore>,
    pub cost_estimate: Option<CostEstimate>,
    pub intent: Option<String>,
    pub retry_count: u32,
    pub explanation: Option<String>,
    pub validation_warnings: Vec<String>,
    pub timings: StageTimings,
}

impl QueryResult {
    pub fn failure(error: impl Into<String>, timings: StageTimings) -> Self {
        Self {
            success: false,
            sql_generated: None,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
            error: Some(error.into()),
            confidence: None,
            cost_estimate: None,
            intent: None,
            retry_count: 0,
            explanation: None,
            validation_warnings: Vec::new(),
            timings,
        }
    }
}
