// src/telemetry/mod.rs
// Telemetry Logger (§4.19, §3 QueryTelemetry): append-only, persisted if a
// database is configured, otherwise an in-memory ring.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTelemetry {
    pub session_id: String,
    pub user_query: String,
    pub generated_sql: Option<String>,
    pub intent: Option<String>,
    pub confidence_score: Option<f32>,
    pub retry_count: u32,
    pub execution_time_ms: i64,
    pub row_count: Option<i64>,
    pub cost_estimate: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryAggregate {
    pub total: usize,
    pub success_rate: f64,
    pub avg_retries: f64,
    pub avg_confidence: f64,
    pub empty_result_rate: f64,
    pub avg_execution_time_ms: f64,
    pub intent_distribution: HashMap<String, usize>,
    pub top_error_prefixes: Vec<(String, usize)>,
}

enum Backend {
    Postgres(PgPool),
    Ring(Mutex<VecDeque<QueryTelemetry>>),
}

pub struct TelemetryLogger {
    backend: Backend,
    ring_cap: usize,
}

impl TelemetryLogger {
    pub fn postgres(pool: PgPool, ring_cap: usize) -> Self {
        Self {
            backend: Backend::Postgres(pool),
            ring_cap,
        }
    }

    pub fn in_memory(ring_cap: usize) -> Self {
        Self {
            backend: Backend::Ring(Mutex::new(VecDeque::with_capacity(ring_cap))),
            ring_cap,
        }
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        if let Backend::Postgres(pool) = &self.backend {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS query_telemetry (
                    id BIGSERIAL PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    user_query TEXT NOT NULL,
                    generated_sql TEXT,
                    intent TEXT,
                    confidence_score REAL,
                    retry_count INT NOT NULL,
                    execution_time_ms BIGINT NOT NULL,
                    row_count BIGINT,
                    cost_estimate DOUBLE PRECISION,
                    success BOOLEAN NOT NULL,
                    error TEXT,
                    timestamp TIMESTAMPTZ NOT NULL
                )",
            )
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub async fn log(&self, entry: QueryTelemetry) -> anyhow::Result<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO query_telemetry
                        (session_id, user_query, generated_sql, intent, confidence_score,
                         retry_count, execution_time_ms, row_count, cost_estimate, success,
                         error, timestamp)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
                )
                .bind(&entry.session_id)
                .bind(&entry.user_query)
                .bind(&entry.generated_sql)
                .bind(&entry.intent)
                .bind(entry.confidence_score)
                .bind(entry.retry_count as i32)
                .bind(entry.execution_time_ms)
                .bind(entry.row_count)
                .bind(entry.cost_estimate)
                .bind(entry.success)
                .bind(&entry.error)
                .bind(entry.timestamp)
                .execute(pool)
                .await?;
            }
            Backend::Ring(ring) => {
                let mut guard = ring.lock();
                if guard.len() >= self.ring_cap {
                    guard.pop_front();
                }
                guard.push_back(entry);
            }
        }
        Ok(())
    }

    /// Aggregations over the last `window`: success rate, avg retries, avg
    /// confidence, empty-result rate, avg exec time, intent distribution,
    /// top error-message prefixes (§4.19).
    pub async fn aggregate(&self, window: Duration) -> anyhow::Result<TelemetryAggregate> {
        let cutoff = Utc::now() - window;
        let entries: Vec<QueryTelemetry> = match &self.backend {
            Backend::Postgres(pool) => {
                let rows = sqlx::query_as::<_, QueryTelemetryRow>(
                    "SELECT session_id, user_query, generated_sql, intent, confidence_score,
                            retry_count, execution_time_ms, row_count, cost_estimate, success,
                            error, timestamp
                     FROM query_telemetry WHERE timestamp >= $1",
                )
                .bind(cutoff)
                .fetch_all(pool)
                .await?;
                rows.into_iter().map(Into::into).collect()
            }
            Backend::Ring(ring) => ring
                .lock()
                .iter()
                .filter(|e| e.timestamp >= cutoff)
                .cloned()
                .collect(),
        };

        Ok(Self::compute_aggregate(&entries))
    }

    fn compute_aggregate(entries: &[QueryTelemetry]) -> TelemetryAggregate {
        let total = entries.len();
        if total == 0 {
            return TelemetryAggregate {
                total: 0,
                success_rate: 0.0,
                avg_retries: 0.0,
                avg_confidence: 0.0,
                empty_result_rate: 0.0,
                avg_execution_time_ms: 0.0,
                intent_distribution: HashMap::new(),
                top_error_prefixes: Vec::new(),
            };
        }

        let success_count = entries.iter().filter(|e| e.success).count();
        let avg_retries =
            entries.iter().map(|e| e.retry_count as f64).sum::<f64>() / total as f64;
        let confidences: Vec<f64> = entries
            .iter()
            .filter_map(|e| e.confidence_score.map(|c| c as f64))
            .collect();
        let avg_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
        let empty_count = entries
            .iter()
            .filter(|e| e.row_count.map(|r| r == 0).unwrap_or(false))
            .count();
        let avg_execution_time_ms =
            entries.iter().map(|e| e.execution_time_ms as f64).sum::<f64>() / total as f64;

        let mut intent_distribution: HashMap<String, usize> = HashMap::new();
        for e in entries {
            if let Some(intent) = &e.intent {
                *intent_distribution.entry(intent.clone()).or_insert(0) += 1;
            }
        }

        let mut error_prefixes: HashMap<String, usize> = HashMap::new();
        for e in entries {
            if let Some(error) = &e.error {
                let prefix: String = error.chars().take(40).collect();
                *error_prefixes.entry(prefix).or_insert(0) += 1;
            }
        }
        let mut top_error_prefixes: Vec<(String, usize)> = error_prefixes.into_iter().collect();
        top_error_prefixes.sort_by(|a, b| b.1.cmp(&a.1));
        top_error_prefixes.truncate(5);

        TelemetryAggregate {
            total,
            success_rate: success_count as f64 / total as f64,
            avg_retries,
            avg_confidence,
            empty_result_rate: empty_count as f64 / total as f64,
            avg_execution_time_ms,
            intent_distribution,
            top_error_prefixes,
        }
    }
}

#[derive(sqlx::FromRow)]
struct QueryTelemetryRow {
    session_id: String,
    user_query: String,
    generated_sql: Option<String>,
    intent: Option<String>,
    confidence_score: Option<f32>,
    retry_count: i32,
    execution_time_ms: i64,
    row_count: Option<i64>,
    cost_estimate: Option<f64>,
    success: bool,
    error: Option<String>,
    timestamp: DateTime<Utc>,
}

impl From<QueryTelemetryRow> for QueryTelemetry {
    fn from(row: QueryTelemetryRow) -> Self {
        Self {
            session_id: row.session_id,
            user_query: row.user_query,
            generated_sql: row.generated_sql,
            intent: row.intent,
            confidence_score: row.confidence_score,
            retry_count: row.retry_count as u32,
            execution_time_ms: row.execution_time_ms,
            row_count: row.row_count,
            cost_estimate: row.cost_estimate,
            success: row.success,
            error: row.error,
            timestamp: row.timestamp,
        }
    }
}

pub type SharedTelemetryLogger = Arc<TelemetryLogger>;

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(success: bool, intent: &str, row_count: i64) -> QueryTelemetry {
        QueryTelemetry {
            session_id: "s1".to_string(),
            user_query: "q".to_string(),
            generated_sql: Some("SELECT 1".to_string()),
            intent: Some(intent.to_string()),
            confidence_score: Some(0.9),
            retry_count: 1,
            execution_time_ms: 100,
            row_count: Some(row_count),
            cost_estimate: Some(10.0),
            success,
            error: if success { None } else { Some("boom: details".to_string()) },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn aggregate_computes_success_and_empty_rates() {
        let logger = TelemetryLogger::in_memory(100);
        logger.log(entry(true, "lookup", 5)).await.unwrap();
        logger.log(entry(true, "lookup", 0)).await.unwrap();
        logger.log(entry(false, "aggregation", 0)).await.unwrap();

        let aggregate = logger.aggregate(Duration::hours(1)).await.unwrap();
        assert_eq!(aggregate.total, 3);
        assert!((aggregate.success_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert!((aggregate.empty_result_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(aggregate.intent_distribution.get("lookup"), Some(&2));
    }

    #[tokio::test]
    async fn ring_evicts_oldest_when_over_capacity() {
        let logger = TelemetryLogger::in_memory(2);
        logger.log(entry(true, "lookup", 1)).await.unwrap();
        logger.log(entry(true, "lookup", 1)).await.unwrap();
        logger.log(entry(true, "lookup", 1)).await.unwrap();

        let aggregate = logger.aggregate(Duration::hours(1)).await.unwrap();
        assert_eq!(aggregate.total, 2);
    }
}
