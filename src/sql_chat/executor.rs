// src/sql_chat/executor.rs
// Safe Executor (§4.11): always-rollback transaction, LIMIT injection,
// per-statement timeout / wall-clock cancellation.

use regex::Regex;
use serde_json::Value;
use sqlx::any::{AnyPool, AnyRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

static LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\blimit\s+\d+").unwrap());

pub struct ExecutionOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, Value>>,
    pub execution_time_ms: i64,
}

pub struct SafeExecutor {
    max_rows: i64,
    statement_timeout: Duration,
}

impl SafeExecutor {
    pub fn new(max_rows: i64, statement_timeout_secs: u64) -> Self {
        Self {
            max_rows,
            statement_timeout: Duration::from_secs(statement_timeout_secs),
        }
    }

    fn inject_limit(&self, sql: &str) -> String {
        let trimmed = sql.trim().trim_end_matches(';');
        if LIMIT_PATTERN.is_match(trimmed) {
            trimmed.to_string()
        } else {
            format!("{trimmed} LIMIT {}", self.max_rows)
        }
    }

    /// Runs `sql` inside a transaction that is ALWAYS rolled back, even on
    /// success, so no write can land regardless of what the generator
    /// produced (§4.11, §5, §8 invariant 3).
    pub async fn execute(&self, pool: &AnyPool, sql: &str) -> anyhow::Result<ExecutionOutcome> {
        let bounded_sql = self.inject_limit(sql);
        let start = Instant::now();

        let result = tokio::time::timeout(self.statement_timeout, self.run_in_rolled_back_tx(pool, &bounded_sql))
            .await
            .map_err(|_| anyhow::anyhow!("statement timed out after {:?}", self.statement_timeout))??;

        let execution_time_ms = start.elapsed().as_millis() as i64;
        Ok(ExecutionOutcome {
            columns: result.0,
            rows: result.1,
            execution_time_ms,
        })
    }

    async fn run_in_rolled_back_tx(
        &self,
        pool: &AnyPool,
        sql: &str,
    ) -> anyhow::Result<(Vec<String>, Vec<HashMap<String, Value>>)> {
        let mut tx = pool.begin().await?;
        let rows: Vec<AnyRow> = match sqlx::query(sql).fetch_all(&mut *tx).await {
            Ok(rows) => rows,
            Err(err) => {
                tx.rollback().await.ok();
                return Err(map_db_error(err));
            }
        };

        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let out_rows = rows.iter().map(row_to_map).collect();

        tx.rollback().await?;
        Ok((columns, out_rows))
    }
}

fn row_to_map(row: &AnyRow) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = any_value(row, column.ordinal(), column.type_info().name());
        map.insert(name, value);
    }
    map
}

fn any_value(row: &AnyRow, index: usize, type_name: &str) -> Value {
    let upper = type_name.to_uppercase();
    if upper.contains("INT") {
        if let Ok(v) = row.try_get::<i64, _>(index) {
            return Value::from(v);
        }
    }
    if upper.contains("FLOAT") || upper.contains("DOUBLE") || upper.contains("REAL") || upper.contains("NUMERIC") {
        if let Ok(v) = row.try_get::<f64, _>(index) {
            return Value::from(v);
        }
    }
    if upper.contains("BOOL") {
        if let Ok(v) = row.try_get::<bool, _>(index) {
            return Value::from(v);
        }
    }
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(index) {
        return Value::from(v);
    }
    Value::Null
}

/// Maps known upstream errors (timeout, permission denied) to human-readable
/// messages (§4.11).
fn map_db_error(err: sqlx::Error) -> anyhow::Error {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("permission denied") {
        anyhow::anyhow!("Permission denied executing query against the target database")
    } else if lower.contains("timeout") {
        anyhow::anyhow!("Query execution timed out")
    } else {
        anyhow::anyhow!("Query execution failed: {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_limit_when_absent() {
        let executor = SafeExecutor::new(10_000, 30);
        let sql = executor.inject_limit("SELECT * FROM customers");
        assert!(sql.to_lowercase().contains("limit 10000"));
    }

    #[test]
    fn does_not_duplicate_existing_limit() {
        let executor = SafeExecutor::new(10_000, 30);
        let sql = executor.inject_limit("SELECT * FROM customers LIMIT 5");
        assert_eq!(sql.to_lowercase().matches("limit").count(), 1);
    }
}
