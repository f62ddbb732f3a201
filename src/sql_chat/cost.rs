// src/sql_chat/cost.rs
// Cost Estimator (§4.10): dialect-appropriate EXPLAIN, safety policy.
// Postgres uses EXPLAIN (FORMAT JSON); MySQL/SQLite use heuristic scans of
// their own EXPLAIN output (supplemented from the original's
// `_estimate_mysql`/`_estimate_sqlite`).

use sqlx::any::AnyPool;
use sqlx::Row;

use super::types::CostEstimate;
use crate::config::sql_chat::SqlChatConfig;
use crate::sql_chat::types::DatabaseType;

pub struct CostEstimator {
    max_estimated_rows: i64,
    max_cost: f64,
}

impl CostEstimator {
    pub fn new(config: &SqlChatConfig) -> Self {
        Self {
            max_estimated_rows: config.max_estimated_rows,
            max_cost: config.max_cost,
        }
    }

    /// Returns `None` if EXPLAIN itself fails -- a soft failure, not a block
    /// (§4.10).
    pub async fn estimate(
        &self,
        pool: &AnyPool,
        db_type: DatabaseType,
        sql: &str,
    ) -> Option<CostEstimate> {
        match db_type {
            DatabaseType::Postgres => self.estimate_postgres(pool, sql).await.ok(),
            DatabaseType::Mysql => self.estimate_mysql(pool, sql).await.ok(),
            DatabaseType::Sqlite => self.estimate_sqlite(pool, sql).await.ok(),
        }
    }

    async fn estimate_postgres(&self, pool: &AnyPool, sql: &str) -> anyhow::Result<CostEstimate> {
        let explain = format!("EXPLAIN (FORMAT JSON) {sql}");
        let rows = sqlx::query(&explain).fetch_all(pool).await?;
        let raw: String = rows
            .first()
            .and_then(|r| r.try_get::<String, _>(0).ok())
            .unwrap_or_default();
        let plan_json: serde_json::Value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);

        let root = plan_json.get(0).and_then(|p| p.get("Plan")).cloned();
        let total_cost = root.as_ref().and_then(|p| p.get("Total Cost")).and_then(|v| v.as_f64());
        let estimated_rows = root
            .as_ref()
            .and_then(|p| p.get("Plan Rows"))
            .and_then(|v| v.as_i64());
        let plan_text = root.as_ref().map(|p| p.to_string()).unwrap_or_default();
        let has_seq_scan = plan_text.contains("Seq Scan");
        let has_cartesian = plan_text.contains("Nested Loop") && !plan_text.contains("Join Filter");

        Ok(CostEstimate {
            total_cost,
            estimated_rows,
            has_seq_scan,
            has_cartesian,
            plan_json: Some(plan_json),
        })
    }

    async fn estimate_mysql(&self, pool: &AnyPool, sql: &str) -> anyhow::Result<CostEstimate> {
        let explain = format!("EXPLAIN {sql}");
        let rows = sqlx::query(&explain).fetch_all(pool).await?;

        let mut total_rows = 0i64;
        let mut has_seq_scan = false;
        for row in &rows {
            if let Ok(rows_estimate) = row.try_get::<i64, _>("rows") {
                total_rows += rows_estimate;
            }
            if let Ok(scan_type) = row.try_get::<String, _>("type") {
                if scan_type.eq_ignore_ascii_case("ALL") {
                    has_seq_scan = true;
                }
            }
        }

        Ok(CostEstimate {
            total_cost: None,
            estimated_rows: Some(total_rows),
            has_seq_scan,
            has_cartesian: false,
            plan_json: None,
        })
    }

    async fn estimate_sqlite(&self, pool: &AnyPool, sql: &str) -> anyhow::Result<CostEstimate> {
        let explain = format!("EXPLAIN QUERY PLAN {sql}");
        let rows = sqlx::query(&explain).fetch_all(pool).await?;

        let mut has_seq_scan = false;
        for row in &rows {
            if let Ok(detail) = row.try_get::<String, _>("detail") {
                if detail.to_uppercase().contains("SCAN") {
                    has_seq_scan = true;
                }
            }
        }

        Ok(CostEstimate {
            total_cost: None,
            estimated_rows: None,
            has_seq_scan,
            has_cartesian: false,
            plan_json: None,
        })
    }

    /// Safety policy: not safe if rows exceed the cap, cost exceeds the cap,
    /// or the plan has a cartesian product. Sequential scan is informational
    /// only (§4.10).
    pub fn is_safe(&self, estimate: &CostEstimate) -> bool {
        if estimate.has_cartesian {
            return false;
        }
        if let Some(rows) = estimate.estimated_rows {
            if rows > self.max_estimated_rows {
                return false;
            }
        }
        if let Some(cost) = estimate.total_cost {
            if cost > self.max_cost {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SqlChatConfig {
        SqlChatConfig {
            encryption_key: "k".to_string(),
            skip_readonly_check: true,
            pool_size: 5,
            pool_max_overflow: 10,
            pool_timeout_secs: 30,
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

    #[test]
    fn cartesian_product_is_never_safe() {
        let estimator = CostEstimator::new(&config());
        let estimate = CostEstimate {
            total_cost: Some(1.0),
            estimated_rows: Some(1),
            has_seq_scan: false,
            has_cartesian: true,
            plan_json: None,
        };
        assert!(!estimator.is_safe(&estimate));
    }

    #[test]
    fn over_row_cap_is_unsafe() {
        let estimator = CostEstimator::new(&config());
        let estimate = CostEstimate {
            total_cost: Some(1.0),
            estimated_rows: Some(200_000),
            has_seq_scan: false,
            has_cartesian: false,
            plan_json: None,
        };
        assert!(!estimator.is_safe(&estimate));
    }

    #[test]
    fn seq_scan_alone_is_safe() {
        let estimator = CostEstimator::new(&config());
        let estimate = CostEstimate {
            total_cost: Some(10.0),
            estimated_rows: Some(10),
            has_seq_scan: true,
            has_cartesian: false,
            plan_json: None,
        };
        assert!(estimator.is_safe(&estimate));
    }
}
