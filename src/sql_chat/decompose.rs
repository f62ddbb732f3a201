// src/sql_chat/decompose.rs
// Query Decomposition (§4.18, optional): complexity-trigger detection,
// LLM-driven sub-question planning, topological ordering, and CTE assembly.
// Also the supplemented JoinPatternCache (§5): process-lifetime, per
// connection, learned from successful executions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::llm::LlmProvider;

static COMPLEXITY_TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)compare|versus|\bvs\b").unwrap(),
        Regex::new(r"(?i)this (month|year|quarter|week) (vs|versus|compared to) (last|previous)").unwrap(),
        Regex::new(r"(?i)by\s+\w+\s+and\s+by\s+\w+").unwrap(),
        Regex::new(r"(?i)broken down by .+ and .+").unwrap(),
        Regex::new(r"(?i)segment(ed)? by").unwrap(),
    ]
});

/// Whether `query` looks complex enough to benefit from decomposition into
/// sub-questions rather than a single generated statement (§4.18).
pub fn needs_decomposition(query: &str) -> bool {
    COMPLEXITY_TRIGGERS.iter().any(|pattern| pattern.is_match(query))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(skip)]
    pub sql: Option<String>,
}

pub struct QueryDecomposer {
    llm: Arc<dyn LlmProvider>,
    max_subquestions: usize,
}

impl QueryDecomposer {
    pub fn new(llm: Arc<dyn LlmProvider>, max_subquestions: usize) -> Self {
        Self { llm, max_subquestions }
    }

    pub async fn plan(&self, query: &str, schema_summary: &str) -> anyhow::Result<Vec<SubQuestion>> {
        let prompt = format!(
            "Break this analytical question into an ordered list of simpler sub-questions, each answerable with one SQL query against this schema.\n\nSchema:\n{schema_summary}\n\nQuestion: {query}\n\nRespond as JSON: [{{\"id\": \"q1\", \"question\": \"...\", \"depends_on\": []}}, ...]. Use at most {} sub-questions.",
            self.max_subquestions
        );
        let response = self
            .llm
            .chat(&[crate::llm::provider::Message::user(prompt)], 0.0)
            .await?;
        let raw = strip_fences(&response.content);
        let mut parsed: Vec<SubQuestion> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("decomposition response was not valid JSON: {e}"))?;
        parsed.truncate(self.max_subquestions);
        Ok(topological_sort(parsed.drain(..).collect()))
    }

    /// Assembles a single CTE-based SQL statement from ordered sub-questions
    /// whose `sql` has already been generated: all but the last become named
    /// CTEs, the last becomes the outer `SELECT` (§4.18).
    pub fn assemble_cte(&self, sub_questions: &[SubQuestion]) -> Option<String> {
        if sub_questions.is_empty() {
            return None;
        }
        if sub_questions.len() == 1 {
            return sub_questions[0].sql.clone();
        }
        let (last, rest) = sub_questions.split_last()?;
        let ctes: Vec<String> = rest
            .iter()
            .filter_map(|sq| sq.sql.as_ref().map(|sql| format!("{} AS (\n{}\n)", sq.id, sql)))
            .collect();
        let outer = last.sql.as_ref()?;
        Some(format!("WITH {}\n{}", ctes.join(",\n"), outer))
    }
}

fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(stripped) = trimmed.strip_prefix("```json") {
        stripped.trim_end_matches("```").trim().to_string()
    } else if let Some(stripped) = trimmed.strip_prefix("```") {
        stripped.trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Orders sub-questions so dependencies come first. Cycles are broken by
/// falling back to arrival order for whatever remains once no more
/// zero-dependency nodes can be found (§4.18 -- logged by the caller as a
/// warning, not fatal).
fn topological_sort(sub_questions: Vec<SubQuestion>) -> Vec<SubQuestion> {
    let mut by_id: HashMap<String, SubQuestion> =
        sub_questions.into_iter().map(|sq| (sq.id.clone(), sq)).collect();
    let arrival_order: Vec<String> = by_id.keys().cloned().collect();

    let mut resolved: Vec<String> = Vec::new();
    let mut resolved_set: HashSet<String> = HashSet::new();

    loop {
        let mut progressed = false;
        for id in &arrival_order {
            if resolved_set.contains(id) {
                continue;
            }
            let Some(sq) = by_id.get(id) else { continue };
            if sq.depends_on.iter().all(|dep| resolved_set.contains(dep)) {
                resolved.push(id.clone());
                resolved_set.insert(id.clone());
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
        if resolved.len() == arrival_order.len() {
            break;
        }
    }

    for id in &arrival_order {
        if !resolved_set.contains(id) {
            resolved.push(id.clone());
            resolved_set.insert(id.clone());
        }
    }

    resolved
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

/// Supplemented: records which column pair joined two tables successfully
/// during past executions so the generator can be hinted toward it next
/// time. Process-lifetime only, keyed by connection id (§5).
pub struct JoinPatternCache {
    patterns: parking_lot::RwLock<HashMap<Uuid, HashMap<(String, String), String>>>,
}

impl JoinPatternCache {
    pub fn new() -> Self {
        Self {
            patterns: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, connection_id: Uuid, table_a: &str, table_b: &str, join_column_pair: &str) {
        let key = normalized_pair(table_a, table_b);
        self.patterns
            .write()
            .entry(connection_id)
            .or_default()
            .insert(key, join_column_pair.to_string());
    }

    /// Up to 3 hints, most-recently-inserted order is not tracked so this
    /// returns in arbitrary map order truncated to 3 (§5).
    pub fn hints(&self, connection_id: Uuid) -> Vec<String> {
        self.patterns
            .read()
            .get(&connection_id)
            .map(|joins| {
                joins
                    .iter()
                    .take(3)
                    .map(|((a, b), col)| format!("{a} JOIN {b} ON {col}"))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for JoinPatternCache {
    fn default() -> Self {
        Self::new()
    }
}

fn normalized_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_comparison_trigger() {
        assert!(needs_decomposition("compare revenue this month vs last month"));
    }

    #[test]
    fn plain_lookup_does_not_trigger() {
        assert!(!needs_decomposition("show me all customers in California"));
    }

    #[test]
    fn topological_sort_orders_dependencies_first() {
        let subs = vec![
            SubQuestion { id: "q2".into(), question: "b".into(), depends_on: vec!["q1".into()], sql: None },
            SubQuestion { id: "q1".into(), question: "a".into(), depends_on: vec![], sql: None },
        ];
        let ordered = topological_sort(subs);
        assert_eq!(ordered[0].id, "q1");
        assert_eq!(ordered[1].id, "q2");
    }

    #[test]
    fn cycle_falls_back_to_arrival_order_for_remainder() {
        let subs = vec![
            SubQuestion { id: "q1".into(), question: "a".into(), depends_on: vec!["q2".into()], sql: None },
            SubQuestion { id: "q2".into(), question: "b".into(), depends_on: vec!["q1".into()], sql: None },
        ];
        let ordered = topological_sort(subs);
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn join_pattern_cache_returns_hints_for_known_connection() {
        let cache = JoinPatternCache::new();
        let conn = Uuid::new_v4();
        cache.record(conn, "orders", "customers", "orders.customer_id = customers.id");
        let hints = cache.hints(conn);
        assert_eq!(hints.len(), 1);
    }

    #[test]
    fn assembles_cte_chain_from_subquestions() {
        let decomposer_subs = vec![
            SubQuestion { id: "q1".into(), question: "a".into(), depends_on: vec![], sql: Some("SELECT 1".into()) },
            SubQuestion { id: "q2".into(), question: "b".into(), depends_on: vec!["q1".into()], sql: Some("SELECT * FROM q1".into()) },
        ];
        let assembled = QueryDecomposer::new(unused_llm(), 5).assemble_cte(&decomposer_subs);
        assert!(assembled.unwrap().starts_with("WITH q1 AS"));
    }

    fn unused_llm() -> Arc<dyn LlmProvider> {
        struct Noop;
        #[async_trait::async_trait]
        impl LlmProvider for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            async fn chat(
                &self,
                _messages: &[crate::llm::provider::Message],
                _temperature: f32,
            ) -> anyhow::Result<crate::llm::provider::ChatResponse> {
                unimplemented!()
            }
            async fn stream(
                &self,
                _messages: &[crate::llm::provider::Message],
                _temperature: f32,
            ) -> anyhow::Result<crate::llm::provider::ChatStream> {
                unimplemented!()
            }
        }
        Arc::new(Noop)
    }
}
