// src/sql_chat/inspector.rs
// Semantic Inspector (§4.12): post-execute sanity checks that can trigger a
// bounded LLM-driven regeneration loop distinct from the syntactic
// self-correction loop in `generator.rs`.

use std::collections::HashSet;

use super::executor::ExecutionOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticIssue {
    EmptyResult,
    TooManyRows { row_count: i64, max_acceptable: i64 },
    UnrelatedColumns,
    AggregationAllNull,
}

impl SemanticIssue {
    pub fn correction_hint(&self) -> String {
        match self {
            SemanticIssue::EmptyResult => {
                "The previous query returned zero rows. Loosen overly strict filters or check for a mismatched join, then regenerate the query.".to_string()
            }
            SemanticIssue::TooManyRows { row_count, max_acceptable } => {
                format!(
                    "The previous query returned {row_count} rows, more than the {max_acceptable} considered reasonable for this question. Add a more selective filter or aggregate, then regenerate the query."
                )
            }
            SemanticIssue::UnrelatedColumns => {
                "The previous query's selected columns do not overlap with the terms in the question. Select columns that actually answer what was asked, then regenerate the query.".to_string()
            }
            SemanticIssue::AggregationAllNull => {
                "The previous query's aggregate result is entirely NULL, which usually means the wrong column was aggregated or the join dropped all matching rows. Regenerate the query.".to_string()
            }
        }
    }
}

pub struct SemanticInspector {
    max_acceptable_rows: i64,
    max_retries: u32,
}

impl SemanticInspector {
    pub fn new(max_acceptable_rows: i64, max_retries: u32) -> Self {
        Self {
            max_acceptable_rows,
            max_retries,
        }
    }

    /// Runs all four checks (§4.12) and returns the first that fires, if any.
    /// Order mirrors severity: an empty result is reported before a
    /// too-many-rows check (mutually exclusive anyway), then the heuristic
    /// checks that require inspecting row content.
    pub fn inspect(&self, outcome: &ExecutionOutcome, user_query: &str) -> Option<SemanticIssue> {
        let row_count = outcome.rows.len() as i64;

        if row_count == 0 {
            return Some(SemanticIssue::EmptyResult);
        }
        if row_count > self.max_acceptable_rows {
            return Some(SemanticIssue::TooManyRows {
                row_count,
                max_acceptable: self.max_acceptable_rows,
            });
        }
        if self.columns_look_unrelated(outcome, user_query) {
            return Some(SemanticIssue::UnrelatedColumns);
        }
        if self.aggregation_is_all_null(outcome) {
            return Some(SemanticIssue::AggregationAllNull);
        }
        None
    }

    fn columns_look_unrelated(&self, outcome: &ExecutionOutcome, user_query: &str) -> bool {
        if outcome.columns.is_empty() {
            return false;
        }
        let query_tokens: HashSet<String> = tokenize(user_query);
        if query_tokens.is_empty() {
            return false;
        }
        let column_tokens: HashSet<String> = outcome
            .columns
            .iter()
            .flat_map(|c| tokenize(c))
            .collect();
        query_tokens.is_disjoint(&column_tokens)
    }

    fn aggregation_is_all_null(&self, outcome: &ExecutionOutcome) -> bool {
        let looks_like_aggregate = outcome.columns.len() == 1
            && outcome
                .columns
                .first()
                .map(|c| {
                    let lower = c.to_lowercase();
                    lower.contains("count")
                        || lower.contains("sum")
                        || lower.contains("avg")
                        || lower.contains("total")
                        || lower.contains("min")
                        || lower.contains("max")
                })
                .unwrap_or(false);
        if !looks_like_aggregate {
            return false;
        }
        outcome
            .rows
            .iter()
            .all(|row| row.values().all(|v| v.is_null()))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(|s| s.to_string())
        .collect()
}

/// Bounded regeneration loop: `regenerate` is called with the correction hint
/// and should return a freshly generated, re-validated, re-executed outcome.
/// Returns the last outcome seen (success or not) plus how many retries were
/// actually spent (§4.12).
pub async fn regenerate_until_clean<F, Fut>(
    inspector: &SemanticInspector,
    mut outcome: ExecutionOutcome,
    user_query: &str,
    mut regenerate: F,
) -> (ExecutionOutcome, u32)
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<ExecutionOutcome>>,
{
    let mut retries = 0u32;
    while let Some(issue) = inspector.inspect(&outcome, user_query) {
        if retries >= inspector.max_retries() {
            break;
        }
        match regenerate(issue.correction_hint()).await {
            Ok(next) => {
                outcome = next;
                retries += 1;
            }
            Err(_) => break,
        }
    }
    (outcome, retries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::HashMap;

    fn outcome(columns: Vec<&str>, rows: Vec<HashMap<String, Value>>) -> ExecutionOutcome {
        ExecutionOutcome {
            columns: columns.into_iter().map(|s| s.to_string()).collect(),
            rows,
            execution_time_ms: 1,
        }
    }

    #[test]
    fn flags_empty_result() {
        let inspector = SemanticInspector::new(5000, 3);
        let out = outcome(vec!["id"], Vec::new());
        assert_eq!(inspector.inspect(&out, "find customers"), Some(SemanticIssue::EmptyResult));
    }

    #[test]
    fn flags_too_many_rows() {
        let inspector = SemanticInspector::new(1, 3);
        let mut row = HashMap::new();
        row.insert("id".to_string(), Value::from(1));
        let out = outcome(vec!["id"], vec![row.clone(), row]);
        assert!(matches!(
            inspector.inspect(&out, "find customers"),
            Some(SemanticIssue::TooManyRows { .. })
        ));
    }

    #[test]
    fn flags_all_null_aggregation() {
        let inspector = SemanticInspector::new(5000, 3);
        let mut row = HashMap::new();
        row.insert("total_revenue".to_string(), Value::Null);
        let out = outcome(vec!["total_revenue"], vec![row]);
        assert_eq!(
            inspector.inspect(&out, "what is the total revenue"),
            Some(SemanticIssue::AggregationAllNull)
        );
    }

    #[test]
    fn passes_clean_result() {
        let inspector = SemanticInspector::new(5000, 3);
        let mut row = HashMap::new();
        row.insert("customer_name".to_string(), Value::from("Ada"));
        let out = outcome(vec!["customer_name"], vec![row]);
        assert_eq!(inspector.inspect(&out, "list customer names"), None);
    }
}
