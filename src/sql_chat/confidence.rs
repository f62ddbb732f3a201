// src/sql_chat/confidence.rs
// Confidence Scorer (§4.14, authoritative source `confidence_scorer.py`):
// weighted combination of four signals into a level + numeric score.

use std::collections::HashSet;

use super::types::{ConfidenceLevel, ConfidenceScore};
use crate::config::sql_chat::ConfidenceConfig;

pub struct ConfidenceScorer<'a> {
    config: &'a ConfidenceConfig,
}

impl<'a> ConfidenceScorer<'a> {
    pub fn new(config: &'a ConfidenceConfig) -> Self {
        Self { config }
    }

    /// `table_relevance` and `few_shot_similarity` come from the retrieval
    /// stages that ran earlier in the pipeline; `retries` is how many
    /// syntactic+semantic correction rounds were spent; `query` and
    /// `selected_columns` drive the column-overlap signal (§4.14).
    pub fn score(
        &self,
        table_relevance: f32,
        few_shot_similarity: f32,
        retries: u32,
        query: &str,
        selected_columns: &[String],
    ) -> ConfidenceScore {
        let retry_penalty = (1.0 - retries as f32 / 3.0).clamp(0.0, 1.0);
        let column_overlap = self.column_overlap(query, selected_columns);

        let value = self.config.weight_table_relevance * table_relevance
            + self.config.weight_few_shot_similarity * few_shot_similarity
            + self.config.weight_retry_penalty * retry_penalty
            + self.config.weight_column_overlap * column_overlap;
        let value = value.clamp(0.0, 1.0);

        let level = if value >= self.config.high_threshold {
            ConfidenceLevel::High
        } else if value >= self.config.medium_threshold {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };

        ConfidenceScore {
            level,
            value,
            table_relevance,
            few_shot_similarity,
            retry_penalty,
            column_overlap,
        }
    }

    /// Jaccard overlap between query tokens and normalized column-name
    /// tokens, boosted 4x and clamped to 1.0 since column names are sparse
    /// relative to natural-language queries (§4.14).
    fn column_overlap(&self, query: &str, selected_columns: &[String]) -> f32 {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || selected_columns.is_empty() {
            return 0.0;
        }
        let column_tokens: HashSet<String> = selected_columns
            .iter()
            .flat_map(|c| tokenize(c))
            .collect();
        if column_tokens.is_empty() {
            return 0.0;
        }
        let intersection = query_tokens.intersection(&column_tokens).count();
        let union = query_tokens.union(&column_tokens).count();
        let jaccard = intersection as f32 / union as f32;
        (jaccard * 4.0).clamp(0.0, 1.0)
    }

    /// Supplemented: user-facing suggestions derived from which weighted
    /// signal dragged the score down the most.
    pub fn get_improvement_suggestions(&self, score: &ConfidenceScore) -> Vec<String> {
        let mut suggestions = Vec::new();
        if score.table_relevance < 0.5 {
            suggestions.push(
                "The linked tables may not match the question well; try rephrasing with more specific entity names.".to_string(),
            );
        }
        if score.few_shot_similarity < 0.3 {
            suggestions.push(
                "No closely similar example queries were found; results may rely more on general reasoning.".to_string(),
            );
        }
        if score.retry_penalty < 1.0 {
            suggestions.push(
                "The query needed correction attempts before it ran; double-check the result against your expectations.".to_string(),
            );
        }
        if score.column_overlap < 0.25 {
            suggestions.push(
                "The returned columns don't closely match the wording of your question; confirm they answer what you meant.".to_string(),
            );
        }
        suggestions
    }

    /// Supplemented: whether the UI should proactively surface
    /// `get_improvement_suggestions` alongside the result.
    pub fn should_show_insights(&self, score: &ConfidenceScore) -> bool {
        score.level != ConfidenceLevel::High
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConfidenceConfig {
        ConfidenceConfig {
            weight_table_relevance: 0.30,
            weight_few_shot_similarity: 0.30,
            weight_retry_penalty: 0.20,
            weight_column_overlap: 0.20,
            high_threshold: 0.8,
            medium_threshold: 0.5,
        }
    }

    #[test]
    fn perfect_signals_yield_high_confidence() {
        let cfg = config();
        let scorer = ConfidenceScorer::new(&cfg);
        let score = scorer.score(1.0, 1.0, 0, "total customer revenue", &["revenue".to_string(), "customer".to_string()]);
        assert_eq!(score.level, ConfidenceLevel::High);
    }

    #[test]
    fn retries_reduce_retry_penalty() {
        let cfg = config();
        let scorer = ConfidenceScorer::new(&cfg);
        let score = scorer.score(0.8, 0.8, 3, "revenue", &["revenue".to_string()]);
        assert_eq!(score.retry_penalty, 0.0);
    }

    #[test]
    fn weak_signals_yield_low_confidence() {
        let cfg = config();
        let scorer = ConfidenceScorer::new(&cfg);
        let score = scorer.score(0.1, 0.1, 3, "xyz qqq abc", &["unrelated".to_string()]);
        assert_eq!(score.level, ConfidenceLevel::Low);
    }

    #[test]
    fn suggestions_present_when_not_high_confidence() {
        let cfg = config();
        let scorer = ConfidenceScorer::new(&cfg);
        let score = scorer.score(0.1, 0.1, 3, "xyz qqq abc", &["unrelated".to_string()]);
        assert!(scorer.should_show_insights(&score));
        assert!(!scorer.get_improvement_suggestions(&score).is_empty());
    }
}
