// src/sql_chat/intent.rs
// Intent Classifier (§4.7): keyword+pattern -> intent, plus granularity/limit
// extraction.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Lookup,
    Aggregation,
    Comparison,
    Trend,
    TopK,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Lookup => "lookup",
            Intent::Aggregation => "aggregation",
            Intent::Comparison => "comparison",
            Intent::Trend => "trend",
            Intent::TopK => "top_k",
        }
    }

    pub fn generation_hint(&self) -> &'static str {
        match self {
            Intent::Lookup => "Emit identifying columns, WHERE filter",
            Intent::Aggregation => "GROUP BY + aggregate; consider HAVING",
            Intent::Comparison => "CASE/UNION/self-join to place metrics side-by-side",
            Intent::Trend => "Include date column, ORDER BY date, bucket with date-truncation",
            Intent::TopK => "ORDER BY metric + LIMIT",
        }
    }
}

const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::Lookup, &["find", "show", "get", "which", "who", "what is", "list"]),
    (Intent::Aggregation, &["total", "sum", "average", "avg", "count", "how many", "group by"]),
    (Intent::Comparison, &["compare", "versus", "vs", "difference between", "relative to"]),
    (Intent::Trend, &["trend", "over time", "monthly", "weekly", "daily", "growth", "history"]),
    (Intent::TopK, &["top", "best", "highest", "lowest", "ranked", "rank"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "day" | "daily" => Some(Granularity::Day),
            "week" | "weekly" => Some(Granularity::Week),
            "month" | "monthly" => Some(Granularity::Month),
            "quarter" | "quarterly" => Some(Granularity::Quarter),
            "year" | "yearly" | "annual" | "annually" => Some(Granularity::Year),
            _ => None,
        }
    }
}

static LIMIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)top\s+(\d+)|first\s+(\d+)|(\d+)\s+(?:best|highest|lowest)").unwrap());

#[derive(Debug, Clone)]
pub struct ClassifiedIntent {
    pub intent: Intent,
    pub granularity: Option<Granularity>,
    pub limit: Option<u32>,
}

pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str) -> ClassifiedIntent {
        let lower = query.to_lowercase();

        let mut scores: HashMap<&str, f32> = HashMap::new();
        for (intent, keywords) in INTENT_KEYWORDS {
            let matches = keywords.iter().filter(|kw| lower.contains(**kw)).count();
            let normalized = matches as f32 / keywords.len() as f32;
            scores.insert(intent.as_str(), normalized);
        }

        let best_key = scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| *k)
            .unwrap_or("lookup");

        let intent = match best_key {
            "aggregation" => Intent::Aggregation,
            "comparison" => Intent::Comparison,
            "trend" => Intent::Trend,
            "top_k" => Intent::TopK,
            _ => Intent::Lookup,
        };

        let granularity = ["day", "daily", "week", "weekly", "month", "monthly", "quarter", "quarterly", "year", "yearly", "annual", "annually"]
            .iter()
            .find(|kw| lower.contains(*kw))
            .and_then(|kw| Granularity::from_str(kw));

        let limit = LIMIT_PATTERN.captures(&lower).and_then(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .and_then(|m| m.as_str().parse::<u32>().ok())
        });

        ClassifiedIntent {
            intent,
            granularity,
            limit,
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_top_k_query_and_extracts_limit() {
        let classifier = IntentClassifier::new();
        let result = classifier.classify("top 10 customers by revenue");
        assert_eq!(result.intent, Intent::TopK);
        assert_eq!(result.limit, Some(10));
    }

    #[test]
    fn classifies_trend_query_and_extracts_granularity() {
        let classifier = IntentClassifier::new();
        let result = classifier.classify("show monthly revenue trend over time");
        assert_eq!(result.intent, Intent::Trend);
        assert_eq!(result.granularity, Some(Granularity::Month));
    }

    #[test]
    fn classifies_aggregation_query() {
        let classifier = IntentClassifier::new();
        let result = classifier.classify("what is the total count of orders, grouped by group by region");
        assert_eq!(result.intent, Intent::Aggregation);
    }
}
