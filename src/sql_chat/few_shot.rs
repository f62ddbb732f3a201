// src/sql_chat/few_shot.rs
// Few-Shot Retriever (§4.6): hybrid lexical+vector search over the NL->SQL
// examples corpus, optional rerank, domain inference.

use std::sync::Arc;

use super::types::{Complexity, FewShotExample};
use crate::llm::EmbeddingProvider;
use crate::reranker::RerankerProvider;

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("finance", &["revenue", "invoice", "payment", "transaction", "account", "budget"]),
    ("healthcare", &["patient", "diagnosis", "treatment", "prescription", "clinic", "doctor"]),
    ("retail", &["product", "inventory", "sku", "cart", "checkout", "store"]),
    ("hr", &["employee", "salary", "payroll", "department", "hire", "performance"]),
    ("education", &["student", "course", "grade", "enrollment", "teacher", "class"]),
    ("ecommerce", &["order", "customer", "shipping", "cart", "product", "review"]),
    ("logistics", &["shipment", "warehouse", "route", "delivery", "tracking", "fleet"]),
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn lexical_overlap_score(query_tokens: &[String], text: &str) -> f32 {
    let text_tokens: std::collections::HashSet<String> = tokenize(text).into_iter().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let matches = query_tokens.iter().filter(|t| text_tokens.contains(*t)).count();
    matches as f32 / query_tokens.len() as f32
}

/// Keyword-scored mapping to a fixed small set of domains; highest score
/// wins, `None` if nothing scores above zero (§4.6).
pub fn infer_domain(schema_text: &str) -> Option<String> {
    let tokens: std::collections::HashSet<String> = tokenize(schema_text).into_iter().collect();
    let mut best: Option<(&str, usize)> = None;
    for (domain, keywords) in DOMAIN_KEYWORDS {
        let score = keywords.iter().filter(|k| tokens.contains(**k)).count();
        if score > 0 && best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
            best = Some((domain, score));
        }
    }
    best.map(|(domain, _)| domain.to_string())
}

pub struct FewShotRetriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    reranker: Arc<RerankerProvider>,
    examples: parking_lot::RwLock<Vec<FewShotExample>>,
    lexical_weight: f32,
    vector_weight: f32,
    rerank_top_k: usize,
}

impl FewShotRetriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        reranker: Arc<RerankerProvider>,
        lexical_weight: f32,
        vector_weight: f32,
        rerank_top_k: usize,
    ) -> Self {
        Self {
            embeddings,
            reranker,
            examples: parking_lot::RwLock::new(Vec::new()),
            lexical_weight,
            vector_weight,
            rerank_top_k,
        }
    }

    pub fn load(&self, examples: Vec<FewShotExample>) {
        *self.examples.write() = examples;
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        domain_hint: Option<&str>,
        complexity_hint: Option<Complexity>,
        use_rerank: bool,
    ) -> anyhow::Result<Vec<FewShotExample>> {
        let examples = self.examples.read().clone();
        if examples.is_empty() {
            return Ok(Vec::new());
        }

        match self
            .hybrid_search(query, &examples, domain_hint, complexity_hint)
            .await
        {
            Ok(mut candidates) => {
                candidates.truncate(self.rerank_top_k);
                if use_rerank {
                    candidates = self.rerank(query, candidates).await?;
                }
                candidates.truncate(top_k);
                Ok(candidates)
            }
            Err(_) => self.vector_only_fallback(query, &examples, top_k).await,
        }
    }

    async fn hybrid_search(
        &self,
        query: &str,
        examples: &[FewShotExample],
        domain_hint: Option<&str>,
        complexity_hint: Option<Complexity>,
    ) -> anyhow::Result<Vec<FewShotExample>> {
        let query_embedding = self.embeddings.embed(query).await?;
        let query_tokens = tokenize(query);

        let mut scored: Vec<(f32, FewShotExample)> = examples
            .iter()
            .filter(|e| {
                let domain_ok = match domain_hint {
                    Some(hint) => e.domain.as_deref() == Some(hint) || e.domain.as_deref() == Some("general"),
                    None => true,
                };
                let complexity_ok = match complexity_hint {
                    Some(hint) => e.complexity == Some(hint) || e.complexity.is_none(),
                    None => true,
                };
                domain_ok && complexity_ok
            })
            .map(|e| {
                let lexical = lexical_overlap_score(&query_tokens, &e.natural_question);
                let vector = cosine_similarity(&query_embedding, &e.embedding);
                let combined = self.lexical_weight * lexical + self.vector_weight * vector;
                let mut example = e.clone();
                example.similarity = Some(combined);
                (combined, example)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }

    async fn vector_only_fallback(
        &self,
        query: &str,
        examples: &[FewShotExample],
        top_k: usize,
    ) -> anyhow::Result<Vec<FewShotExample>> {
        let query_embedding = self.embeddings.embed(query).await?;
        let mut scored: Vec<(f32, FewShotExample)> = examples
            .iter()
            .map(|e| {
                let mut example = e.clone();
                let score = cosine_similarity(&query_embedding, &e.embedding);
                example.similarity = Some(score);
                (score, example)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }

    async fn rerank(&self, query: &str, candidates: Vec<FewShotExample>) -> anyhow::Result<Vec<FewShotExample>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let texts: Vec<String> = candidates.iter().map(|e| e.natural_question.clone()).collect();
        let scored = self.reranker.score(query, &texts).await?;
        Ok(scored
            .into_iter()
            .filter_map(|sc| candidates.get(sc.index).cloned().map(|mut e| {
                e.similarity = Some(sc.score);
                e
            }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_finance_domain_from_keyword_heavy_schema() {
        let domain = infer_domain("table invoices with columns revenue payment account");
        assert_eq!(domain.as_deref(), Some("finance"));
    }

    #[test]
    fn infers_no_domain_when_nothing_scores() {
        let domain = infer_domain("xyz abc qqq");
        assert_eq!(domain, None);
    }

    #[test]
    fn lexical_overlap_counts_shared_tokens() {
        let query_tokens = vec!["top".to_string(), "customers".to_string(), "revenue".to_string()];
        let score = lexical_overlap_score(&query_tokens, "top customers by revenue");
        assert!((score - 1.0).abs() < 1e-6);
    }
}
