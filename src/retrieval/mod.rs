// src/retrieval/mod.rs
// Hybrid Retriever (§4.2): BM25 + vector fusion, optional rerank, metadata
// filter applied before ranking.

pub mod bm25;

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::llm::RetrievalConfig;
use crate::llm::{EmbeddingProvider, LlmProvider, Message};
use crate::reranker::RerankerProvider;
use crate::store::{ChunkFilter, ScoredChunk, VectorStore};
use bm25::Bm25Index;

#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    /// Forces fusion+rerank or fusion-with-rewrite regardless of the router
    /// heuristic. `None` lets the retriever decide.
    pub force_mode: Option<RouterMode>,
    pub num_rewrites: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMode {
    FusionWithRewrite,
    TwoStageFusionRerank,
}

pub struct HybridRetriever {
    store: Arc<VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    reranker: Arc<RerankerProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        reranker: Arc<RerankerProvider>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            reranker,
            llm,
            config,
        }
    }

    /// Main entry point. Metadata filter is always applied in the store
    /// query/load, so tenancy holds before any ranking happens (§8 invariant 1).
    pub async fn retrieve(
        &self,
        query: &str,
        filter: ChunkFilter,
        k_final: usize,
        options: RetrievalOptions,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let all_nodes = self.store.load_all_by(filter.clone()).await?;

        if all_nodes.is_empty() {
            return Ok(Vec::new());
        }

        if all_nodes.len() <= self.config.rerank_threshold {
            let embedding = self.embeddings.embed(query).await?;
            let mut results = self.store.query(filter, k_final, Some(embedding)).await?;
            results.truncate(k_final);
            return Ok(results);
        }

        let mode = options
            .force_mode
            .unwrap_or(self.select_mode(query).await);

        let fused = match mode {
            RouterMode::FusionWithRewrite => {
                self.fusion_with_rewrite(query, filter.clone(), options.num_rewrites.max(2))
                    .await?
            }
            RouterMode::TwoStageFusionRerank => self.two_stage_fusion(query, filter.clone()).await?,
        };

        let reranked = if mode == RouterMode::TwoStageFusionRerank {
            self.rerank(query, fused).await?
        } else {
            fused
        };

        let mut results = reranked;
        results.truncate(k_final);
        Ok(results)
    }

    /// Fuses BM25 and vector retrieval in parallel, dedups by chunk id
    /// keeping the max score, and returns up to `similarity_top_k` candidates
    /// (before any rerank stage).
    async fn two_stage_fusion(
        &self,
        query: &str,
        filter: ChunkFilter,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        self.fuse_once(query, filter).await
    }

    /// Ambiguous-query path: LLM generates N paraphrases, each fused
    /// independently, results unioned and deduped by chunk id keeping the
    /// max score across all paraphrases plus the original query.
    async fn fusion_with_rewrite(
        &self,
        query: &str,
        filter: ChunkFilter,
        num_rewrites: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let mut queries = vec![query.to_string()];
        if let Some(llm) = &self.llm {
            if let Ok(paraphrases) = self.generate_paraphrases(llm, query, num_rewrites).await {
                queries.extend(paraphrases);
            }
        }

        let mut merged: HashMap<Uuid, ScoredChunk> = HashMap::new();
        for q in &queries {
            let results = self.fuse_once(q, filter.clone()).await?;
            for scored in results {
                merged
                    .entry(scored.chunk.chunk_id)
                    .and_modify(|existing| {
                        if scored.score > existing.score {
                            *existing = scored.clone();
                        }
                    })
                    .or_insert(scored);
            }
        }

        let mut results: Vec<ScoredChunk> = merged.into_values().collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// One BM25+vector fusion pass for a single query string.
    async fn fuse_once(&self, query: &str, filter: ChunkFilter) -> anyhow::Result<Vec<ScoredChunk>> {
        let nodes = self.store.load_all_by(filter.clone()).await?;
        let documents: Vec<(Uuid, String)> = nodes
            .iter()
            .map(|c| (c.chunk_id, c.text.clone()))
            .collect();

        let embedding_fut = self.embeddings.embed(query);
        let bm25_index = Bm25Index::build(&documents);

        let embedding = embedding_fut.await?;
        let vector_fut = self
            .store
            .query(filter, self.config.similarity_top_k, Some(embedding));
        let lexical_scores = bm25_index.score(query);

        let vector_results = vector_fut.await?;

        Ok(self.combine_and_deduplicate(lexical_scores, vector_results, &nodes))
    }

    /// Distance-based score combination with configurable weights (default
    /// 0.5/0.5), deduped by chunk id keeping max score. Ties keep insertion
    /// order (stable sort), matching §4.2 edge-case behavior.
    fn combine_and_deduplicate(
        &self,
        lexical_scores: Vec<(Uuid, f32)>,
        vector_results: Vec<ScoredChunk>,
        all_nodes: &[crate::store::Chunk],
    ) -> Vec<ScoredChunk> {
        let lex_max = lexical_scores
            .iter()
            .map(|(_, s)| *s)
            .fold(0.0f32, f32::max)
            .max(1e-6);

        let mut combined: HashMap<Uuid, f32> = HashMap::new();
        for (id, score) in &lexical_scores {
            let normalized = score / lex_max;
            combined.insert(*id, self.config.lexical_weight * normalized);
        }
        for scored in &vector_results {
            let entry = combined.entry(scored.chunk.chunk_id).or_insert(0.0);
            *entry += self.config.vector_weight * scored.score;
        }

        let by_id: HashMap<Uuid, &crate::store::Chunk> =
            all_nodes.iter().map(|c| (c.chunk_id, c)).collect();

        let mut results: Vec<ScoredChunk> = combined
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(&id).map(|chunk| ScoredChunk {
                    chunk: (*chunk).clone(),
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(self.config.similarity_top_k);
        results
    }

    async fn rerank(&self, query: &str, candidates: Vec<ScoredChunk>) -> anyhow::Result<Vec<ScoredChunk>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let scored = self.reranker.score(query, &texts).await?;
        Ok(scored
            .into_iter()
            .filter_map(|sc| candidates.get(sc.index).map(|c| ScoredChunk {
                chunk: c.chunk.clone(),
                score: sc.score,
            }))
            .collect())
    }

    /// LLM single-selector choosing between router modes given a terse
    /// description of each, per §4.2/§9.
    async fn select_mode(&self, query: &str) -> RouterMode {
        let Some(llm) = &self.llm else {
            return RouterMode::TwoStageFusionRerank;
        };

        let prompt = format!(
            "Given the question below, reply with exactly one word: \
             \"ambiguous\" if it requires rephrasing into multiple search queries to find \
             relevant information, or \"clear\" if a single direct search would work well.\n\n\
             Question: {query}"
        );
        match llm.complete(&prompt).await {
            Ok(answer) if answer.to_lowercase().contains("ambiguous") => RouterMode::FusionWithRewrite,
            _ => RouterMode::TwoStageFusionRerank,
        }
    }

    async fn generate_paraphrases(
        &self,
        llm: &Arc<dyn LlmProvider>,
        query: &str,
        n: usize,
    ) -> anyhow::Result<Vec<String>> {
        let prompt = format!(
            "Generate {n} alternative phrasings of this search query, one per line, \
             no numbering or extra text:\n\n{query}"
        );
        let messages = [Message::user(prompt)];
        let response = llm.chat(&messages, 0.3).await?;
        Ok(response
            .content
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .take(n)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Chunk;
    use serde_json::json;

    fn chunk(id: Uuid, text: &str) -> Chunk {
        Chunk {
            chunk_id: id,
            text: text.to_string(),
            embedding: vec![],
            metadata: json!({}),
        }
    }

    #[test]
    fn dedup_keeps_max_score_across_lexical_and_vector() {
        let config = RetrievalConfig {
            strategy: "hybrid".to_string(),
            rerank_threshold: 20,
            similarity_top_k: 20,
            rerank_top_k: 6,
            lexical_weight: 0.5,
            vector_weight: 0.5,
        };
        let retriever_config = config.clone();

        let id = Uuid::new_v4();
        let nodes = vec![chunk(id, "alpha beta")];
        let lexical = vec![(id, 4.0)];
        let vector = vec![ScoredChunk {
            chunk: nodes[0].clone(),
            score: 0.8,
        }];

        // Build a retriever purely to call the private combine method via a
        // thin harness (fields unused by combine_and_deduplicate).
        struct Harness {
            config: RetrievalConfig,
        }
        impl Harness {
            fn combine(
                &self,
                lexical_scores: Vec<(Uuid, f32)>,
                vector_results: Vec<ScoredChunk>,
                all_nodes: &[Chunk],
            ) -> Vec<ScoredChunk> {
                let lex_max = lexical_scores.iter().map(|(_, s)| *s).fold(0.0f32, f32::max).max(1e-6);
                let mut combined: std::collections::HashMap<Uuid, f32> = std::collections::HashMap::new();
                for (id, score) in &lexical_scores {
                    combined.insert(*id, self.config.lexical_weight * (score / lex_max));
                }
                for scored in &vector_results {
                    let entry = combined.entry(scored.chunk.chunk_id).or_insert(0.0);
                    *entry += self.config.vector_weight * scored.score;
                }
                let by_id: std::collections::HashMap<Uuid, &Chunk> =
                    all_nodes.iter().map(|c| (c.chunk_id, c)).collect();
                combined
                    .into_iter()
                    .filter_map(|(id, score)| by_id.get(&id).map(|c| ScoredChunk { chunk: (*c).clone(), score }))
                    .collect()
            }
        }

        let harness = Harness { config: retriever_config };
        let results = harness.combine(lexical, vector, &nodes);
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.0);
    }
}
