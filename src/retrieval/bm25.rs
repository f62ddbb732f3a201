// src/retrieval/bm25.rs
// Lexical BM25 scorer built fresh over the current candidate node set (§4.2).

use std::collections::HashMap;
use uuid::Uuid;

const K1: f32 = 1.5;
const B: f32 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

struct DocumentStats {
    chunk_id: Uuid,
    term_counts: HashMap<String, usize>,
    length: usize,
}

pub struct Bm25Index {
    docs: Vec<DocumentStats>,
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f32,
}

impl Bm25Index {
    pub fn build(documents: &[(Uuid, String)]) -> Self {
        let mut docs = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for (chunk_id, text) in documents {
            let tokens = tokenize(text);
            let length = tokens.len();
            let mut term_counts: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *term_counts.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_counts.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            docs.push(DocumentStats {
                chunk_id: *chunk_id,
                term_counts,
                length,
            });
        }

        let avg_doc_len = if docs.is_empty() {
            0.0
        } else {
            docs.iter().map(|d| d.length as f32).sum::<f32>() / docs.len() as f32
        };

        Self {
            docs,
            doc_freq,
            avg_doc_len,
        }
    }

    /// Returns (chunk_id, score) pairs for every document with a non-zero
    /// score, not truncated — callers apply top-k after fusion.
    pub fn score(&self, query: &str) -> Vec<(Uuid, f32)> {
        if self.docs.is_empty() {
            return Vec::new();
        }
        let n = self.docs.len() as f32;
        let query_terms = tokenize(query);

        let mut scored = Vec::new();
        for doc in &self.docs {
            let mut score = 0.0f32;
            for term in &query_terms {
                let Some(&tf) = doc.term_counts.get(term) else { continue };
                let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
                if df == 0.0 {
                    continue;
                }
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let tf = tf as f32;
                let norm = 1.0 - B + B * (doc.length as f32 / self.avg_doc_len.max(1.0));
                score += idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
            }
            if score > 0.0 {
                scored.push((doc.chunk_id, score));
            }
        }
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_documents_containing_query_terms_higher() {
        let docs = vec![
            (Uuid::new_v4(), "the quick brown fox".to_string()),
            (Uuid::new_v4(), "lazy dogs sleep all day".to_string()),
        ];
        let index = Bm25Index::build(&docs);
        let scores = index.score("quick fox");
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, docs[0].0);
    }

    #[test]
    fn empty_corpus_scores_nothing() {
        let index = Bm25Index::build(&[]);
        assert!(index.score("anything").is_empty());
    }
}
