// src/sql_chat/linker.rs
// Schema Linker (§4.5): embed-per-table, top-K relevant tables, FK-expand.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::types::{ForeignKey, SchemaInfo, TableInfo};
use crate::llm::EmbeddingProvider;

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

fn table_description(table: &TableInfo) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("Table {}: columns ({})", table.name, columns)
}

pub struct SchemaLinker {
    embeddings: Arc<dyn EmbeddingProvider>,
    /// Per-connection table embedding cache (§5: per-process map keyed by
    /// connection id; reads do not lock, writes replace whole entries).
    cache: parking_lot::RwLock<HashMap<Uuid, HashMap<String, Vec<f32>>>>,
    top_k: usize,
}

impl SchemaLinker {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, top_k: usize) -> Self {
        Self {
            embeddings,
            cache: parking_lot::RwLock::new(HashMap::new()),
            top_k,
        }
    }

    async fn table_embeddings(
        &self,
        connection_id: Uuid,
        schema: &SchemaInfo,
    ) -> anyhow::Result<HashMap<String, Vec<f32>>> {
        if let Some(cached) = self.cache.read().get(&connection_id) {
            if cached.len() == schema.tables.len() {
                return Ok(cached.clone());
            }
        }

        let descriptions: Vec<String> = schema.tables.iter().map(table_description).collect();
        let vectors = self.embeddings.embed_batch(&descriptions).await?;

        let mut embeddings = HashMap::new();
        for (table, vector) in schema.tables.iter().zip(vectors) {
            embeddings.insert(table.name.clone(), vector);
        }

        self.cache.write().insert(connection_id, embeddings.clone());
        Ok(embeddings)
    }

    /// Returns a filtered sub-schema: top-K tables by cosine similarity to
    /// the query, FK-expanded, with relationships trimmed to those fully
    /// contained in the selected set.
    pub async fn link(
        &self,
        connection_id: Uuid,
        query: &str,
        schema: &SchemaInfo,
    ) -> anyhow::Result<SchemaInfo> {
        Ok(self.link_with_relevance(connection_id, query, schema).await?.0)
    }

    /// Same as `link`, but also returns the average cosine similarity of the
    /// selected tables to the query -- the table-relevance signal fed into
    /// confidence scoring (§4.14). 1.0 when every table was kept (no
    /// filtering happened, so relevance is moot).
    pub async fn link_with_relevance(
        &self,
        connection_id: Uuid,
        query: &str,
        schema: &SchemaInfo,
    ) -> anyhow::Result<(SchemaInfo, f32)> {
        if schema.tables.len() <= self.top_k {
            return Ok((schema.clone(), 1.0));
        }

        let table_embeddings = self.table_embeddings(connection_id, schema).await?;
        let query_embedding = self.embeddings.embed(query).await?;

        let mut scored: Vec<(String, f32)> = table_embeddings
            .iter()
            .map(|(name, emb)| (name.clone(), cosine_similarity(&query_embedding, emb)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let top: Vec<(String, f32)> = scored.into_iter().take(self.top_k).collect();
        let relevance = if top.is_empty() {
            0.0
        } else {
            top.iter().map(|(_, score)| score).sum::<f32>() / top.len() as f32
        };
        let mut selected: HashSet<String> = top.into_iter().map(|(name, _)| name).collect();

        for fk in &schema.relationships {
            if selected.contains(&fk.from_table) {
                selected.insert(fk.to_table.clone());
            }
            if selected.contains(&fk.to_table) {
                selected.insert(fk.from_table.clone());
            }
        }

        let tables: Vec<TableInfo> = schema
            .tables
            .iter()
            .filter(|t| selected.contains(&t.name))
            .cloned()
            .collect();
        let relationships: Vec<ForeignKey> = schema
            .relationships
            .iter()
            .filter(|fk| selected.contains(&fk.from_table) && selected.contains(&fk.to_table))
            .cloned()
            .collect();

        Ok((
            SchemaInfo {
                database_name: schema.database_name.clone(),
                tables,
                relationships,
                cached_at: schema.cached_at,
                fingerprint: schema.fingerprint.clone(),
            },
            relevance.clamp(0.0, 1.0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
