// src/store/mod.rs
// Vector + Metadata Store (§4.1): chunks (text, embedding, JSON metadata) in
// Postgres + pgvector. SQL-filtered retrieval, dedup by content hash.

use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::store::PostgresConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}

/// A new chunk pending insertion; `chunk_id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Equality filter over metadata keys, applied in SQL so tenancy (§8
/// invariant 1) is enforced before ranking, never after.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter(BTreeMap<String, String>);

impl ChunkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn notebook(notebook_id: impl Into<String>) -> Self {
        Self::new().with("notebook_id", notebook_id)
    }

    pub fn source(source_id: impl Into<String>) -> Self {
        Self::new().with("source_id", source_id)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct VectorStore {
    pool: PgPool,
    table_name: String,
    embed_dim: usize,
}

impl VectorStore {
    pub async fn connect(config: &PostgresConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        let store = Self {
            pool,
            table_name: config.table_name.clone(),
            embed_dim: config.embed_dim,
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool, table_name: impl Into<String>, embed_dim: usize) -> Self {
        Self {
            pool,
            table_name: table_name.into(),
            embed_dim,
        }
    }

    /// Creates the chunks table plus the indexes the contract requires:
    /// notebook_id, source_id, and the unique dedup pair on
    /// (md5(text), notebook_id).
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                chunk_id UUID PRIMARY KEY,
                text TEXT NOT NULL,
                embedding VECTOR({dim}) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            table = self.table_name,
            dim = self.embed_dim
        );
        sqlx::query(&create_table).execute(&self.pool).await?;

        let notebook_index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_notebook_id ON {table} ((metadata->>'notebook_id'))",
            table = self.table_name
        );
        sqlx::query(&notebook_index).execute(&self.pool).await?;

        let source_index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_source_id ON {table} ((metadata->>'source_id'))",
            table = self.table_name
        );
        sqlx::query(&source_index).execute(&self.pool).await?;

        let dedup_index = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_{table}_dedup ON {table} (md5(text), (metadata->>'notebook_id'))",
            table = self.table_name
        );
        sqlx::query(&dedup_index).execute(&self.pool).await?;

        Ok(())
    }

    fn filter_clause(filter: &ChunkFilter, start_index: usize) -> (String, Vec<String>) {
        if filter.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        for (i, (key, value)) in filter.0.iter().enumerate() {
            clauses.push(format!("metadata->>'{key}' = ${}", start_index + i));
            binds.push(value.clone());
        }
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }

    /// Insert chunks; inserts colliding on (md5(text), notebook_id) are
    /// silently skipped (§3, §4.1, §8 invariant 2).
    pub async fn add(&self, chunks: Vec<NewChunk>) -> anyhow::Result<usize> {
        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let chunk_id = Uuid::new_v4();
            let query = format!(
                "INSERT INTO {table} (chunk_id, text, embedding, metadata)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT DO NOTHING",
                table = self.table_name
            );
            let result = sqlx::query(&query)
                .bind(chunk_id)
                .bind(&chunk.text)
                .bind(Vector::from(chunk.embedding))
                .bind(&chunk.metadata)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Indexed delete by metadata filter. Used by notebook/document
    /// deletion lifecycles; must be O(1) via the metadata indexes above.
    pub async fn delete_by(&self, filter: ChunkFilter) -> anyhow::Result<u64> {
        if filter.is_empty() {
            anyhow::bail!("delete_by requires a non-empty filter");
        }
        let (clause, binds) = Self::filter_clause(&filter, 1);
        let query = format!("DELETE FROM {table}{clause}", table = self.table_name);
        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Top-k chunks by cosine similarity where metadata satisfies `filter`.
    /// Filter is applied before ranking (tenancy, §8 invariant 1).
    pub async fn query(
        &self,
        filter: ChunkFilter,
        k: usize,
        query_embedding: Option<Vec<f32>>,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let (clause, binds) = Self::filter_clause(&filter, 1);

        let rows = if let Some(embedding) = query_embedding {
            let vector_param = binds.len() + 1;
            let limit_param = binds.len() + 2;
            let query = format!(
                "SELECT chunk_id, text, embedding, metadata,
                        1 - (embedding <=> ${vector_param}) AS score
                 FROM {table}{clause}
                 ORDER BY embedding <=> ${vector_param}
                 LIMIT ${limit_param}",
                table = self.table_name,
                vector_param = vector_param,
                limit_param = limit_param,
                clause = clause,
            );
            let mut q = sqlx::query(&query);
            for bind in &binds {
                q = q.bind(bind);
            }
            q = q.bind(Vector::from(embedding)).bind(k as i64);
            q.fetch_all(&self.pool).await?
        } else {
            let limit_param = binds.len() + 1;
            let query = format!(
                "SELECT chunk_id, text, embedding, metadata, 1.0::real AS score
                 FROM {table}{clause}
                 LIMIT ${limit_param}",
                table = self.table_name,
                clause = clause,
                limit_param = limit_param,
            );
            let mut q = sqlx::query(&query);
            for bind in &binds {
                q = q.bind(bind);
            }
            q = q.bind(k as i64);
            q.fetch_all(&self.pool).await?
        };

        rows.into_iter().map(Self::row_to_scored_chunk).collect()
    }

    /// Lightweight liveness probe for the health endpoint.
    pub async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(sqlx::query("SELECT 1").execute(&self.pool).await.is_ok())
    }

    /// All chunks matching `filter`, unranked. Used for bulk export/reindex.
    pub async fn load_all_by(&self, filter: ChunkFilter) -> anyhow::Result<Vec<Chunk>> {
        let (clause, binds) = Self::filter_clause(&filter, 1);
        let query = format!(
            "SELECT chunk_id, text, embedding, metadata FROM {table}{clause}",
            table = self.table_name
        );
        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_chunk).collect()
    }

    fn row_to_chunk(row: sqlx::postgres::PgRow) -> anyhow::Result<Chunk> {
        let embedding: Vector = row.try_get("embedding")?;
        Ok(Chunk {
            chunk_id: row.try_get("chunk_id")?,
            text: row.try_get("text")?,
            embedding: embedding.to_vec(),
            metadata: row.try_get("metadata")?,
        })
    }

    fn row_to_scored_chunk(row: sqlx::postgres::PgRow) -> anyhow::Result<ScoredChunk> {
        let score: f32 = row.try_get("score")?;
        let embedding: Vector = row.try_get("embedding")?;
        Ok(ScoredChunk {
            chunk: Chunk {
                chunk_id: row.try_get("chunk_id")?,
                text: row.try_get("text")?,
                embedding: embedding.to_vec(),
                metadata: row.try_get("metadata")?,
            },
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_clause_joins_multiple_keys_with_and() {
        let filter = ChunkFilter::new().with("notebook_id", "A").with("source_id", "doc1");
        let (clause, binds) = VectorStore::filter_clause(&filter, 1);
        assert!(clause.contains("AND"));
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn empty_filter_produces_no_clause() {
        let filter = ChunkFilter::new();
        let (clause, binds) = VectorStore::filter_clause(&filter, 1);
        assert!(clause.is_empty());
        assert!(binds.is_empty());
    }
}
