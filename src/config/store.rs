// src/config/store.rs
// Vector + metadata store configuration (§6: POSTGRES_*, PGVECTOR_*)

use serde::{Deserialize, Serialize};

use super::helpers::{env_or, env_u32, env_usize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub table_name: String,
    pub embed_dim: usize,
}

impl PostgresConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("POSTGRES_HOST", "localhost"),
            port: env_u32("POSTGRES_PORT", 5432) as u16,
            database: env_or("POSTGRES_DB", "dbnotebook"),
            user: env_or("POSTGRES_USER", "postgres"),
            password: env_or("POSTGRES_PASSWORD", "postgres"),
            max_connections: env_u32("POSTGRES_MAX_CONNECTIONS", 10),
            table_name: env_or("PGVECTOR_TABLE_NAME", "chunks"),
            embed_dim: env_usize("PGVECTOR_EMBED_DIM", 1536),
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}
