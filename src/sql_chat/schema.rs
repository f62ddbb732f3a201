// src/sql_chat/schema.rs
// Schema Introspector (§4.4): fingerprint + TTL cache, dialect-specific
// introspection, opt-in sample values via a single `SELECT * LIMIT 5` per
// table (REDESIGN FLAGS: strictly better than per-column SELECT DISTINCT).

use chrono::Utc;
use sqlx::any::AnyPool;
use sqlx::Row;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::connection::DatabaseConnectionManager;
use super::types::{ColumnInfo, DatabaseConnection, DatabaseType, ForeignKey, SchemaInfo, TableInfo};

struct CacheEntry {
    schema: SchemaInfo,
    fingerprint: String,
    cached_at: Instant,
}

pub struct SchemaIntrospector {
    cache: parking_lot::Mutex<HashMap<Uuid, CacheEntry>>,
    cache_ttl: Duration,
}

impl SchemaIntrospector {
    pub fn new(cache_ttl_secs: u64) -> Self {
        Self {
            cache: parking_lot::Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
        }
    }

    /// Cheap hash (~tens of ms) of `(table_name, column_count)` pairs in
    /// deterministic order (§4.4).
    pub async fn fingerprint(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
    ) -> anyhow::Result<String> {
        let query = match connection.db_type {
            DatabaseType::Postgres => {
                "SELECT string_agg(t.table_name || ':' || t.col_count, ',' ORDER BY t.table_name) AS fp
                 FROM (
                   SELECT table_name, COUNT(*) AS col_count
                   FROM information_schema.columns
                   WHERE table_schema = 'public'
                   GROUP BY table_name
                 ) t"
            }
            DatabaseType::Mysql => {
                "SELECT GROUP_CONCAT(t.table_name, ':', t.col_count ORDER BY t.table_name SEPARATOR ',') AS fp
                 FROM (
                   SELECT table_name, COUNT(*) AS col_count
                   FROM information_schema.columns
                   WHERE table_schema = DATABASE()
                   GROUP BY table_name
                 ) t"
            }
            DatabaseType::Sqlite => {
                "SELECT group_concat(name || ':' || cnt) AS fp FROM (
                   SELECT m.name AS name, COUNT(*) AS cnt
                   FROM sqlite_master m
                   JOIN pragma_table_info(m.name) p
                   WHERE m.type = 'table'
                   GROUP BY m.name
                   ORDER BY m.name
                 )"
            }
        };

        let rows = manager.fetch_rows(connection, query).await?;
        let raw: Option<String> = rows
            .first()
            .and_then(|r| r.try_get::<Option<String>, _>(0).ok())
            .flatten();
        Ok(crate::utils::sha256_hash(&raw.unwrap_or_default()))
    }

    /// Returns true if the fingerprint call fails to execute, per §4.4's
    /// "if the fingerprint call fails, assume unchanged" rule.
    pub async fn has_schema_changed(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
    ) -> bool {
        let Some(cached) = self.cache.lock().get(&connection.id).map(|e| e.fingerprint.clone()) else {
            return true;
        };
        match self.fingerprint(manager, connection).await {
            Ok(current) => current != cached,
            Err(_) => false,
        }
    }

    pub async fn introspect(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
        force: bool,
    ) -> anyhow::Result<SchemaInfo> {
        let current_fingerprint = self.fingerprint(manager, connection).await?;

        if !force {
            let cached = self.cache.lock().get(&connection.id).and_then(|entry| {
                let fresh = entry.cached_at.elapsed() < self.cache_ttl;
                let unchanged = entry.fingerprint == current_fingerprint;
                (fresh && unchanged).then(|| entry.schema.clone())
            });
            if let Some(schema) = cached {
                return Ok(schema);
            }
        }

        let schema = self.full_introspect(manager, connection, &current_fingerprint).await?;
        self.cache.lock().insert(
            connection.id,
            CacheEntry {
                schema: schema.clone(),
                fingerprint: current_fingerprint,
                cached_at: Instant::now(),
            },
        );
        Ok(schema)
    }

    async fn full_introspect(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
        fingerprint: &str,
    ) -> anyhow::Result<SchemaInfo> {
        let table_names = self.list_tables(manager, connection).await?;
        let mut tables = Vec::new();
        for name in &table_names {
            let columns = self.columns_for(manager, connection, name).await?;
            let row_count = self.row_count_for(manager, connection, name).await.ok();
            tables.push(TableInfo {
                name: name.clone(),
                columns,
                row_count,
                sample_values: None,
            });
        }
        let relationships = self.foreign_keys(manager, connection).await?;

        Ok(SchemaInfo {
            database_name: connection.database.clone(),
            tables,
            relationships,
            cached_at: Utc::now(),
            fingerprint: fingerprint.to_string(),
        })
    }

    async fn list_tables(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
    ) -> anyhow::Result<Vec<String>> {
        let query = match connection.db_type {
            DatabaseType::Postgres => {
                "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name"
            }
            DatabaseType::Mysql => {
                "SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE() ORDER BY table_name"
            }
            DatabaseType::Sqlite => {
                "SELECT name AS table_name FROM sqlite_master WHERE type = 'table' ORDER BY name"
            }
        };
        let rows = manager.fetch_rows(connection, query).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<String, _>(0).ok())
            .collect())
    }

    async fn columns_for(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
        table: &str,
    ) -> anyhow::Result<Vec<ColumnInfo>> {
        let query = match connection.db_type {
            DatabaseType::Postgres => format!(
                "SELECT column_name, data_type,
                        (is_nullable = 'YES') AS nullable
                 FROM information_schema.columns
                 WHERE table_schema = 'public' AND table_name = '{table}'
                 ORDER BY ordinal_position"
            ),
            DatabaseType::Mysql => format!(
                "SELECT column_name, data_type,
                        (is_nullable = 'YES') AS nullable
                 FROM information_schema.columns
                 WHERE table_schema = DATABASE() AND table_name = '{table}'
                 ORDER BY ordinal_position"
            ),
            DatabaseType::Sqlite => format!("PRAGMA table_info({table})"),
        };

        let rows = manager.fetch_rows(connection, &query).await?;
        let primary_keys = self.primary_keys_for(manager, connection, table).await?;

        let columns = match connection.db_type {
            DatabaseType::Sqlite => rows
                .iter()
                .filter_map(|r| {
                    let name: String = r.try_get("name").ok()?;
                    let data_type: String = r.try_get("type").ok().unwrap_or_default();
                    let notnull: i64 = r.try_get("notnull").ok().unwrap_or(0);
                    let pk: i64 = r.try_get("pk").ok().unwrap_or(0);
                    Some(ColumnInfo {
                        name,
                        data_type,
                        nullable: notnull == 0,
                        primary_key: pk > 0,
                        foreign_key: None,
                        comment: None,
                    })
                })
                .collect(),
            _ => rows
                .iter()
                .filter_map(|r| {
                    let name: String = r.try_get(0).ok()?;
                    let data_type: String = r.try_get(1).ok().unwrap_or_default();
                    let nullable: bool = r.try_get(2).ok().unwrap_or(true);
                    let primary_key = primary_keys.contains(&name);
                    Some(ColumnInfo {
                        name,
                        data_type,
                        nullable,
                        primary_key,
                        foreign_key: None,
                        comment: None,
                    })
                })
                .collect(),
        };

        Ok(columns)
    }

    async fn primary_keys_for(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
        table: &str,
    ) -> anyhow::Result<Vec<String>> {
        let query = match connection.db_type {
            DatabaseType::Postgres => format!(
                "SELECT kcu.column_name
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                 WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_name = '{table}'"
            ),
            DatabaseType::Mysql => format!(
                "SELECT column_name FROM information_schema.key_column_usage
                 WHERE table_schema = DATABASE() AND table_name = '{table}' AND constraint_name = 'PRIMARY'"
            ),
            DatabaseType::Sqlite => return Ok(Vec::new()),
        };
        match manager.fetch_rows(connection, &query).await {
            Ok(rows) => Ok(rows.iter().filter_map(|r| r.try_get::<String, _>(0).ok()).collect()),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn row_count_for(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
        table: &str,
    ) -> anyhow::Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let rows = manager.fetch_rows(connection, &query).await?;
        Ok(rows
            .first()
            .and_then(|r| r.try_get::<i64, _>(0).ok())
            .unwrap_or(0))
    }

    async fn foreign_keys(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
    ) -> anyhow::Result<Vec<ForeignKey>> {
        let query = match connection.db_type {
            DatabaseType::Postgres => {
                "SELECT
                   tc.table_name AS from_table,
                   kcu.column_name AS from_column,
                   ccu.table_name AS to_table,
                   ccu.column_name AS to_column
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                 JOIN information_schema.constraint_column_usage ccu
                   ON tc.constraint_name = ccu.constraint_name
                 WHERE tc.constraint_type = 'FOREIGN KEY'"
                    .to_string()
            }
            DatabaseType::Mysql => {
                "SELECT table_name AS from_table, column_name AS from_column,
                        referenced_table_name AS to_table, referenced_column_name AS to_column
                 FROM information_schema.key_column_usage
                 WHERE table_schema = DATABASE() AND referenced_table_name IS NOT NULL"
                    .to_string()
            }
            DatabaseType::Sqlite => return Ok(Vec::new()),
        };

        match manager.fetch_rows(connection, &query).await {
            Ok(rows) => Ok(rows
                .iter()
                .filter_map(|r| {
                    Some(ForeignKey {
                        from_table: r.try_get("from_table").ok()?,
                        from_column: r.try_get("from_column").ok()?,
                        to_table: r.try_get("to_table").ok()?,
                        to_column: r.try_get("to_column").ok()?,
                    })
                })
                .collect()),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Opt-in (slow) sample values: one `SELECT * LIMIT 5` per table rather
    /// than per-column `SELECT DISTINCT` round-trips.
    pub async fn collect_sample_values(
        &self,
        manager: &DatabaseConnectionManager,
        connection: &DatabaseConnection,
        table: &TableInfo,
    ) -> anyhow::Result<HashMap<String, Vec<String>>> {
        let query = format!("SELECT * FROM {} LIMIT 5", table.name);
        let rows = manager.fetch_rows(connection, &query).await?;

        let mut samples: HashMap<String, Vec<String>> = HashMap::new();
        for column in &table.columns {
            if is_binary_type(&column.data_type) {
                continue;
            }
            let mut values = Vec::new();
            for row in &rows {
                if let Ok(Some(value)) = row.try_get::<Option<String>, _>(column.name.as_str()) {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                if values.len() >= 5 {
                    break;
                }
            }
            if !values.is_empty() {
                samples.insert(column.name.clone(), values);
            }
        }
        Ok(samples)
    }
}

fn is_binary_type(data_type: &str) -> bool {
    let lower = data_type.to_lowercase();
    lower.contains("blob") || lower.contains("bytea") || lower.contains("binary")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_binary_type_detects_common_blob_names() {
        assert!(is_binary_type("bytea"));
        assert!(is_binary_type("BLOB"));
        assert!(!is_binary_type("varchar"));
    }
}
