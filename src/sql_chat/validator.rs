// src/sql_chat/validator.rs
// SQL Validator (§4.9): three layers, all must pass.

use regex::Regex;
use std::sync::LazyLock;

use super::types::SchemaInfo;

const FORBIDDEN_OPERATIONS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "INSERT", "UPDATE", "CREATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "CALL", "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "LOCK", "UNLOCK",
];

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)';--").unwrap(),
        Regex::new(r"(?i)union\s+select").unwrap(),
        Regex::new(r"(?i)or\s+1\s*=\s*1").unwrap(),
        Regex::new(r"/\*.*?\*/").unwrap(),
        Regex::new(r"(?i);\s*(drop|delete|truncate|alter|insert|update)").unwrap(),
        Regex::new(r"(?i)sleep\(").unwrap(),
        Regex::new(r"(?i)pg_sleep\(").unwrap(),
        Regex::new(r"(?i)waitfor\s+delay").unwrap(),
        Regex::new(r"(?i)benchmark\(").unwrap(),
        Regex::new(r"(?i)load_file\(").unwrap(),
        Regex::new(r"(?i)into\s+outfile").unwrap(),
        Regex::new(r"(?i)into\s+dumpfile").unwrap(),
        Regex::new(r"(?i)xp_cmdshell").unwrap(),
    ]
});

static FORBIDDEN_OP_PATTERNS: LazyLock<Vec<(String, Regex)>> = LazyLock::new(|| {
    FORBIDDEN_OPERATIONS
        .iter()
        .map(|op| {
            (
                op.to_string(),
                Regex::new(&format!(r"(?i)\b{op}\b")).unwrap(),
            )
        })
        .collect()
});

static RAW_SQL_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(SELECT|DROP|DELETE|INSERT|UPDATE)\b").unwrap());

static TABLE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([a-zA-Z_][a-zA-Z0-9_\.]*)").unwrap());

static COLUMN_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\b").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum ValidationFailure {
    #[error("{0}")]
    Rejected(String),
}

pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    /// Layer 1: called on the NL query itself (§4.9.1).
    pub fn validate_user_input(&self, query: &str) -> Result<(), ValidationFailure> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ValidationFailure::Rejected("Query cannot be empty".to_string()));
        }
        if RAW_SQL_START.is_match(trimmed) {
            return Err(ValidationFailure::Rejected(
                "Query looks like raw SQL, not a natural-language question".to_string(),
            ));
        }
        for pattern in INJECTION_PATTERNS.iter() {
            if pattern.is_match(trimmed) {
                return Err(ValidationFailure::Rejected(
                    "Query contains a disallowed pattern".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Layer 2 + 3: generated SQL, optionally checked against a schema
    /// (§4.9.2-3).
    pub fn validate_generated_sql(
        &self,
        sql: &str,
        schema: Option<&SchemaInfo>,
    ) -> Result<(), ValidationFailure> {
        let trimmed = sql.trim();

        if !Regex::new(r"(?i)^\s*(SELECT|WITH)\b").unwrap().is_match(trimmed) {
            return Err(ValidationFailure::Rejected(
                "Query must start with SELECT or WITH".to_string(),
            ));
        }

        for (op, pattern) in FORBIDDEN_OP_PATTERNS.iter() {
            if pattern.is_match(trimmed) {
                return Err(ValidationFailure::Rejected(format!(
                    "Query contains forbidden operation: {op}"
                )));
            }
        }

        for pattern in INJECTION_PATTERNS.iter() {
            if pattern.is_match(trimmed) {
                return Err(ValidationFailure::Rejected(
                    "Query matches an injection pattern".to_string(),
                ));
            }
        }

        self.check_single_statement(trimmed)?;

        if let Some(schema) = schema {
            self.check_table_references(trimmed, schema)?;
            self.check_column_references(trimmed, schema)?;
        }

        Ok(())
    }

    fn check_single_statement(&self, sql: &str) -> Result<(), ValidationFailure> {
        let trimmed = sql.trim_end();
        let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
        if body.contains(';') {
            return Err(ValidationFailure::Rejected(
                "Only a single statement is allowed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn check_table_references(
        &self,
        sql: &str,
        schema: &SchemaInfo,
    ) -> Result<(), ValidationFailure> {
        let known: Vec<String> = schema.table_names().iter().map(|t| t.to_lowercase()).collect();
        for caps in TABLE_REFERENCE.captures_iter(sql) {
            let raw = caps.get(1).unwrap().as_str();
            let table = raw.split('.').next_back().unwrap_or(raw).to_lowercase();
            if !known.contains(&table) {
                return Err(ValidationFailure::Rejected(format!(
                    "Unknown table referenced: {raw}"
                )));
            }
        }
        Ok(())
    }

    pub fn check_column_references(
        &self,
        sql: &str,
        schema: &SchemaInfo,
    ) -> Result<(), ValidationFailure> {
        for caps in COLUMN_REFERENCE.captures_iter(sql) {
            let table_ref = caps.get(1).unwrap().as_str();
            let column_ref = caps.get(2).unwrap().as_str();
            let Some(table) = schema.table(table_ref) else {
                continue; // might be an alias, not a known table; schema layer only checks known tables
            };
            let column_exists = table
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(column_ref));
            if !column_exists {
                return Err(ValidationFailure::Rejected(format!(
                    "Unknown column reference: {table_ref}.{column_ref}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_chat::types::{ColumnInfo, TableInfo};
    use chrono::Utc;

    fn sample_schema() -> SchemaInfo {
        SchemaInfo {
            database_name: "test".to_string(),
            tables: vec![TableInfo {
                name: "customers".to_string(),
                columns: vec![ColumnInfo {
                    name: "name".to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                    primary_key: false,
                    foreign_key: None,
                    comment: None,
                }],
                row_count: None,
                sample_values: None,
            }],
            relationships: Vec::new(),
            cached_at: Utc::now(),
            fingerprint: "fp".to_string(),
        }
    }

    #[test]
    fn rejects_empty_user_query() {
        let validator = QueryValidator::new();
        assert!(validator.validate_user_input("").is_err());
    }

    #[test]
    fn rejects_raw_sql_as_user_query() {
        let validator = QueryValidator::new();
        assert!(validator.validate_user_input("DELETE everything").is_err());
    }

    #[test]
    fn rejects_generated_sql_with_forbidden_operation() {
        let validator = QueryValidator::new();
        let err = validator
            .validate_generated_sql("DELETE FROM users", None)
            .unwrap_err();
        assert!(err.to_string().contains("forbidden operation: DELETE"));
    }

    #[test]
    fn accepts_valid_select_against_schema() {
        let validator = QueryValidator::new();
        let schema = sample_schema();
        assert!(validator
            .validate_generated_sql("SELECT customers.name FROM customers", Some(&schema))
            .is_ok());
    }

    #[test]
    fn rejects_unknown_table() {
        let validator = QueryValidator::new();
        let schema = sample_schema();
        assert!(validator
            .validate_generated_sql("SELECT name FROM customerz", Some(&schema))
            .is_err());
    }

    #[test]
    fn rejects_multiple_statements() {
        let validator = QueryValidator::new();
        assert!(validator
            .validate_generated_sql("SELECT 1; DROP TABLE users", None)
            .is_err());
    }

    #[test]
    fn rejects_union_select_injection() {
        let validator = QueryValidator::new();
        assert!(validator
            .validate_generated_sql("SELECT name FROM customers UNION SELECT password FROM users", None)
            .is_err());
    }
}
