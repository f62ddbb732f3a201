// src/sql_chat/masker.rs
// Data Masker (§4.13, supplemented by the original's `data_masker.py`):
// redact/mask/hash column-level policies applied to result rows before they
// ever leave the process.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::types::MaskingPolicy;
use crate::utils::sha256_hash;

static EMAIL_SHAPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static PHONE_SHAPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[\d\s().-]{7,}$").unwrap());

const SENSITIVE_NAME_PATTERNS: &[(&str, &[&str])] = &[
    ("password", &["password", "passwd", "pwd"]),
    ("ssn", &["ssn", "social_security"]),
    ("email", &["email", "e_mail"]),
    ("phone", &["phone", "mobile", "telephone"]),
    ("address", &["address", "street"]),
    ("dob", &["dob", "birth_date", "date_of_birth"]),
    ("salary", &["salary", "compensation", "wage"]),
    ("api_key", &["api_key", "apikey", "secret", "token"]),
];

pub struct DataMasker;

impl DataMasker {
    pub fn new() -> Self {
        Self
    }

    /// Applies `policy` to every row, returning new maps; original rows are
    /// untouched. Column matching is case-insensitive. Precedence when a
    /// column name appears in more than one set: redact > mask > hash (§4.13).
    pub fn apply(
        &self,
        rows: &[HashMap<String, Value>],
        policy: &MaskingPolicy,
    ) -> Vec<HashMap<String, Value>> {
        rows.iter().map(|row| self.apply_row(row, policy)).collect()
    }

    fn apply_row(&self, row: &HashMap<String, Value>, policy: &MaskingPolicy) -> HashMap<String, Value> {
        let mut masked = HashMap::with_capacity(row.len());
        for (column, value) in row {
            if contains_ci(&policy.redact_columns, column) {
                continue; // redact: drop the key entirely
            }
            if contains_ci(&policy.mask_columns, column) {
                masked.insert(column.clone(), mask_value(value));
                continue;
            }
            if contains_ci(&policy.hash_columns, column) {
                masked.insert(column.clone(), hash_value(value));
                continue;
            }
            masked.insert(column.clone(), value.clone());
        }
        masked
    }

    /// Advisory helper (supplemented): suggests a starter policy by scanning
    /// column names for common sensitive-data patterns. The caller decides
    /// whether to apply it.
    pub fn suggest_policy(&self, column_names: &[String]) -> MaskingPolicy {
        let mut policy = MaskingPolicy::default();
        for column in column_names {
            let lower = column.to_lowercase();
            for (category, patterns) in SENSITIVE_NAME_PATTERNS {
                if patterns.iter().any(|p| lower.contains(p)) {
                    match *category {
                        "password" | "ssn" | "api_key" => {
                            policy.redact_columns.insert(column.clone());
                        }
                        "salary" => {
                            policy.hash_columns.insert(column.clone());
                        }
                        _ => {
                            policy.mask_columns.insert(column.clone());
                        }
                    }
                }
            }
        }
        policy
    }
}

impl Default for DataMasker {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_ci(set: &std::collections::HashSet<String>, name: &str) -> bool {
    set.iter().any(|s| s.eq_ignore_ascii_case(name))
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => {
            if EMAIL_SHAPED.is_match(s) {
                Value::from("****@****.***")
            } else if PHONE_SHAPED.is_match(s) {
                Value::from("***-***-****")
            } else {
                Value::from("****")
            }
        }
        _ => Value::from("****"),
    }
}

fn hash_value(value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let digest = sha256_hash(&text);
    Value::from(digest[..12].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn policy(redact: &[&str], mask: &[&str], hash: &[&str]) -> MaskingPolicy {
        MaskingPolicy {
            redact_columns: redact.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            mask_columns: mask.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            hash_columns: hash.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        }
    }

    #[test]
    fn redact_drops_the_key() {
        let masker = DataMasker::new();
        let mut row = HashMap::new();
        row.insert("ssn".to_string(), Value::from("123-45-6789"));
        row.insert("name".to_string(), Value::from("Ada"));
        let result = masker.apply(&[row], &policy(&["ssn"], &[], &[]));
        assert!(!result[0].contains_key("ssn"));
        assert!(result[0].contains_key("name"));
    }

    #[test]
    fn mask_preserves_email_shape() {
        let masker = DataMasker::new();
        let mut row = HashMap::new();
        row.insert("email".to_string(), Value::from("ada@example.com"));
        let result = masker.apply(&[row], &policy(&[], &["email"], &[]));
        assert_eq!(result[0]["email"], Value::from("****@****.***"));
    }

    #[test]
    fn mask_null_stays_null() {
        let masker = DataMasker::new();
        let mut row = HashMap::new();
        row.insert("email".to_string(), Value::Null);
        let result = masker.apply(&[row], &policy(&[], &["email"], &[]));
        assert_eq!(result[0]["email"], Value::Null);
    }

    #[test]
    fn hash_returns_twelve_char_prefix() {
        let masker = DataMasker::new();
        let mut row = HashMap::new();
        row.insert("salary".to_string(), Value::from("95000"));
        let result = masker.apply(&[row], &policy(&[], &[], &["salary"]));
        assert_eq!(result[0]["salary"].as_str().unwrap().len(), 12);
    }

    #[test]
    fn redact_wins_over_mask_and_hash() {
        let masker = DataMasker::new();
        let mut row = HashMap::new();
        row.insert("secret".to_string(), Value::from("x"));
        let policy = policy(&["secret"], &["secret"], &["secret"]);
        let result = masker.apply(&[row], &policy);
        assert!(!result[0].contains_key("secret"));
    }

    #[test]
    fn suggests_redact_for_password_like_columns() {
        let masker = DataMasker::new();
        let policy = masker.suggest_policy(&["password_hash".to_string(), "full_name".to_string()]);
        assert!(policy.redact_columns.contains("password_hash"));
        assert!(policy.mask_columns.is_empty() || !policy.mask_columns.contains("password_hash"));
    }
}
