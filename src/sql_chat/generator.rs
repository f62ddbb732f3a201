// src/sql_chat/generator.rs
// SQL Generator + Syntactic Correction (§4.8): prompt assembly from few-shot
// examples, intent hint, linked sub-schema, and learned join hints; bounded
// self-correction loop against the validator in `validator.rs`.

use std::sync::Arc;

use super::intent::ClassifiedIntent;
use super::types::{FewShotExample, SchemaInfo};
use super::validator::QueryValidator;
use crate::llm::{LlmProvider, Message};

/// Formats a schema compactly for a prompt: one line per table, columns with
/// type + PK/FK markers, plus foreign keys (§4.8 "linked sub-schema formatted
/// compactly").
pub fn format_schema_for_prompt(schema: &SchemaInfo) -> String {
    let mut out = String::new();
    for table in &schema.tables {
        out.push_str(&format!("Table {}", table.name));
        if let Some(rows) = table.row_count {
            out.push_str(&format!(" (~{rows} rows)"));
        }
        out.push_str(":\n");
        for column in &table.columns {
            let mut markers = Vec::new();
            if column.primary_key {
                markers.push("PK");
            }
            if column.foreign_key.is_some() {
                markers.push("FK");
            }
            let marker_str = if markers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", markers.join(","))
            };
            out.push_str(&format!("  - {} {}{}\n", column.name, column.data_type, marker_str));
        }
    }
    if !schema.relationships.is_empty() {
        out.push_str("Foreign keys:\n");
        for fk in &schema.relationships {
            out.push_str(&format!(
                "  - {}.{} -> {}.{}\n",
                fk.from_table, fk.from_column, fk.to_table, fk.to_column
            ));
        }
    }
    out
}

fn format_few_shot(examples: &[FewShotExample]) -> String {
    if examples.is_empty() {
        return String::new();
    }
    let mut out = String::from("Similar past examples:\n");
    for example in examples {
        out.push_str(&format!(
            "Q: {}\nSQL: {}\n\n",
            example.natural_question, example.sql
        ));
    }
    out
}

fn strip_sql_fences(text: &str) -> String {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix("```sql")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    stripped.trim_end_matches("```").trim().to_string()
}

pub struct GenerationRequest<'a> {
    pub user_query: &'a str,
    pub intent: &'a ClassifiedIntent,
    pub schema: &'a SchemaInfo,
    pub few_shot_examples: &'a [FewShotExample],
    pub join_hints: &'a [String],
}

impl<'a> GenerationRequest<'a> {
    fn build_prompt(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format_few_shot(self.few_shot_examples));
        prompt.push_str(&format!(
            "Query shape hint ({}): {}\n\n",
            self.intent.intent.as_str(),
            self.intent.intent.generation_hint()
        ));
        prompt.push_str("Schema:\n");
        prompt.push_str(&format_schema_for_prompt(self.schema));
        if !self.join_hints.is_empty() {
            prompt.push_str("\nPreviously successful joins on this connection:\n");
            for hint in self.join_hints {
                prompt.push_str(&format!("  - {hint}\n"));
            }
        }
        prompt.push_str(&format!(
            "\nQuestion: {}\n\nRespond with a single read-only SQL SELECT statement only, no explanation, no markdown fences.",
            self.user_query
        ));
        prompt
    }
}

pub struct GenerationOutcome {
    pub sql: String,
    pub retry_count: u32,
}

pub struct SqlGenerator {
    llm: Arc<dyn LlmProvider>,
    validator: Arc<QueryValidator>,
    max_retries: u32,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, validator: Arc<QueryValidator>, max_retries: u32) -> Self {
        Self {
            llm,
            validator,
            max_retries,
        }
    }

    /// Generates SQL for `request`, self-correcting against validator
    /// failures up to `max_retries` times (§4.8). The last candidate is
    /// returned even if it never validates clean; the caller's pipeline
    /// stage is expected to surface the validation error as the final
    /// failure in that case.
    pub async fn generate(&self, request: &GenerationRequest<'_>) -> anyhow::Result<GenerationOutcome> {
        let prompt = request.build_prompt();
        let mut sql = strip_sql_fences(&self.llm.complete(&prompt).await?);
        let mut retries = 0u32;

        loop {
            match self
                .validator
                .validate_generated_sql(&sql, Some(request.schema))
            {
                Ok(()) => return Ok(GenerationOutcome { sql, retry_count: retries }),
                Err(err) => {
                    if retries >= self.max_retries {
                        return Ok(GenerationOutcome { sql, retry_count: retries });
                    }
                    sql = self.correct(request.user_query, &sql, &err.to_string()).await?;
                    retries += 1;
                }
            }
        }
    }

    async fn correct(&self, question: &str, current_sql: &str, error: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "The following SQL was generated for the question below but failed validation.\n\n\
             Question: {question}\n\n\
             SQL:\n{current_sql}\n\n\
             Validation error: {error}\n\n\
             Return a corrected single SELECT/WITH statement only, no explanation, no markdown fences."
        );
        let response = self.llm.chat(&[Message::user(prompt)], 0.0).await?;
        Ok(strip_sql_fences(&response.content))
    }

    /// Targeted regeneration used by the semantic inspector's retry loop
    /// (§4.12): same correction prompt shape, driven by a semantic issue
    /// hint rather than a validator error.
    pub async fn regenerate_with_feedback(
        &self,
        question: &str,
        current_sql: &str,
        feedback: &str,
    ) -> anyhow::Result<String> {
        self.correct(question, current_sql, feedback).await
    }

    /// Refinement branch (§4.17): asks the LLM to modify the previous
    /// exchange's SQL per a new instruction instead of generating from
    /// scratch. The caller skips intent classification and cost estimation
    /// for this path.
    pub async fn refine_previous_sql(&self, instruction: &str, previous_sql: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "The previous SQL query was:\n{previous_sql}\n\n\
             Modify it to satisfy this follow-up instruction. Preserve everything else about \
             the query, including any existing LIMIT clause, unless the instruction says \
             otherwise. Return a single SELECT/WITH statement only, no explanation, no \
             markdown fences.\n\n\
             Instruction: {instruction}"
        );
        let response = self.llm.chat(&[Message::user(prompt)], 0.0).await?;
        Ok(strip_sql_fences(&response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_chat::intent::{Intent, IntentClassifier};
    use crate::sql_chat::types::{ColumnInfo, TableInfo};
    use chrono::Utc;

    fn schema() -> SchemaInfo {
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
                row_count: Some(100),
                sample_values: None,
            }],
            relationships: Vec::new(),
            cached_at: Utc::now(),
            fingerprint: "fp".to_string(),
        }
    }

    #[test]
    fn prompt_includes_schema_intent_and_question() {
        let classified = IntentClassifier::new().classify("top 10 customers");
        let request = GenerationRequest {
            user_query: "top 10 customers",
            intent: &classified,
            schema: &schema(),
            few_shot_examples: &[],
            join_hints: &[],
        };
        let prompt = request.build_prompt();
        assert!(prompt.contains("customers"));
        assert!(prompt.contains("top 10 customers"));
        assert!(matches!(classified.intent, Intent::TopK));
    }

    #[test]
    fn strip_sql_fences_removes_markdown_wrapper() {
        let wrapped = "```sql\nSELECT 1\n```";
        assert_eq!(strip_sql_fences(wrapped), "SELECT 1");
    }
}
