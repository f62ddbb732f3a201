// src/conversation/mod.rs
// Conversation Store (§2, §3 ConversationMessage): ordered per-(notebook,user)
// message log. Writes are transactional per exchange; reads are a snapshot
// ordered by timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: Uuid,
    pub notebook_id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub enum ConversationStore {
    Postgres(PgPool),
    InMemory(std::sync::Arc<parking_lot::Mutex<Vec<ConversationMessage>>>),
}

impl ConversationStore {
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn in_memory() -> Self {
        Self::InMemory(std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())))
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        if let Self::Postgres(pool) = self {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS conversation_messages (
                    message_id UUID PRIMARY KEY,
                    notebook_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
            )
            .execute(pool)
            .await?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_conversation_messages_notebook_user
                 ON conversation_messages (notebook_id, user_id, timestamp)",
            )
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub async fn append(
        &self,
        notebook_id: &str,
        user_id: &str,
        role: MessageRole,
        content: &str,
    ) -> anyhow::Result<ConversationMessage> {
        let message = ConversationMessage {
            message_id: Uuid::new_v4(),
            notebook_id: notebook_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        };

        match self {
            Self::Postgres(pool) => {
                let role_str = match role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                };
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "INSERT INTO conversation_messages
                        (message_id, notebook_id, user_id, role, content, timestamp)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(message.message_id)
                .bind(&message.notebook_id)
                .bind(&message.user_id)
                .bind(role_str)
                .bind(&message.content)
                .bind(message.timestamp)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
            Self::InMemory(store) => {
                store.lock().push(message.clone());
            }
        }

        Ok(message)
    }

    /// Ordered by timestamp (oldest first).
    pub async fn history(
        &self,
        notebook_id: &str,
        user_id: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<ConversationMessage>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, ConversationMessageRow>(
                    "SELECT message_id, notebook_id, user_id, role, content, timestamp
                     FROM conversation_messages
                     WHERE notebook_id = $1 AND user_id = $2
                     ORDER BY timestamp DESC
                     LIMIT $3",
                )
                .bind(notebook_id)
                .bind(user_id)
                .bind(limit)
                .fetch_all(pool)
                .await?;
                let mut messages: Vec<ConversationMessage> =
                    rows.into_iter().map(Into::into).collect();
                messages.reverse();
                Ok(messages)
            }
            Self::InMemory(store) => {
                let guard = store.lock();
                let mut matching: Vec<ConversationMessage> = guard
                    .iter()
                    .filter(|m| m.notebook_id == notebook_id && m.user_id == user_id)
                    .cloned()
                    .collect();
                matching.sort_by_key(|m| m.timestamp);
                if matching.len() as i64 > limit {
                    let skip = matching.len() - limit as usize;
                    matching = matching.split_off(skip);
                }
                Ok(matching)
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct ConversationMessageRow {
    message_id: Uuid,
    notebook_id: String,
    user_id: String,
    role: String,
    content: String,
    timestamp: DateTime<Utc>,
}

impl From<ConversationMessageRow> for ConversationMessage {
    fn from(row: ConversationMessageRow) -> Self {
        Self {
            message_id: row.message_id,
            notebook_id: row.notebook_id,
            user_id: row.user_id,
            role: if row.role == "assistant" {
                MessageRole::Assistant
            } else {
                MessageRole::User
            },
            content: row.content,
            timestamp: row.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_history_is_ordered_and_scoped_per_notebook_user() {
        let store = ConversationStore::in_memory();
        store
            .append("nb1", "u1", MessageRole::User, "hello")
            .await
            .unwrap();
        store
            .append("nb1", "u1", MessageRole::Assistant, "hi there")
            .await
            .unwrap();
        store
            .append("nb2", "u1", MessageRole::User, "other notebook")
            .await
            .unwrap();

        let history = store.history("nb1", "u1", 50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "hi there");
    }

    #[tokio::test]
    async fn history_respects_limit_keeping_most_recent() {
        let store = ConversationStore::in_memory();
        for i in 0..5 {
            store
                .append("nb1", "u1", MessageRole::User, &format!("msg {i}"))
                .await
                .unwrap();
        }
        let history = store.history("nb1", "u1", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "msg 3");
        assert_eq!(history[1].content, "msg 4");
    }
}
