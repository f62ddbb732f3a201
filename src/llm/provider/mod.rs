// src/llm/provider/mod.rs
// LLM completion abstraction: a capability interface with a registry keyed by
// string name (§9 design note), rather than positional provider construction.

pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// A single chunk of a streamed completion.
pub type ChatStream = BoxStream<'static, anyhow::Result<String>>;

/// Completion + streaming-completion provider, swappable by config (§4 LLM
/// Provider). Implementations must be `Send + Sync` since one instance is
/// shared across every request worker.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[Message], temperature: f32) -> anyhow::Result<ChatResponse>;

    async fn stream(&self, messages: &[Message], temperature: f32) -> anyhow::Result<ChatStream>;

    /// Convenience for the many pipeline call sites that just want text back.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let messages = [Message::user(prompt)];
        Ok(self.chat(&messages, 0.0).await?.content)
    }
}
