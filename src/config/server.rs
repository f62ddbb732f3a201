// src/config/server.rs
// Server, application database, and logging configuration

use serde::{Deserialize, Serialize};

use super::helpers::{env_bool, env_or, env_u32};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_u32("PORT", 8080) as u16,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Application database: notebooks, conversations, telemetry, SQL-chat
/// connection metadata. `DATABASE_URL` presence enables persistence for all
/// of these (§6); if unset, conversations/telemetry fall back to in-memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::env_opt("DATABASE_URL"),
            max_connections: env_u32("DATABASE_MAX_CONNECTIONS", 10),
        }
    }

    pub fn persistence_enabled(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: env_or("LOG_LEVEL", "info"),
            json: env_bool("LOG_JSON", false),
        }
    }
}

/// Fallback API key used when no user row can be resolved (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub fallback_api_key: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            fallback_api_key: super::helpers::env_opt("API_KEY"),
        }
    }
}
