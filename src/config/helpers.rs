// src/config/helpers.rs
// Helper functions for loading environment variables

use std::env;
use std::str::FromStr;

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_usize(key: &str, default: usize) -> usize {
    env_parsed(key, default)
}

pub fn env_u32(key: &str, default: u32) -> u32 {
    env_parsed(key, default)
}

pub fn env_u64(key: &str, default: u64) -> u64 {
    env_parsed(key, default)
}

pub fn env_f32(key: &str, default: f32) -> f32 {
    env_parsed(key, default)
}

pub fn env_bool(key: &str, default: bool) -> bool {
    env_parsed(key, default)
}
