// src/metrics/mod.rs
// Lightweight counters/histograms for the retrieval and sql-chat pipelines.
// No Prometheus exporter: emitted via the `metrics` facade and picked up by
// whatever recorder the host process installs (or none, in tests).

use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static ACTIVE_SESSIONS: AtomicU64 = AtomicU64::new(0);

/// Record an inbound API request.
pub fn record_request(route: &str) {
    counter!("dbnotebook_requests_total", "route" => route.to_string()).increment(1);
}

pub fn record_request_duration(route: &str, duration_seconds: f64) {
    histogram!("dbnotebook_request_duration_seconds", "route" => route.to_string())
        .record(duration_seconds);
}

/// Record an LLM provider call (chat or embedding).
pub fn record_llm_call(provider: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("dbnotebook_llm_calls_total", "provider" => provider.to_string(), "status" => status)
        .increment(1);
}

pub fn record_tokens(prompt_tokens: u64, completion_tokens: u64) {
    counter!("dbnotebook_llm_tokens_total", "type" => "prompt").increment(prompt_tokens);
    counter!("dbnotebook_llm_tokens_total", "type" => "completion").increment(completion_tokens);
}

/// Record one SQL-chat pipeline execution outcome.
pub fn record_sql_chat_query(intent: &str, success: bool, syntactic_retries: u32) {
    let status = if success { "success" } else { "error" };
    counter!("dbnotebook_sql_chat_queries_total", "intent" => intent.to_string(), "status" => status)
        .increment(1);
    histogram!("dbnotebook_sql_chat_syntactic_retries", "intent" => intent.to_string())
        .record(syntactic_retries as f64);
}

pub fn record_reranker_call(duration_seconds: f64) {
    histogram!("dbnotebook_reranker_duration_seconds").record(duration_seconds);
}

pub fn session_opened() {
    let count = ACTIVE_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("dbnotebook_active_sql_chat_sessions").set(count as f64);
}

pub fn session_closed() {
    let count = ACTIVE_SESSIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!("dbnotebook_active_sql_chat_sessions").set(count as f64);
}

/// RAII timer: records a request duration when dropped.
pub struct RequestTimer {
    start: Instant,
    route: String,
}

impl RequestTimer {
    pub fn new(route: &str) -> Self {
        record_request(route);
        Self {
            start: Instant::now(),
            route: route.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request_duration(&self.route, duration);
    }
}
