// src/reranker/mod.rs
// Reranker Provider (§4.15): process-wide singleton behind a reentrant lock,
// since the underlying cross-encoder is not concurrency-safe. Runtime
// reconfiguration via `set()` invalidates the loaded instance so the next
// `get()` reloads.

use once_cell::sync::Lazy;
use parking_lot::ReentrantMutex;
use serde::Deserialize;
use std::cell::RefCell;
use std::time::Duration;

use crate::config::llm::RerankerConfig;

/// Resolves a short alias to a concrete model id, mirroring the original's
/// `MODEL_ALIASES` table. Anything not in the table is passed through as a
/// direct model id or local path.
fn resolve_model(model: &str) -> Option<String> {
    match model {
        "disabled" | "none" | "" => None,
        "base" => Some("mxbai-rerank-base-v1".to_string()),
        "large" => Some("mxbai-rerank-large-v1".to_string()),
        "xsmall" => Some("mxbai-rerank-xsmall-v1".to_string()),
        other => Some(other.to_string()),
    }
}

struct RerankerState {
    enabled: bool,
    model_id: Option<String>,
    top_n: usize,
    api_base: Option<String>,
    client: reqwest::Client,
}

impl RerankerState {
    fn from_config(config: &RerankerConfig) -> Self {
        Self {
            enabled: config.enabled,
            model_id: resolve_model(&config.model),
            top_n: config.top_n,
            api_base: config.api_base.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

pub struct RerankerProvider {
    state: ReentrantMutex<RefCell<RerankerState>>,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub index: usize,
    pub score: f32,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

impl RerankerProvider {
    pub fn new(config: &RerankerConfig) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(RerankerState::from_config(config))),
        }
    }

    /// Resolve the model + top_n to use for this call, reloading if the
    /// requested model differs from what is currently loaded.
    pub fn get(&self, model: Option<&str>, top_n: Option<usize>) -> (Option<String>, usize, bool) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        if let Some(m) = model {
            let resolved = resolve_model(m);
            if resolved != state.model_id {
                state.model_id = resolved;
            }
        }
        if let Some(n) = top_n {
            state.top_n = n;
        }

        (state.model_id.clone(), state.top_n, state.enabled)
    }

    /// Runtime reconfiguration. Clears the loaded model id when it changes;
    /// the next `get`/`score` call picks up the new model.
    pub fn set(&self, model: Option<&str>, enabled: Option<bool>, top_n: Option<usize>) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        if let Some(m) = model {
            state.model_id = resolve_model(m);
        }
        if let Some(e) = enabled {
            state.enabled = e;
        }
        if let Some(n) = top_n {
            state.top_n = n;
        }
    }

    /// Score `candidates` against `query`, returning indices into
    /// `candidates` sorted by descending relevance, truncated to `top_n`.
    /// All scoring calls serialize through the reentrant lock (§5).
    pub async fn score(&self, query: &str, candidates: &[String]) -> anyhow::Result<Vec<ScoredCandidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let (model_id, top_n, enabled, api_base, client) = {
            let guard = self.state.lock();
            let state = guard.borrow();
            (
                state.model_id.clone(),
                state.top_n,
                state.enabled,
                state.api_base.clone(),
                state.client.clone(),
            )
        };

        let (Some(model), true) = (model_id, enabled) else {
            // disabled: identity order, neutral descending scores so callers
            // that sort by score still get a stable ranking.
            return Ok(candidates
                .iter()
                .enumerate()
                .map(|(i, _)| ScoredCandidate {
                    index: i,
                    score: 1.0 - (i as f32 * 1e-6),
                })
                .take(top_n)
                .collect());
        };

        let Some(api_base) = api_base else {
            anyhow::bail!("reranker enabled with model {model} but RERANKER_API_BASE is unset");
        };

        let body = serde_json::json!({
            "model": model,
            "query": query,
            "documents": candidates,
            "top_n": top_n,
        });

        let resp = client
            .post(format!("{api_base}/rerank"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("reranker request failed ({status}): {text}");
        }

        let parsed: RerankResponse = resp.json().await?;
        let mut results: Vec<ScoredCandidate> = parsed
            .results
            .into_iter()
            .map(|r| ScoredCandidate {
                index: r.index,
                score: r.relevance_score,
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_n);
        Ok(results)
    }
}

pub static RERANKER: Lazy<RerankerProvider> =
    Lazy::new(|| RerankerProvider::new(&crate::config::CONFIG.reranker));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolution_matches_known_table() {
        assert_eq!(resolve_model("base").as_deref(), Some("mxbai-rerank-base-v1"));
        assert_eq!(resolve_model("disabled"), None);
        assert_eq!(resolve_model("custom-model-id").as_deref(), Some("custom-model-id"));
    }

    #[tokio::test]
    async fn disabled_reranker_returns_identity_order() {
        let config = RerankerConfig {
            enabled: false,
            model: "base".to_string(),
            top_n: 2,
            api_base: None,
        };
        let provider = RerankerProvider::new(&config);
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let scored = provider.score("q", &candidates).await.unwrap();
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].index, 0);
        assert_eq!(scored[1].index, 1);
    }

    #[test]
    fn set_clears_loaded_model_on_change() {
        let config = RerankerConfig {
            enabled: true,
            model: "base".to_string(),
            top_n: 10,
            api_base: Some("http://localhost:9000".to_string()),
        };
        let provider = RerankerProvider::new(&config);
        let (model, _, _) = provider.get(None, None);
        assert_eq!(model.as_deref(), Some("mxbai-rerank-base-v1"));

        provider.set(Some("large"), None, None);
        let (model, _, _) = provider.get(None, None);
        assert_eq!(model.as_deref(), Some("mxbai-rerank-large-v1"));
    }
}
