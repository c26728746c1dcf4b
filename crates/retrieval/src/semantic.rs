//! Embedding-based relevance scoring.
//!
//! Rule texts and the query are embedded by an external oracle and compared
//! with cosine similarity. Rule embeddings are requested once and cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edflow_rules::RuleStore;
use reqwest::{Client, ClientBuilder};
use serde_json::{json, Value as JsonValue};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::engine::{RetrievalError, ScoredRule};
use crate::keyword::{sort_hits, KeywordStrategy};
use crate::query::QueryContext;

/// Source of text embeddings.
#[async_trait]
pub trait SemanticOracle: Send + Sync {
    /// Embed each text; the result has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Clone)]
pub struct EmbeddingOracle {
    /// HTTP client
    client: Client,

    /// Base URL, without the `/v1/embeddings` suffix
    url: String,

    /// Model name
    model: String,

    /// Bearer token
    api_key: String,
}

impl EmbeddingOracle {
    /// Create a client.
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for EmbeddingOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingOracle")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SemanticOracle for EmbeddingOracle {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let payload = json!({
            "model": self.model,
            "input": texts,
        });

        debug!("Requesting {} embeddings from {}", texts.len(), self.url);

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RetrievalError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Oracle(format!("status {}: {}", status, error_text)));
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        parse_embeddings(&body, texts.len())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Extract `data[*].embedding`, ordered by `index`.
fn parse_embeddings(body: &JsonValue, expected: usize) -> Result<Vec<Vec<f32>>, RetrievalError> {
    #[derive(serde::Deserialize)]
    struct Item {
        #[serde(default)]
        index: usize,
        embedding: Vec<f32>,
    }

    #[derive(serde::Deserialize)]
    struct Response {
        data: Vec<Item>,
    }

    let mut response: Response =
        serde_json::from_value(body.clone()).map_err(|e| RetrievalError::Malformed(e.to_string()))?;
    if response.data.len() != expected {
        return Err(RetrievalError::Malformed(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }
    response.data.sort_by_key(|item| item.index);
    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

/// Cosine similarity; zero when either vector is empty or null.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Ranks rules by embedding similarity, with a keyword fallback.
pub struct SemanticStrategy {
    store: Arc<RuleStore>,
    oracle: Arc<dyn SemanticOracle>,
    rule_vectors: OnceCell<Vec<Vec<f32>>>,
    pub(crate) fallback: KeywordStrategy,
    pub(crate) timeout: Duration,
}

impl SemanticStrategy {
    /// Strategy backed by `oracle`; each call is bounded by `timeout`.
    pub fn new(store: Arc<RuleStore>, oracle: Arc<dyn SemanticOracle>, timeout: Duration) -> Self {
        Self {
            fallback: KeywordStrategy::new(store.clone()),
            store,
            oracle,
            rule_vectors: OnceCell::new(),
            timeout,
        }
    }

    /// Oracle name.
    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    async fn rule_vectors(&self) -> Result<&Vec<Vec<f32>>, RetrievalError> {
        self.rule_vectors
            .get_or_try_init(|| async {
                let texts: Vec<String> = self.store.all().iter().map(|r| r.search_text()).collect();
                let vectors = self.oracle.embed(&texts).await?;
                if vectors.len() != texts.len() {
                    return Err(RetrievalError::Malformed(format!(
                        "oracle embedded {} of {} rules",
                        vectors.len(),
                        texts.len()
                    )));
                }
                debug!("Cached embeddings for {} rules", vectors.len());
                Ok::<_, RetrievalError>(vectors)
            })
            .await
    }

    /// Top `k` rules by similarity. Errors are returned, not recovered.
    pub async fn rank(&self, ctx: &QueryContext<'_>, k: usize) -> Result<Vec<ScoredRule>, RetrievalError> {
        let rule_vectors = self.rule_vectors().await?;
        let query = self
            .oracle
            .embed(&[ctx.render()])
            .await?
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RetrievalError::Malformed("empty query embedding".to_string()))?;

        let mut scored: Vec<ScoredRule> = self
            .store
            .all()
            .iter()
            .enumerate()
            .filter(|(_, rule)| ctx.category.map_or(true, |c| rule.category == c))
            .map(|(position, rule)| {
                let similarity = cosine_similarity(&query, &rule_vectors[position]);
                ScoredRule {
                    rule: rule.clone(),
                    relevance: if similarity.is_finite() { similarity } else { 0.0 },
                    position,
                }
            })
            .collect();

        sort_hits(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_parse_embeddings_orders_by_index() {
        let body = json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ],
            "model": "mistral-embed"
        });
        let vectors = parse_embeddings(&body, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_embeddings_rejects_bad_shapes() {
        let short = json!({"data": [{"index": 0, "embedding": [1.0]}]});
        assert!(matches!(parse_embeddings(&short, 2), Err(RetrievalError::Malformed(_))));

        let garbage = json!({"error": "quota"});
        assert!(matches!(parse_embeddings(&garbage, 1), Err(RetrievalError::Malformed(_))));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let oracle = EmbeddingOracle::new("https://api.example.test/", "embed-small", "secret-key");
        let shown = format!("{:?}", oracle);
        assert!(!shown.contains("secret-key"));
        assert!(shown.contains("https://api.example.test\""));
    }
}
