//! Retrieval engine: strategy selection and graceful degradation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edflow_rules::{Rule, RuleStore};
use tracing::{debug, info, warn};

use crate::keyword::KeywordStrategy;
use crate::query::QueryContext;
use crate::semantic::{EmbeddingOracle, SemanticOracle, SemanticStrategy};

const DEFAULT_URL: &str = "https://api.mistral.ai";
const DEFAULT_MODEL: &str = "mistral-embed";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Why a semantic call could not be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    /// Oracle did not answer in time
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure
    #[error("oracle request failed: {0}")]
    Http(String),

    /// Oracle answered with an error
    #[error("oracle error: {0}")]
    Oracle(String),

    /// Oracle answer could not be used
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

/// Ranking method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievalMode {
    /// Embedding similarity
    Semantic,
    /// Term overlap
    Keyword,
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => f.write_str("semantic"),
            Self::Keyword => f.write_str("keyword"),
        }
    }
}

/// A rule with its relevance to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRule {
    /// The rule
    pub rule: Rule,

    /// Relevance, higher is better
    pub relevance: f32,

    /// Load position in the store
    pub position: usize,
}

/// Result of one retrieval call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    /// Hits in descending relevance, at most `k`
    pub hits: Vec<ScoredRule>,

    /// Method that produced `hits`
    pub served_by: RetrievalMode,

    /// Set when semantic mode failed and keyword mode answered instead
    pub degraded: Option<RetrievalError>,
}

impl RetrievalOutcome {
    /// Outcome produced without degradation.
    pub fn served(hits: Vec<ScoredRule>, mode: RetrievalMode) -> Self {
        Self {
            hits,
            served_by: mode,
            degraded: None,
        }
    }
}

/// A way of ranking rules for a query.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    /// Configured mode.
    fn mode(&self) -> RetrievalMode;

    /// Top `k` rules for `ctx`. Never fails; degradation is reported in the outcome.
    async fn retrieve(&self, ctx: &QueryContext<'_>, k: usize) -> RetrievalOutcome;
}

#[async_trait]
impl RetrievalStrategy for KeywordStrategy {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Keyword
    }

    async fn retrieve(&self, ctx: &QueryContext<'_>, k: usize) -> RetrievalOutcome {
        RetrievalOutcome::served(self.rank(ctx, k), RetrievalMode::Keyword)
    }
}

#[async_trait]
impl RetrievalStrategy for SemanticStrategy {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Semantic
    }

    async fn retrieve(&self, ctx: &QueryContext<'_>, k: usize) -> RetrievalOutcome {
        let error = match tokio::time::timeout(self.timeout, self.rank(ctx, k)).await {
            Ok(Ok(hits)) => return RetrievalOutcome::served(hits, RetrievalMode::Semantic),
            Ok(Err(e)) => e,
            Err(_) => RetrievalError::Timeout(self.timeout),
        };

        warn!("Semantic retrieval via {} failed, using keywords: {}", self.oracle_name(), error);
        RetrievalOutcome {
            hits: self.fallback.rank(ctx, k),
            served_by: RetrievalMode::Keyword,
            degraded: Some(error),
        }
    }
}

/// Oracle connection settings.
#[derive(Clone)]
pub struct RetrievalConfig {
    /// Bearer credentials; `None` selects keyword mode
    pub api_key: Option<String>,

    /// Base URL of the embeddings API
    pub url: String,

    /// Embedding model
    pub model: String,

    /// Bound on one semantic call
    pub timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("url", &self.url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RetrievalConfig {
    /// Read `EDFLOW_ORACLE_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.api_key = lookup("EDFLOW_ORACLE_API_KEY").filter(|k| !k.trim().is_empty());
        if let Some(url) = lookup("EDFLOW_ORACLE_URL").filter(|u| !u.trim().is_empty()) {
            config.url = url;
        }
        if let Some(model) = lookup("EDFLOW_ORACLE_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model;
        }
        if let Some(raw) = lookup("EDFLOW_ORACLE_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.timeout = Duration::from_millis(ms),
                _ => warn!("Ignoring invalid EDFLOW_ORACLE_TIMEOUT_MS '{}'", raw),
            }
        }
        config
    }

    /// Drop credentials, forcing keyword mode.
    pub fn without_credentials(mut self) -> Self {
        self.api_key = None;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether semantic mode will be selected.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Rule retrieval front end used by the agent.
pub struct RetrievalEngine {
    store: Arc<RuleStore>,
    strategy: Box<dyn RetrievalStrategy>,
}

impl RetrievalEngine {
    /// Pick the strategy from `config`: semantic with credentials, keyword without.
    pub fn new(store: Arc<RuleStore>, config: &RetrievalConfig) -> Self {
        match &config.api_key {
            Some(key) => {
                let oracle = EmbeddingOracle::new(config.url.clone(), config.model.clone(), key.clone());
                Self::with_oracle(store, Arc::new(oracle), config.timeout)
            }
            None => Self::keyword(store),
        }
    }

    /// Keyword-only engine.
    pub fn keyword(store: Arc<RuleStore>) -> Self {
        info!("Retrieval engine in keyword mode over {} rules", store.len());
        Self {
            strategy: Box::new(KeywordStrategy::new(store.clone())),
            store,
        }
    }

    /// Semantic engine over a custom oracle.
    pub fn with_oracle(store: Arc<RuleStore>, oracle: Arc<dyn SemanticOracle>, timeout: Duration) -> Self {
        info!(
            "Retrieval engine in semantic mode ({}) over {} rules",
            oracle.name(),
            store.len()
        );
        Self {
            strategy: Box::new(SemanticStrategy::new(store.clone(), oracle, timeout)),
            store,
        }
    }

    /// Mode chosen at construction.
    pub fn mode(&self) -> RetrievalMode {
        self.strategy.mode()
    }

    /// Rules the engine ranks.
    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Top `k` rules for `ctx`.
    pub async fn retrieve(&self, ctx: &QueryContext<'_>, k: usize) -> RetrievalOutcome {
        let outcome = self.strategy.retrieve(ctx, k).await;
        debug!(
            "Retrieved {} rules ({}{})",
            outcome.hits.len(),
            outcome.served_by,
            if outcome.degraded.is_some() { ", degraded" } else { "" }
        );
        outcome
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("mode", &self.mode())
            .field("rules", &self.store.len())
            .finish()
    }
}
