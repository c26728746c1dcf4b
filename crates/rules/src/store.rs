//! Rule store: loading, validation and indexed access.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use edflow_core::RuleId;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::rule::{Rule, RuleCategory};

/// Fatal problems with a rule source.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Source could not be read
    #[error("cannot read rule source {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Source is not JSON
    #[error("rule document {origin} is not valid JSON: {source}")]
    Json {
        /// Where the document came from
        origin: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// JSON has no rule array
    #[error("rule document {0} has no rule array")]
    MissingRules(String),

    /// Directory contains no rule files
    #[error("no rule files found in {0}")]
    NoRuleFiles(PathBuf),

    /// Every rule was rejected
    #[error("no valid rules loaded ({} rejected)", .diagnostics.len())]
    NoValidRules {
        /// Why each rule was rejected
        diagnostics: Vec<RuleDiagnostic>,
    },
}

/// Why a single rule was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDiagnostic {
    /// Document the rule came from
    pub origin: String,
    /// Position in the document's rule array
    pub index: usize,
    /// Identifier, if one could be read
    pub rule_id: Option<String>,
    /// What was wrong
    pub reason: String,
}

impl std::fmt::Display for RuleDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}] {}: {}",
            self.origin,
            self.index,
            self.rule_id.as_deref().unwrap_or("<no id>"),
            self.reason
        )
    }
}

/// Immutable, ordered collection of validated rules.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: Vec<Rule>,
    index: HashMap<RuleId, usize>,
    diagnostics: Vec<RuleDiagnostic>,
}

impl RuleStore {
    /// Load a rule file, or every `*.json` file if `path` is a directory.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let meta = fs::metadata(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if meta.is_dir() {
            Self::load_dir(path).await
        } else {
            let text = read_source(path).await?;
            Self::from_json_str(&text, &path.display().to_string())
        }
    }

    /// Load every `*.json` file in a directory, in file-name order.
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let io_err = |source| ConfigError::Io { path: dir.to_path_buf(), source };

        let mut files = Vec::new();
        let mut rd = fs::read_dir(dir).await.map_err(io_err)?;
        while let Some(entry) = rd.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(ConfigError::NoRuleFiles(dir.to_path_buf()));
        }
        files.sort();

        let mut builder = Builder::default();
        for file in &files {
            let text = read_source(file).await?;
            builder.add_document(&text, &file.display().to_string())?;
        }
        builder.finish()
    }

    /// Parse a rule document held in memory.
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut builder = Builder::default();
        builder.add_document(text, origin)?;
        builder.finish()
    }

    /// Build from already-constructed rules (validated the same way).
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Result<Self, ConfigError> {
        let mut builder = Builder::default();
        for (i, rule) in rules.into_iter().enumerate() {
            let id = rule.id.to_string();
            builder.accept(rule.prepare(), "<memory>", i, Some(id));
        }
        builder.finish()
    }

    /// All rules in load order.
    pub fn all(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules of one category, in load order.
    pub fn by_category(&self, category: RuleCategory) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.category == category).collect()
    }

    /// Look up by identifier.
    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.index.get(id).map(|&i| &self.rules[i])
    }

    /// Load position of a rule.
    pub fn position(&self, id: &RuleId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Rules skipped during loading.
    pub fn diagnostics(&self) -> &[RuleDiagnostic] {
        &self.diagnostics
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rule is loaded.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

async fn read_source(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Default)]
struct Builder {
    store: RuleStore,
}

impl Builder {
    fn add_document(&mut self, text: &str, origin: &str) -> Result<(), ConfigError> {
        let doc: JsonValue = serde_json::from_str(text).map_err(|source| ConfigError::Json {
            origin: origin.to_string(),
            source,
        })?;

        let entries = match &doc {
            JsonValue::Array(items) => items,
            JsonValue::Object(map) => match map.get("rules") {
                Some(JsonValue::Array(items)) => items,
                _ => return Err(ConfigError::MissingRules(origin.to_string())),
            },
            _ => return Err(ConfigError::MissingRules(origin.to_string())),
        };

        debug!("Parsing {} rule entries from {}", entries.len(), origin);
        for (i, entry) in entries.iter().enumerate() {
            let rule_id = entry.get("id").and_then(|v| v.as_str()).map(str::to_string);
            let parsed = serde_json::from_value::<Rule>(entry.clone())
                .map_err(|e| e.to_string())
                .and_then(Rule::prepare);
            self.accept(parsed, origin, i, rule_id);
        }
        Ok(())
    }

    fn accept(&mut self, parsed: Result<Rule, String>, origin: &str, index: usize, rule_id: Option<String>) {
        let reject = |reason: String| RuleDiagnostic {
            origin: origin.to_string(),
            index,
            rule_id: rule_id.clone(),
            reason,
        };

        let diagnostic = match parsed {
            Ok(rule) if self.store.index.contains_key(&rule.id) => {
                reject(format!("duplicate rule id '{}'", rule.id))
            }
            Ok(rule) => {
                self.store.index.insert(rule.id.clone(), self.store.rules.len());
                self.store.rules.push(rule);
                return;
            }
            Err(reason) => reject(reason),
        };

        warn!("Skipping rule: {}", diagnostic);
        self.store.diagnostics.push(diagnostic);
    }

    fn finish(self) -> Result<RuleStore, ConfigError> {
        if self.store.rules.is_empty() {
            return Err(ConfigError::NoValidRules {
                diagnostics: self.store.diagnostics,
            });
        }
        info!(
            "Loaded {} rules ({} rejected)",
            self.store.rules.len(),
            self.store.diagnostics.len()
        );
        Ok(self.store)
    }
}
