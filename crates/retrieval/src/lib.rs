//! edflow Retrieval - finds the rules relevant to a decision.
//!
//! Two strategies rank the rule store for a [`QueryContext`]: embedding
//! similarity through a [`SemanticOracle`], and local term overlap. The mode is
//! fixed when the [`RetrievalEngine`] is built; a failing oracle degrades a
//! single call to keyword ranking.

#![warn(missing_docs)]

pub mod engine;
pub mod keyword;
pub mod query;
pub mod semantic;

pub use engine::{
    RetrievalConfig, RetrievalEngine, RetrievalError, RetrievalMode, RetrievalOutcome, RetrievalStrategy,
    ScoredRule,
};
pub use keyword::KeywordStrategy;
pub use query::{tokenize, QueryContext};
pub use semantic::{cosine_similarity, EmbeddingOracle, SemanticOracle, SemanticStrategy};
