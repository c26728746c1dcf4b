//! Rule store for edflow.
//!
//! Loads declarative triage, admission and transfer rules from JSON, rejects
//! malformed entries with per-rule diagnostics, and evaluates rule triggers
//! with a small condition interpreter.

#![warn(missing_docs)]

pub mod condition;
pub mod rule;
pub mod store;

pub use condition::{Attribute, CapabilitySubject, Comparison, Condition, EvalContext, SetMatch};
pub use rule::{Rule, RuleAction, RuleCategory, TransferPriority};
pub use store::{ConfigError, RuleDiagnostic, RuleStore};
