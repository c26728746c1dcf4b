//! Event persistence for edflow.
//!
//! This crate provides a trait-based, append-only event store with a
//! JSON-lines file implementation.

#![warn(missing_docs)]

pub mod jsonl_store;
pub mod trait_;

pub use jsonl_store::JsonLinesEventStore;
pub use trait_::{EventStore, Result, StoreError};
