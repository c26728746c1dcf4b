//! Event store abstraction.

use async_trait::async_trait;
use edflow_core::{Event, Time};

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while persisting or reading events.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored line could not be decoded
    #[error("corrupt event at line {line}: {source}")]
    Corrupt {
        /// 1-based line number
        line: usize,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },
}

/// Append-only persistence for committed events.
///
/// There is no update or delete operation.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events in the given order.
    async fn append_batch(&mut self, events: &[Event]) -> Result<()>;

    /// Events with `timestamp >= from`, ordered by timestamp then sequence.
    async fn read_since(&self, from: Time) -> Result<Vec<Event>>;

    /// Every stored event, ordered by timestamp then sequence.
    async fn read_all(&self) -> Result<Vec<Event>>;
}
