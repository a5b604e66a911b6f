//! Error types for the memory subsystem.

use thiserror::Error;

/// Errors surfaced by stores, brokers, the event log, and the
/// distributed memory manager.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Memory, entity, or relationship lookup failed
    #[error("not found: {id}")]
    NotFound { id: String },

    /// A remote event carried a vector clock we could not parse;
    /// the event is dropped
    #[error("vector clock parse error: {message}")]
    VectorClockParse { message: String },

    /// The broker rejected an event after the local write committed.
    /// The event log remains the recovery mechanism.
    #[error("publish failed: {message}")]
    PublishFailed { message: String },

    /// Broker transport or subscription failure
    #[error("broker error: {message}")]
    Broker { message: String },

    /// JSON serialization and deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input to a store or manager operation
    #[error("validation error: {message}")]
    Validation { message: String },
}
