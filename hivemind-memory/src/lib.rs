//! # Hivemind Memory
//!
//! Distributed conversational memory for AI agent nodes. Each node owns
//! a local store of memories, entities, and relationships; replicas
//! converge through an event log, vector clocks, and CRDT-style merge.
//!
//! ## Overview
//!
//! - **Local store**: an in-process reference store with user, session,
//!   and entity indices plus linear-scan search
//! - **Vector clocks**: per-node counters capturing causal order of
//!   writes across the cluster
//! - **Event log**: append-only record of every memory event; the store
//!   is a materialized view of it
//! - **Broker contract**: publish/subscribe transport for events, with
//!   an in-process reference implementation
//! - **CRDT resolver**: deterministic merge of concurrent revisions
//!   under a configurable strategy
//! - **Distributed manager**: ties the pieces together for one node
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hivemind_memory::{
//!     broker::InProcessBroker,
//!     event_log::InMemoryEventLog,
//!     manager::DistributedMemoryManager,
//!     resolver::{CrdtResolver, MergeStrategy},
//!     store::InMemoryStore,
//!     types::Memory,
//! };
//!
//! let manager = DistributedMemoryManager::new(
//!     "node-a",
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryEventLog::new()),
//!     Arc::new(InProcessBroker::new()),
//!     CrdtResolver::new(MergeStrategy::VectorClock),
//! );
//!
//! let stored = manager.add_memory(Memory::new("user-1", "likes Rust")).await?;
//! ```
//!
//! Writes commit locally before the broker publish; a publish failure
//! surfaces as [`error::MemoryError::PublishFailed`] with the local
//! state already committed and the event log holding the record.

pub mod broker;
pub mod clock;
pub mod error;
pub mod event;
pub mod event_log;
pub mod manager;
pub mod resolver;
pub mod store;
pub mod types;

pub use broker::{BrokerMessage, InProcessBroker, MessageBroker, TOPIC_MEMORY_EVENTS};
pub use clock::VectorClock;
pub use error::MemoryError;
pub use event::{MemoryEvent, MemoryEventType};
pub use event_log::{EventLog, InMemoryEventLog};
pub use manager::DistributedMemoryManager;
pub use resolver::{CrdtResolver, MergeStrategy, ResolutionReport};
pub use store::{InMemoryStore, ListOptions, SearchOptions, SearchResult, SortField};
pub use types::{Entity, EntityRef, EntityType, Memory, MemorySnapshot, MemoryType, Relationship};

/// Result type for memory subsystem operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
