//! Memory events: the replication unit exchanged between nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::clock::VectorClock;
use crate::types::{generate_id, EntityRef, Memory, Relationship};

/// Closed set of replication event types. Unknown strings deserialize
/// into [`MemoryEventType::Unknown`] and are logged and ignored by the
/// manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryEventType {
    #[serde(rename = "memory.created")]
    MemoryCreated,
    #[serde(rename = "memory.updated")]
    MemoryUpdated,
    #[serde(rename = "memory.deleted")]
    MemoryDeleted,
    #[serde(rename = "memory.merged")]
    MemoryMerged,
    #[serde(rename = "entity.created")]
    EntityCreated,
    #[serde(rename = "entity.updated")]
    EntityUpdated,
    #[serde(rename = "entity.deleted")]
    EntityDeleted,
    #[serde(rename = "relationship.created")]
    RelationshipCreated,
    #[serde(rename = "relationship.updated")]
    RelationshipUpdated,
    #[serde(rename = "relationship.deleted")]
    RelationshipDeleted,
    #[serde(rename = "memory.sync_request")]
    SyncRequest,
    #[serde(other)]
    Unknown,
}

impl MemoryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryEventType::MemoryCreated => "memory.created",
            MemoryEventType::MemoryUpdated => "memory.updated",
            MemoryEventType::MemoryDeleted => "memory.deleted",
            MemoryEventType::MemoryMerged => "memory.merged",
            MemoryEventType::EntityCreated => "entity.created",
            MemoryEventType::EntityUpdated => "entity.updated",
            MemoryEventType::EntityDeleted => "entity.deleted",
            MemoryEventType::RelationshipCreated => "relationship.created",
            MemoryEventType::RelationshipUpdated => "relationship.updated",
            MemoryEventType::RelationshipDeleted => "relationship.deleted",
            MemoryEventType::SyncRequest => "memory.sync_request",
            MemoryEventType::Unknown => "unknown",
        }
    }
}

/// A single replicated change, published to the broker and appended to
/// the event log.
///
/// `version` is a nanosecond Lamport timestamp used as a total-order
/// tiebreaker; `vector_clock` carries the causal order as serialized
/// JSON (`node -> count`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    #[serde(default = "generate_id")]
    pub event_id: String,
    pub event_type: MemoryEventType,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub memory_id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Nanosecond Lamport version for total ordering fallback
    pub version: i64,
    /// Serialized vector clock, `{"node": count, ...}`
    pub vector_clock: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<String>,
}

impl MemoryEvent {
    /// Build an event describing `memory` as seen under `clock`.
    pub fn for_memory(
        event_type: MemoryEventType,
        node_id: &str,
        memory: &Memory,
        clock: &VectorClock,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: generate_id(),
            event_type,
            timestamp: now,
            node_id: node_id.to_string(),
            memory_id: memory.id.clone(),
            user_id: memory.user_id.clone(),
            session_id: memory.session_id.clone(),
            content: memory.content.clone(),
            embedding: memory.embedding.clone(),
            entities: memory.entities.clone(),
            relationships: Vec::new(),
            importance: memory.importance,
            tags: memory.tags.clone(),
            metadata: memory.metadata.clone(),
            version: lamport_now(&now),
            vector_clock: clock.to_json(),
            merged_from: Vec::new(),
        }
    }

    /// Build a sync-request carrying only the node's clock.
    pub fn sync_request(node_id: &str, clock: &VectorClock) -> Self {
        let now = Utc::now();
        Self {
            event_id: generate_id(),
            event_type: MemoryEventType::SyncRequest,
            timestamp: now,
            node_id: node_id.to_string(),
            memory_id: String::new(),
            user_id: String::new(),
            session_id: String::new(),
            content: String::new(),
            embedding: Vec::new(),
            entities: Vec::new(),
            relationships: Vec::new(),
            importance: 0.0,
            tags: Vec::new(),
            metadata: HashMap::new(),
            version: lamport_now(&now),
            vector_clock: clock.to_json(),
            merged_from: Vec::new(),
        }
    }

    pub fn parse_clock(&self) -> Result<VectorClock, crate::error::MemoryError> {
        VectorClock::from_json(&self.vector_clock)
    }
}

fn lamport_now(now: &DateTime<Utc>) -> i64 {
    // Nanosecond precision overflows i64 in 2262; saturate rather than fail.
    now.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    #[test]
    fn event_json_round_trip() {
        let mut memory = Memory::new("user-1", "content here")
            .with_session("session-2")
            .with_importance(0.7)
            .with_tags(vec!["t1".into()]);
        memory.entities.push(EntityRef {
            id: "e1".into(),
            name: "Paris".into(),
            entity_type: EntityType::Place,
            confidence: 0.8,
        });
        memory
            .metadata
            .insert("origin".into(), Value::from("chat"));

        let mut clock = VectorClock::new();
        clock.increment("node-a");
        let event =
            MemoryEvent::for_memory(MemoryEventType::MemoryCreated, "node-a", &memory, &clock);

        let raw = serde_json::to_string(&event).unwrap();
        let parsed: MemoryEvent = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.event_type, MemoryEventType::MemoryCreated);
        assert_eq!(parsed.memory_id, memory.id);
        assert_eq!(parsed.user_id, "user-1");
        assert_eq!(parsed.session_id, "session-2");
        assert_eq!(parsed.content, "content here");
        assert_eq!(parsed.entities, event.entities);
        assert_eq!(parsed.tags, event.tags);
        assert_eq!(parsed.metadata, event.metadata);
        assert_eq!(parsed.version, event.version);
        assert_eq!(parsed.vector_clock, event.vector_clock);
        assert_eq!(parsed.parse_clock().unwrap().get("node-a"), 1);
    }

    #[test]
    fn event_type_wire_names() {
        let raw = serde_json::to_string(&MemoryEventType::MemoryCreated).unwrap();
        assert_eq!(raw, "\"memory.created\"");
        let parsed: MemoryEventType = serde_json::from_str("\"memory.sync_request\"").unwrap();
        assert_eq!(parsed, MemoryEventType::SyncRequest);
    }

    #[test]
    fn unknown_event_types_deserialize() {
        let parsed: MemoryEventType = serde_json::from_str("\"memory.compacted\"").unwrap();
        assert_eq!(parsed, MemoryEventType::Unknown);
    }

    #[test]
    fn lamport_versions_do_not_regress() {
        let a = lamport_now(&Utc::now());
        let b = lamport_now(&Utc::now());
        assert!(b >= a);
    }
}
