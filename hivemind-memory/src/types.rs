//! Core data types for the memory subsystem.
//!
//! A [`Memory`] is a stored conversational fact owned by a user.
//! [`Entity`] and [`Relationship`] form the knowledge-graph side of the
//! store; relationships are indexed from both endpoints but keep their
//! direction for semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of memory being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A recorded interaction
    Episodic,
    /// A distilled fact
    Semantic,
    /// A how-to or skill
    Procedural,
    /// Short-lived scratch state
    Working,
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::Episodic
    }
}

/// A stored conversational fact.
///
/// Invariants: `updated_at >= created_at`; `access_count` only grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default = "generate_id")]
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Relevance weight in `[0, 1]`
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub access_count: u64,
    /// Entity references extracted from the content; merged by id on
    /// replica conflict
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Serialized clock of the write that produced this revision; empty
    /// until the memory has replicated
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vector_clock: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            user_id: user_id.into(),
            session_id: String::new(),
            content: content.into(),
            summary: None,
            memory_type: MemoryType::Episodic,
            category: String::new(),
            metadata: HashMap::new(),
            embedding: Vec::new(),
            importance: 0.5,
            access_count: 0,
            entities: Vec::new(),
            tags: Vec::new(),
            vector_clock: String::new(),
            created_at: now,
            updated_at: now,
            last_access: now,
            expires_at: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Kind of a knowledge-graph entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Place,
    Thing,
    Concept,
}

/// A knowledge-graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default = "generate_id")]
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: name.into(),
            entity_type,
            properties: HashMap::new(),
            aliases: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A lightweight entity mention carried on memories and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    /// Extraction confidence in `[0, 1]`; the higher-confidence record
    /// wins on replica merge
    #[serde(default)]
    pub confidence: f64,
}

/// A knowledge-graph edge. Indexed from both endpoints, directional in
/// meaning (`source` relates to `target`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default = "generate_id")]
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    /// Edge weight in `[0, 1]`
    #[serde(default)]
    pub strength: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            properties: HashMap::new(),
            strength: 1.0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Point-in-time dump of one user's memories together with the node's
/// vector clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub user_id: String,
    pub memories: Vec<Memory>,
    pub vector_clock: crate::clock::VectorClock,
}

pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
