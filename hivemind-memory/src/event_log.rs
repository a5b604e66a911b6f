//! Append-only event log contract and the in-memory reference backend.
//!
//! The local store is a materialized view of this log; replaying it in
//! Lamport-version order (ties broken by event id) rebuilds the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;

use crate::error::MemoryError;
use crate::event::MemoryEvent;

/// Durable record of every memory event this node has produced or
/// applied. Backend choice is deployment-specific.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: MemoryEvent) -> Result<(), MemoryError>;

    /// Events touching one memory, in append order.
    async fn events_for_memory(&self, memory_id: &str) -> Result<Vec<MemoryEvent>, MemoryError>;

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<MemoryEvent>, MemoryError>;

    async fn events_for_user(&self, user_id: &str) -> Result<Vec<MemoryEvent>, MemoryError>;

    async fn events_from_node(&self, node_id: &str) -> Result<Vec<MemoryEvent>, MemoryError>;
}

/// Reference backend: an append-only vector under a reader/writer lock.
#[derive(Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<MemoryEvent>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full log ordered by Lamport version, ties broken by event id.
    /// This is the replay order for rebuilding a store.
    pub fn replay_order(&self) -> Vec<MemoryEvent> {
        let mut events = self.read().clone();
        events.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        events
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<MemoryEvent>> {
        self.events.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn collect<F>(&self, predicate: F) -> Vec<MemoryEvent>
    where
        F: Fn(&MemoryEvent) -> bool,
    {
        self.read().iter().filter(|e| predicate(e)).cloned().collect()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: MemoryEvent) -> Result<(), MemoryError> {
        self.events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }

    async fn events_for_memory(&self, memory_id: &str) -> Result<Vec<MemoryEvent>, MemoryError> {
        Ok(self.collect(|e| e.memory_id == memory_id))
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<MemoryEvent>, MemoryError> {
        Ok(self.collect(|e| e.timestamp >= since))
    }

    async fn events_for_user(&self, user_id: &str) -> Result<Vec<MemoryEvent>, MemoryError> {
        Ok(self.collect(|e| e.user_id == user_id))
    }

    async fn events_from_node(&self, node_id: &str) -> Result<Vec<MemoryEvent>, MemoryError> {
        Ok(self.collect(|e| e.node_id == node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use crate::event::MemoryEventType;
    use crate::types::Memory;

    fn event_for(node: &str, user: &str, content: &str) -> MemoryEvent {
        let memory = Memory::new(user, content);
        let mut clock = VectorClock::new();
        clock.increment(node);
        MemoryEvent::for_memory(MemoryEventType::MemoryCreated, node, &memory, &clock)
    }

    #[tokio::test]
    async fn append_and_filter() {
        let log = InMemoryEventLog::new();
        log.append(event_for("node-a", "user-1", "first")).await.unwrap();
        log.append(event_for("node-b", "user-1", "second")).await.unwrap();
        log.append(event_for("node-a", "user-2", "third")).await.unwrap();

        assert_eq!(log.len(), 3);
        assert_eq!(log.events_for_user("user-1").await.unwrap().len(), 2);
        assert_eq!(log.events_from_node("node-a").await.unwrap().len(), 2);

        let all = log.events_since(Utc::now() - chrono::Duration::minutes(1)).await.unwrap();
        assert_eq!(all.len(), 3);
        let none = log.events_since(Utc::now() + chrono::Duration::minutes(1)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn events_for_memory_tracks_one_id() {
        let log = InMemoryEventLog::new();
        let event = event_for("node-a", "user-1", "tracked");
        let memory_id = event.memory_id.clone();
        log.append(event).await.unwrap();
        log.append(event_for("node-a", "user-1", "other")).await.unwrap();

        let events = log.events_for_memory(&memory_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].memory_id, memory_id);
    }

    #[tokio::test]
    async fn replay_order_sorts_by_version_then_id() {
        let log = InMemoryEventLog::new();
        let mut first = event_for("node-a", "user-1", "a");
        first.version = 20;
        first.event_id = "b".to_string();
        let mut second = event_for("node-a", "user-1", "b");
        second.version = 10;
        let mut third = event_for("node-a", "user-1", "c");
        third.version = 20;
        third.event_id = "a".to_string();

        log.append(first).await.unwrap();
        log.append(second).await.unwrap();
        log.append(third).await.unwrap();

        let ordered = log.replay_order();
        assert_eq!(ordered[0].version, 10);
        assert_eq!(ordered[1].event_id, "a");
        assert_eq!(ordered[2].event_id, "b");
    }
}
