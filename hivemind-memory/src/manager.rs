//! Node-local entry point for replicated memory.
//!
//! Every write increments this node's vector clock, lands in the local
//! store, is appended to the event log, and is published to the broker
//! under one exclusive lock, so the emitted event always carries the
//! clock of its own write. Publish failure surfaces after the local
//! commit; the event log is the recovery mechanism.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::broker::{
    MessageBroker, HEADER_MEMORY_ID, HEADER_NODE_ID, HEADER_SYNC_REQUEST, HEADER_USER_ID,
    TOPIC_MEMORY_EVENTS,
};
use crate::clock::VectorClock;
use crate::error::MemoryError;
use crate::event::{MemoryEvent, MemoryEventType};
use crate::event_log::EventLog;
use crate::resolver::CrdtResolver;
use crate::store::InMemoryStore;
use crate::types::{generate_id, Memory, MemorySnapshot};

const DEFAULT_SUBSCRIBER_DEPTH: usize = 256;

/// Replicated memory manager for one node.
pub struct DistributedMemoryManager {
    node_id: String,
    clock: Mutex<VectorClock>,
    store: Arc<InMemoryStore>,
    log: Arc<dyn EventLog>,
    broker: Arc<dyn MessageBroker>,
    resolver: CrdtResolver,
    subscribers: std::sync::Mutex<Vec<mpsc::Sender<MemoryEvent>>>,
    subscriber_depth: usize,
}

impl DistributedMemoryManager {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<InMemoryStore>,
        log: Arc<dyn EventLog>,
        broker: Arc<dyn MessageBroker>,
        resolver: CrdtResolver,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            clock: Mutex::new(VectorClock::new()),
            store,
            log,
            broker,
            resolver,
            subscribers: std::sync::Mutex::new(Vec::new()),
            subscriber_depth: DEFAULT_SUBSCRIBER_DEPTH,
        }
    }

    pub fn with_subscriber_depth(mut self, depth: usize) -> Self {
        self.subscriber_depth = depth.max(1);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    pub async fn vector_clock(&self) -> VectorClock {
        self.clock.lock().await.clone()
    }

    /// Store a new memory and replicate it.
    ///
    /// The local write commits before the broker publish; a
    /// [`MemoryError::PublishFailed`] therefore means "committed here,
    /// not announced" and the caller decides whether to compensate.
    pub async fn add_memory(&self, mut memory: Memory) -> Result<Memory, MemoryError> {
        let mut clock = self.clock.lock().await;
        clock.increment(&self.node_id);
        memory.vector_clock = clock.to_json();

        let stored = self.store.add_memory(memory)?;
        let event = MemoryEvent::for_memory(
            MemoryEventType::MemoryCreated,
            &self.node_id,
            &stored,
            &clock,
        );
        self.commit_event(event).await?;
        Ok(stored)
    }

    /// Replace an existing memory and replicate the update.
    pub async fn update_memory(&self, mut memory: Memory) -> Result<Memory, MemoryError> {
        let mut clock = self.clock.lock().await;
        clock.increment(&self.node_id);
        memory.updated_at = chrono::Utc::now();
        memory.vector_clock = clock.to_json();

        self.store.update_memory(memory.clone())?;
        let event = MemoryEvent::for_memory(
            MemoryEventType::MemoryUpdated,
            &self.node_id,
            &memory,
            &clock,
        );
        self.commit_event(event).await?;
        Ok(memory)
    }

    /// Delete a memory and replicate the tombstone.
    pub async fn delete_memory(&self, memory_id: &str) -> Result<(), MemoryError> {
        let mut clock = self.clock.lock().await;
        let removed = self.store.delete_memory(memory_id)?;
        clock.increment(&self.node_id);

        let event = MemoryEvent::for_memory(
            MemoryEventType::MemoryDeleted,
            &self.node_id,
            &removed,
            &clock,
        );
        self.commit_event(event).await
    }

    /// Append, publish, and notify for an event produced by this node.
    /// Caller holds the clock lock so the event's clock stays
    /// consistent with the write it describes.
    async fn commit_event(&self, event: MemoryEvent) -> Result<(), MemoryError> {
        self.log.append(event.clone()).await?;

        let payload = serde_json::to_vec(&event)?;
        let publish_result = self
            .broker
            .publish(TOPIC_MEMORY_EVENTS, payload, event_headers(&event))
            .await
            .map_err(|e| MemoryError::PublishFailed {
                message: e.to_string(),
            });

        self.notify_subscribers(&event);
        publish_result
    }

    /// Apply an event received from another node.
    ///
    /// Own events are dropped (they were applied at write time), the
    /// remote clock is merged pointwise, and duplicate delivery is
    /// harmless.
    pub async fn apply_remote_event(&self, event: MemoryEvent) -> Result<(), MemoryError> {
        if event.node_id == self.node_id {
            return Ok(());
        }

        let remote_clock = event.parse_clock()?;
        let mut clock = self.clock.lock().await;
        clock.update(&remote_clock);

        match event.event_type {
            MemoryEventType::MemoryCreated
            | MemoryEventType::MemoryUpdated
            | MemoryEventType::MemoryMerged => {
                match self.store.peek_memory(&event.memory_id) {
                    Some(local) => {
                        let merged = self.resolver.resolve(&local, &event);
                        self.store.upsert_memory(merged)?;
                    }
                    None => {
                        self.store.upsert_memory(memory_from_event(&event))?;
                    }
                }
            }
            MemoryEventType::MemoryDeleted => {
                // Idempotent: deleting an absent memory is a no-op.
                self.store.remove_memory(&event.memory_id);
            }
            MemoryEventType::SyncRequest => {
                debug!(
                    node = %event.node_id,
                    "peer requested sync; responder runs outside the manager"
                );
            }
            other => {
                debug!(event_type = other.as_str(), "ignoring unhandled event type");
            }
        }

        drop(clock);
        self.notify_subscribers(&event);
        Ok(())
    }

    /// Deserialize a broker payload and apply it.
    pub async fn apply_remote_payload(&self, payload: &[u8]) -> Result<(), MemoryError> {
        let event: MemoryEvent = serde_json::from_slice(payload)?;
        self.apply_remote_event(event).await
    }

    /// Observe every event this node produces or applies. The channel
    /// is bounded; a slow subscriber loses events rather than blocking
    /// writes.
    pub fn subscribe(&self) -> ReceiverStream<MemoryEvent> {
        let (sender, receiver) = mpsc::channel(self.subscriber_depth);
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sender);
        ReceiverStream::new(receiver)
    }

    fn notify_subscribers(&self, event: &MemoryEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event_id = %event.event_id, "subscriber buffer full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Point-in-time dump of one user's memories plus this node's
    /// current clock.
    pub async fn snapshot(&self, user_id: &str) -> MemorySnapshot {
        let clock = self.clock.lock().await.clone();
        let memories = self
            .store
            .get_by_user(user_id, &crate::store::ListOptions::default());
        MemorySnapshot {
            id: generate_id(),
            timestamp: chrono::Utc::now(),
            node_id: self.node_id.clone(),
            user_id: user_id.to_string(),
            memories,
            vector_clock: clock,
        }
    }

    /// Ask peers to replay anything missing relative to our clock.
    pub async fn force_sync(&self) -> Result<(), MemoryError> {
        let clock = self.clock.lock().await;
        let event = MemoryEvent::sync_request(&self.node_id, &clock);

        let payload = serde_json::to_vec(&event)?;
        let mut headers = event_headers(&event);
        headers.insert(HEADER_SYNC_REQUEST.to_string(), "true".to_string());

        self.broker
            .publish(TOPIC_MEMORY_EVENTS, payload, headers)
            .await
            .map_err(|e| MemoryError::PublishFailed {
                message: e.to_string(),
            })
    }
}

fn event_headers(event: &MemoryEvent) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert(HEADER_NODE_ID.to_string(), event.node_id.clone());
    headers.insert(HEADER_MEMORY_ID.to_string(), event.memory_id.clone());
    headers.insert(HEADER_USER_ID.to_string(), event.user_id.clone());
    headers
}

/// Materialize a memory this node has never seen from its event.
fn memory_from_event(event: &MemoryEvent) -> Memory {
    Memory {
        id: event.memory_id.clone(),
        user_id: event.user_id.clone(),
        session_id: event.session_id.clone(),
        content: event.content.clone(),
        summary: None,
        memory_type: Default::default(),
        category: String::new(),
        metadata: event.metadata.clone(),
        embedding: event.embedding.clone(),
        importance: event.importance,
        access_count: 0,
        entities: event.entities.clone(),
        tags: event.tags.clone(),
        vector_clock: event.vector_clock.clone(),
        created_at: event.timestamp,
        updated_at: event.timestamp,
        last_access: event.timestamp,
        expires_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessBroker;
    use crate::event_log::InMemoryEventLog;
    use crate::resolver::MergeStrategy;
    use async_trait::async_trait;
    use tokio_stream::StreamExt;

    fn manager_with(broker: Arc<dyn MessageBroker>) -> DistributedMemoryManager {
        DistributedMemoryManager::new(
            "node-a",
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryEventLog::new()),
            broker,
            CrdtResolver::new(MergeStrategy::LastWriteWins),
        )
    }

    fn manager() -> DistributedMemoryManager {
        manager_with(Arc::new(InProcessBroker::new()))
    }

    struct FailingBroker;

    #[async_trait]
    impl MessageBroker for FailingBroker {
        async fn publish(
            &self,
            _topic: &str,
            _payload: Vec<u8>,
            _headers: HashMap<String, String>,
        ) -> Result<(), MemoryError> {
            Err(MemoryError::Broker {
                message: "broker down".to_string(),
            })
        }

        async fn subscribe(&self, _topic: &str) -> Result<crate::broker::BrokerStream, MemoryError> {
            Err(MemoryError::Broker {
                message: "broker down".to_string(),
            })
        }

        async fn health_check(&self) -> Result<(), MemoryError> {
            Err(MemoryError::Broker {
                message: "broker down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn add_increments_clock_and_publishes() {
        let broker = Arc::new(InProcessBroker::new());
        let mut subscription = broker.subscribe(TOPIC_MEMORY_EVENTS).await.unwrap();
        let manager = manager_with(broker);

        let stored = manager
            .add_memory(Memory::new("user-1", "hello"))
            .await
            .unwrap();

        assert_eq!(manager.vector_clock().await.get("node-a"), 1);
        assert!(manager.store().contains_memory(&stored.id));

        let message = subscription.next().await.unwrap().unwrap();
        let event: MemoryEvent = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(event.event_type, MemoryEventType::MemoryCreated);
        assert_eq!(event.memory_id, stored.id);
        assert_eq!(event.parse_clock().unwrap().get("node-a"), 1);
        assert_eq!(message.headers.get(HEADER_NODE_ID).unwrap(), "node-a");
        assert_eq!(message.headers.get(HEADER_USER_ID).unwrap(), "user-1");
    }

    #[tokio::test]
    async fn publish_failure_leaves_local_state_committed() {
        let manager = manager_with(Arc::new(FailingBroker));

        let result = manager.add_memory(Memory::new("user-1", "kept")).await;
        assert!(matches!(result, Err(MemoryError::PublishFailed { .. })));

        // The write committed and the log has the event for recovery.
        let memories = manager
            .store()
            .get_by_user("user-1", &crate::store::ListOptions::default());
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "kept");
    }

    #[tokio::test]
    async fn own_events_are_dropped() {
        let manager = manager();
        let stored = manager
            .add_memory(Memory::new("user-1", "original"))
            .await
            .unwrap();

        let clock = manager.vector_clock().await;
        let mut replay = MemoryEvent::for_memory(
            MemoryEventType::MemoryUpdated,
            "node-a",
            &Memory::new("user-1", "should not apply"),
            &clock,
        );
        replay.memory_id = stored.id.clone();

        manager.apply_remote_event(replay).await.unwrap();
        assert_eq!(manager.store().peek_memory(&stored.id).unwrap().content, "original");
    }

    #[tokio::test]
    async fn remote_created_inserts_when_absent() {
        let manager = manager();
        let remote = Memory::new("user-2", "from another node");
        let mut clock = VectorClock::new();
        clock.increment("node-b");
        let event =
            MemoryEvent::for_memory(MemoryEventType::MemoryCreated, "node-b", &remote, &clock);

        manager.apply_remote_event(event).await.unwrap();

        let applied = manager.store().peek_memory(&remote.id).unwrap();
        assert_eq!(applied.content, "from another node");
        // Remote clock merged into ours.
        assert_eq!(manager.vector_clock().await.get("node-b"), 1);
    }

    #[tokio::test]
    async fn remote_update_without_local_is_treated_as_create() {
        let manager = manager();
        let remote = Memory::new("user-2", "upsert me");
        let mut clock = VectorClock::new();
        clock.increment("node-b");
        let event =
            MemoryEvent::for_memory(MemoryEventType::MemoryUpdated, "node-b", &remote, &clock);

        manager.apply_remote_event(event).await.unwrap();
        assert!(manager.store().contains_memory(&remote.id));
    }

    #[tokio::test]
    async fn applying_the_same_event_twice_is_idempotent() {
        let manager = manager();
        let remote = Memory::new("user-2", "once");
        let mut clock = VectorClock::new();
        clock.increment("node-b");
        let event =
            MemoryEvent::for_memory(MemoryEventType::MemoryCreated, "node-b", &remote, &clock);

        manager.apply_remote_event(event.clone()).await.unwrap();
        let first = manager.store().peek_memory(&remote.id).unwrap();

        manager.apply_remote_event(event).await.unwrap();
        let second = manager.store().peek_memory(&remote.id).unwrap();

        assert_eq!(first.content, second.content);
        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(manager.store().memory_count(), 1);
    }

    #[tokio::test]
    async fn remote_delete_is_idempotent() {
        let manager = manager();
        let mut clock = VectorClock::new();
        clock.increment("node-b");
        let ghost = Memory::new("user-2", "never stored");
        let event =
            MemoryEvent::for_memory(MemoryEventType::MemoryDeleted, "node-b", &ghost, &clock);

        // Deleting something we never had succeeds silently.
        manager.apply_remote_event(event).await.unwrap();
        assert_eq!(manager.store().memory_count(), 0);
    }

    #[tokio::test]
    async fn bad_remote_clock_drops_the_event() {
        let manager = manager();
        let remote = Memory::new("user-2", "poisoned");
        let mut event = MemoryEvent::for_memory(
            MemoryEventType::MemoryCreated,
            "node-b",
            &remote,
            &VectorClock::new(),
        );
        event.vector_clock = "not a clock".to_string();

        let result = manager.apply_remote_event(event).await;
        assert!(matches!(result, Err(MemoryError::VectorClockParse { .. })));
        assert!(!manager.store().contains_memory(&remote.id));
    }

    #[tokio::test]
    async fn subscribers_see_local_and_remote_events() {
        let manager = manager();
        let mut events = manager.subscribe();

        manager
            .add_memory(Memory::new("user-1", "local write"))
            .await
            .unwrap();

        let remote = Memory::new("user-2", "remote write");
        let mut clock = VectorClock::new();
        clock.increment("node-b");
        manager
            .apply_remote_event(MemoryEvent::for_memory(
                MemoryEventType::MemoryCreated,
                "node-b",
                &remote,
                &clock,
            ))
            .await
            .unwrap();

        let first = events.next().await.unwrap();
        assert_eq!(first.event_type, MemoryEventType::MemoryCreated);
        assert_eq!(first.node_id, "node-a");
        let second = events.next().await.unwrap();
        assert_eq!(second.node_id, "node-b");
    }

    #[tokio::test]
    async fn snapshot_carries_clock_and_memories() {
        let manager = manager();
        manager.add_memory(Memory::new("user-1", "one")).await.unwrap();
        manager.add_memory(Memory::new("user-1", "two")).await.unwrap();
        manager.add_memory(Memory::new("user-2", "other")).await.unwrap();

        let snapshot = manager.snapshot("user-1").await;
        assert_eq!(snapshot.node_id, "node-a");
        assert_eq!(snapshot.user_id, "user-1");
        assert_eq!(snapshot.memories.len(), 2);
        assert_eq!(snapshot.vector_clock.get("node-a"), 3);
    }

    #[tokio::test]
    async fn force_sync_marks_the_header() {
        let broker = Arc::new(InProcessBroker::new());
        let mut subscription = broker.subscribe(TOPIC_MEMORY_EVENTS).await.unwrap();
        let manager = manager_with(broker);

        manager.force_sync().await.unwrap();

        let message = subscription.next().await.unwrap().unwrap();
        assert_eq!(message.headers.get(HEADER_SYNC_REQUEST).unwrap(), "true");
        let event: MemoryEvent = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(event.event_type, MemoryEventType::SyncRequest);
    }

    #[tokio::test]
    async fn update_and_delete_replicate() {
        let broker = Arc::new(InProcessBroker::new());
        let mut subscription = broker.subscribe(TOPIC_MEMORY_EVENTS).await.unwrap();
        let manager = manager_with(broker);

        let mut stored = manager
            .add_memory(Memory::new("user-1", "v1"))
            .await
            .unwrap();
        stored.content = "v2".to_string();
        manager.update_memory(stored.clone()).await.unwrap();
        manager.delete_memory(&stored.id).await.unwrap();

        assert!(!manager.store().contains_memory(&stored.id));
        assert_eq!(manager.vector_clock().await.get("node-a"), 3);

        let kinds: Vec<MemoryEventType> = [
            subscription.next().await,
            subscription.next().await,
            subscription.next().await,
        ]
        .into_iter()
        .map(|m| {
            let event: MemoryEvent =
                serde_json::from_slice(&m.unwrap().unwrap().payload).unwrap();
            event.event_type
        })
        .collect();

        assert_eq!(
            kinds,
            vec![
                MemoryEventType::MemoryCreated,
                MemoryEventType::MemoryUpdated,
                MemoryEventType::MemoryDeleted,
            ]
        );
    }
}
