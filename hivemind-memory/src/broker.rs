//! Message broker contract and an in-process reference implementation.
//!
//! The real deployment hangs this off NATS or similar; the subsystem
//! only relies on publish, subscribe, and a health probe. Delivery is
//! at-least-once: duplicate events are tolerated downstream.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::MemoryError;

/// Topic carrying serialized [`crate::event::MemoryEvent`]s.
pub const TOPIC_MEMORY_EVENTS: &str = "memory.events";
/// Reserved for future snapshot shipping.
pub const TOPIC_MEMORY_SNAPSHOTS: &str = "memory.snapshots";
/// Reserved for future conflict reporting.
pub const TOPIC_MEMORY_CONFLICTS: &str = "memory.conflicts";

pub const HEADER_NODE_ID: &str = "node_id";
pub const HEADER_MEMORY_ID: &str = "memory_id";
pub const HEADER_USER_ID: &str = "user_id";
/// Set to `"true"` on force-sync events for broker-side routing.
pub const HEADER_SYNC_REQUEST: &str = "sync_request";

/// A message as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

/// Stream of messages for one topic subscription.
pub type BrokerStream =
    std::pin::Pin<Box<dyn futures::Stream<Item = Result<BrokerMessage, MemoryError>> + Send>>;

/// Minimal broker contract the memory subsystem depends on.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<(), MemoryError>;

    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, MemoryError>;

    async fn health_check(&self) -> Result<(), MemoryError>;
}

/// In-process broker over tokio broadcast channels. Reference
/// implementation for tests and single-process deployments.
pub struct InProcessBroker {
    topics: DashMap<String, broadcast::Sender<BrokerMessage>>,
    capacity: usize,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BrokerMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InProcessBroker {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<(), MemoryError> {
        let message = BrokerMessage {
            topic: topic.to_string(),
            payload,
            headers,
        };
        // A send error only means no subscriber is listening yet, which
        // matches broker semantics for a topic with no consumers.
        let _ = self.sender(topic).send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, MemoryError> {
        let receiver = self.sender(topic).subscribe();
        let stream = BroadcastStream::new(receiver).map(|item| match item {
            Ok(message) => Ok(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Err(MemoryError::Broker {
                message: format!("subscriber lagged, {skipped} messages dropped"),
            }),
        });
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber_with_headers() {
        let broker = InProcessBroker::new();
        let mut stream = broker.subscribe(TOPIC_MEMORY_EVENTS).await.unwrap();

        let mut headers = HashMap::new();
        headers.insert(HEADER_NODE_ID.to_string(), "node-a".to_string());
        broker
            .publish(TOPIC_MEMORY_EVENTS, b"payload".to_vec(), headers)
            .await
            .unwrap();

        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.topic, TOPIC_MEMORY_EVENTS);
        assert_eq!(message.payload, b"payload");
        assert_eq!(message.headers.get(HEADER_NODE_ID).unwrap(), "node-a");
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let broker = InProcessBroker::new();
        broker
            .publish(TOPIC_MEMORY_EVENTS, b"dropped".to_vec(), HashMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = InProcessBroker::new();
        let mut events = broker.subscribe(TOPIC_MEMORY_EVENTS).await.unwrap();
        let mut snapshots = broker.subscribe(TOPIC_MEMORY_SNAPSHOTS).await.unwrap();

        broker
            .publish(TOPIC_MEMORY_SNAPSHOTS, b"snap".to_vec(), HashMap::new())
            .await
            .unwrap();

        let message = snapshots.next().await.unwrap().unwrap();
        assert_eq!(message.payload, b"snap");

        broker
            .publish(TOPIC_MEMORY_EVENTS, b"evt".to_vec(), HashMap::new())
            .await
            .unwrap();
        let message = events.next().await.unwrap().unwrap();
        assert_eq!(message.payload, b"evt");
    }
}
