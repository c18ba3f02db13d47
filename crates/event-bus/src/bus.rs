use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Serialize, de::DeserializeOwned};

use crate::Result;

/// A message as received from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    /// Partitioning key. Messages with the same key are delivered in order.
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub partition: i32,
    /// Position of the message within its partition.
    pub offset: i64,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Decodes the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

/// An infinite sequence of messages for one subscription.
///
/// An `Err` item reports a broker problem; the stream may end after it and
/// the caller is expected to subscribe again.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Core trait for publish/subscribe messaging.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a message and waits for the broker acknowledgement.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;

    /// Joins `group` on `topic` and returns the group's message stream.
    ///
    /// Consumption resumes from the group's committed position, so messages
    /// that were delivered but never committed are delivered again.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<MessageStream>;

    /// Records that `group` has finished with `message`.
    ///
    /// Call only once the message has been fully handled.
    async fn commit(&self, group: &str, message: &Message) -> Result<()>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        (**self).publish(topic, key, payload).await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<MessageStream> {
        (**self).subscribe(topic, group).await
    }

    async fn commit(&self, group: &str, message: &Message) -> Result<()> {
        (**self).commit(group, message).await
    }
}

/// JSON helpers available on every [`EventBus`].
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serializes `value` as JSON and publishes it under `key`.
    async fn publish_json<T>(&self, topic: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized;
}

#[async_trait]
impl<B: EventBus + ?Sized> EventBusExt for B {
    async fn publish_json<T>(&self, topic: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;
        match self.publish(topic, key, &payload).await {
            Ok(()) => {
                metrics::counter!("events_published_total", "topic" => topic.to_string())
                    .increment(1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!("event_publish_failures_total", "topic" => topic.to_string())
                    .increment(1);
                Err(e)
            }
        }
    }
}
