use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use tokio::sync::{Mutex, Notify};

use crate::{BusError, EventBus, Message, MessageStream, Result};

#[derive(Debug, Default)]
struct GroupCursor {
    /// Next offset to hand out to the group's members.
    delivered: usize,
    /// Offset after the last message the group committed.
    committed: usize,
}

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<Message>,
    groups: HashMap<String, GroupCursor>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    topics: HashMap<String, TopicLog>,
    fail_on_publish: bool,
    unavailable: bool,
    publish_calls: usize,
}

/// In-memory broker for tests and single-process deployments.
///
/// Each topic is an append-only log with a single partition. Every consumer
/// group keeps its own cursor into the log and members of one group compete
/// for messages. A subscription starts at the group's committed offset, so
/// anything handed out but not committed is delivered again.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<InMemoryState>>,
    notify: Arc<Notify>,
}

enum Poll {
    Ready(Message),
    Empty,
    Unavailable,
}

impl InMemoryEventBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent publishes fail with a delivery error.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Simulates a broker outage. Publishes and new subscriptions fail and
    /// open streams report an error and end.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
        self.notify.notify_waiters();
    }

    /// Returns every message ever published to `topic`.
    pub async fn published(&self, topic: &str) -> Vec<Message> {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Returns how many publish attempts were made, failed ones included.
    pub async fn publish_calls(&self) -> usize {
        self.state.lock().await.publish_calls
    }

    /// Offset after the last message `group` committed on `topic`.
    pub async fn committed(&self, topic: &str, group: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map_or(0, |cursor| cursor.committed)
    }

    /// Rewinds a group so the last `count` delivered messages are seen
    /// again, as after a consumer-group rebalance.
    pub async fn redeliver(&self, topic: &str, group: &str, count: usize) {
        let mut state = self.state.lock().await;
        if let Some(cursor) = state
            .topics
            .get_mut(topic)
            .and_then(|log| log.groups.get_mut(group))
        {
            cursor.delivered = cursor.delivered.saturating_sub(count);
            cursor.committed = cursor.committed.min(cursor.delivered);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    async fn poll(&self, topic: &str, group: &str) -> Poll {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Poll::Unavailable;
        }

        let Some(log) = state.topics.get_mut(topic) else {
            return Poll::Empty;
        };
        let cursor = log.groups.entry(group.to_string()).or_default();
        match log.messages.get(cursor.delivered) {
            Some(message) => {
                cursor.delivered += 1;
                Poll::Ready(message.clone())
            }
            None => Poll::Empty,
        }
    }

    /// Waits for the next message for `group`, or fails if the broker is down.
    async fn next_message(&self, topic: &str, group: &str) -> Result<Message> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.poll(topic, group).await {
                Poll::Ready(message) => return Ok(message),
                Poll::Unavailable => {
                    return Err(BusError::Unavailable(format!(
                        "in-memory broker is down (topic '{topic}')"
                    )));
                }
                Poll::Empty => notified.await,
            }
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.publish_calls += 1;

        if state.unavailable {
            return Err(BusError::Unavailable(
                "in-memory broker is down".to_string(),
            ));
        }
        if state.fail_on_publish {
            return Err(BusError::Delivery {
                topic: topic.to_string(),
                reason: "simulated publish failure".to_string(),
            });
        }

        let log = state.topics.entry(topic.to_string()).or_default();
        let offset = log.messages.len() as i64;
        log.messages.push(Message {
            topic: topic.to_string(),
            key: Some(key.to_string()),
            payload: payload.to_vec(),
            partition: 0,
            offset,
            timestamp: Utc::now(),
        });
        drop(state);

        tracing::debug!(topic, key, offset, "message published");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<MessageStream> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(BusError::Subscribe {
                topic: topic.to_string(),
                reason: "in-memory broker is down".to_string(),
            });
        }

        // Joining rebalances the group: delivery restarts at the committed offset.
        let log = state.topics.entry(topic.to_string()).or_default();
        let cursor = log.groups.entry(group.to_string()).or_default();
        cursor.delivered = cursor.committed;
        drop(state);

        tracing::debug!(topic, group, "subscribed");
        let seed = (self.clone(), topic.to_string(), group.to_string(), false);
        let stream = stream::unfold(seed, |(bus, topic, group, failed)| async move {
            if failed {
                return None;
            }
            let item = bus.next_message(&topic, &group).await;
            let failed = item.is_err();
            Some((item, (bus, topic, group, failed)))
        });

        Ok(Box::pin(stream))
    }

    async fn commit(&self, group: &str, message: &Message) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(BusError::Unavailable(
                "in-memory broker is down".to_string(),
            ));
        }

        let next = usize::try_from(message.offset + 1).map_err(|_| BusError::Commit {
            topic: message.topic.clone(),
            group: group.to_string(),
            reason: format!("invalid offset {}", message.offset),
        })?;
        let log = state.topics.entry(message.topic.clone()).or_default();
        let cursor = log.groups.entry(group.to_string()).or_default();
        cursor.committed = cursor.committed.max(next);
        Ok(())
    }
}
