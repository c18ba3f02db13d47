use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use rdkafka::Message as _;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::Mutex;

use crate::{BusError, EventBus, Message, MessageStream, Result};

/// Kafka-compatible broker adapter (Kafka, Redpanda).
///
/// Publishes wait for the broker acknowledgement. Consumers start from the
/// earliest offset when a group is new. Offsets are stored only through
/// [`EventBus::commit`] and flushed by the background auto-commit, so a
/// message is never committed before it has been handled.
pub struct KafkaEventBus {
    brokers: String,
    producer: FutureProducer,
    send_timeout: Duration,
    /// Live consumers by (topic, group), used to store committed offsets.
    consumers: Mutex<HashMap<(String, String), Arc<StreamConsumer>>>,
}

impl KafkaEventBus {
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            brokers: brokers.to_string(),
            producer,
            send_timeout: Duration::from_secs(5),
            consumers: Mutex::new(HashMap::new()),
        })
    }

    fn to_message(message: &BorrowedMessage<'_>) -> Message {
        let timestamp = message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Message {
            topic: message.topic().to_string(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition: message.partition(),
            offset: message.offset(),
            timestamp,
        }
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| BusError::Delivery {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(topic, key, "published to kafka");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<MessageStream> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        let consumer = Arc::new(consumer);

        consumer
            .subscribe(&[topic])
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        self.consumers
            .lock()
            .await
            .insert((topic.to_string(), group.to_string()), Arc::clone(&consumer));

        tracing::info!(topic, group, "subscribed to kafka");
        let stream = stream::unfold(consumer, |consumer| async move {
            let item = match consumer.recv().await {
                Ok(message) => Ok(Self::to_message(&message)),
                Err(e) => Err(BusError::Unavailable(e.to_string())),
            };
            Some((item, consumer))
        });

        Ok(Box::pin(stream))
    }

    async fn commit(&self, group: &str, message: &Message) -> Result<()> {
        let commit_error = |reason: String| BusError::Commit {
            topic: message.topic.clone(),
            group: group.to_string(),
            reason,
        };

        let consumer = self
            .consumers
            .lock()
            .await
            .get(&(message.topic.clone(), group.to_string()))
            .cloned()
            .ok_or_else(|| commit_error("no active subscription".to_string()))?;

        // The stored offset is the next one to read.
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| commit_error(e.to_string()))?;
        consumer
            .store_offsets(&offsets)
            .map_err(|e| commit_error(e.to_string()))?;

        tracing::trace!(topic = %message.topic, group, offset = message.offset, "offset stored");
        Ok(())
    }
}
