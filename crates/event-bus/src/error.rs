use thiserror::Error;

/// Errors raised by event bus implementations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker did not acknowledge a published message.
    #[error("Delivery to '{topic}' failed: {reason}")]
    Delivery { topic: String, reason: String },

    /// Subscribing to a topic failed.
    #[error("Subscription to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// A consumed position could not be recorded.
    #[error("Commit for group '{group}' on '{topic}' failed: {reason}")]
    Commit {
        topic: String,
        group: String,
        reason: String,
    },

    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Convenience type alias for event bus results.
pub type Result<T> = std::result::Result<T, BusError>;
