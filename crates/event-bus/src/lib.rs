//! Publish/subscribe facade over a message broker.
//!
//! Delivery is at-least-once and ordered only within a key. Consumers in
//! the same group share one offset per topic, so each message reaches one
//! member of the group.
//!
//! The in-memory bus is always available; the Kafka adapter is compiled in
//! with the `kafka` feature.

pub mod bus;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

pub use bus::{EventBus, EventBusExt, Message, MessageStream};
pub use error::{BusError, Result};
#[cfg(feature = "kafka")]
pub use kafka::KafkaEventBus;
pub use memory::InMemoryEventBus;
