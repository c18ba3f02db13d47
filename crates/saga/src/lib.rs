//! Order-fulfillment saga.
//!
//! The saga spans three consistency domains: a synchronous stock check
//! against the catalog service, a local transaction in the order store and
//! an at-least-once message bus.
//!
//! 1. [`OrderIntakeCoordinator`] checks stock, commits the order together
//!    with an outbox row and publishes `orderCreated`.
//! 2. [`StockEventConsumer`] applies `stockEvent` outcomes through the
//!    [`OrderStatusUpdater`] and republishes the order on `orderEvent`.
//! 3. [`OutboxRelay`] retries creation events that could not be published.

pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod relay;
pub mod services;
pub mod updater;

pub use consumer::{ConsumerConfig, StockEvent, StockEventConsumer, StockEventOutcome};
pub use coordinator::{IntakeConfig, OrderIntakeCoordinator, OrderLine};
pub use error::{Result, SagaError};
pub use relay::{OutboxRelay, RelayConfig};
pub use services::{
    HttpInventoryClient, InMemoryInventoryClient, InventoryClient, InventoryError, ProductInfo,
};
pub use updater::{OrderStatusUpdater, Transition};
