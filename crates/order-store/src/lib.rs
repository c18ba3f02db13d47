//! Transactional persistence for orders and their line items.
//!
//! Every order is written together with its items and an `orderCreated`
//! outbox row in a single transaction, so readers never observe a partial
//! order and the creation event can be relayed even if the first publish
//! attempt fails.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use outbox::{OutboxId, OutboxMessage};
pub use postgres::PostgresOrderStore;
pub use store::{CreatedOrder, OrderStore};
