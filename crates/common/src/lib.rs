//! Shared identifiers and topic names for the order fulfillment services.

pub mod topics;
pub mod types;

pub use types::{OrderId, ProductId, UserId};
