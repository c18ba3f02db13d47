//! Clients for services the saga depends on.

pub mod http;
pub mod inventory;

pub use http::HttpInventoryClient;
pub use inventory::{InMemoryInventoryClient, InventoryClient, InventoryError, ProductInfo};
