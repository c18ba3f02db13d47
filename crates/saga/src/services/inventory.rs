//! Inventory client trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ProductId;
use domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Catalog data the saga needs for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub stock: i64,
    pub price: Money,
}

/// Errors returned by an inventory client.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Inventory service unavailable: {0}")]
    Unavailable(String),

    #[error("Inventory call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid inventory response: {0}")]
    InvalidResponse(String),
}

/// Synchronous lookup of stock and price in the catalog service.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn get_product(&self, product_id: &ProductId) -> Result<ProductInfo, InventoryError>;
}

#[async_trait]
impl<T: InventoryClient + ?Sized> InventoryClient for Arc<T> {
    async fn get_product(&self, product_id: &ProductId) -> Result<ProductInfo, InventoryError> {
        (**self).get_product(product_id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    products: HashMap<ProductId, ProductInfo>,
    calls: usize,
    unavailable: bool,
    delay: Option<Duration>,
}

/// In-memory inventory client for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryClient {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryClient {
    /// Creates a new client with an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub async fn set_product(&self, product_id: impl Into<ProductId>, stock: i64, price: Money) {
        self.state
            .write()
            .await
            .products
            .insert(product_id.into(), ProductInfo { stock, price });
    }

    /// Makes every lookup fail as if the service were unreachable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Delays every lookup, to exercise caller-side timeouts.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().await.delay = delay;
    }

    /// Returns the number of lookups made so far.
    pub async fn calls(&self) -> usize {
        self.state.read().await.calls
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventoryClient {
    async fn get_product(&self, product_id: &ProductId) -> Result<ProductInfo, InventoryError> {
        let delay = {
            let mut state = self.state.write().await;
            state.calls += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.read().await;
        if state.unavailable {
            return Err(InventoryError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        state
            .products
            .get(product_id)
            .copied()
            .ok_or_else(|| InventoryError::ProductNotFound(product_id.clone()))
    }
}
