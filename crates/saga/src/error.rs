//! Saga error types.

use common::{OrderId, ProductId};
use domain::OrderError;
use event_bus::BusError;
use order_store::StoreError;
use thiserror::Error;

use crate::services::InventoryError;

/// Errors that can occur while creating or advancing an order.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request was rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The inventory service could not answer for a product.
    #[error("Inventory lookup for product {product_id} failed: {source}")]
    Dependency {
        product_id: ProductId,
        #[source]
        source: InventoryError,
    },

    /// A product does not have enough stock for the requested quantity.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: u64,
    },

    /// The order store failed.
    #[error("Storage error: {0}")]
    Storage(StoreError),

    /// The requested status change is not allowed from the current status.
    #[error("Invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: String,
        to: String,
    },

    /// Publishing an event failed.
    #[error("Delivery error: {0}")]
    Delivery(#[from] BusError),

    /// Order not found.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order was committed but its `orderCreated` event was not
    /// delivered. The outbox relay will retry the delivery.
    #[error("Order {order_id} was created but its creation event was not published: {source}")]
    OrderCreatedUnpublished {
        order_id: OrderId,
        #[source]
        source: BusError,
    },
}

impl SagaError {
    /// Short machine-readable name, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::Validation(_) => "validation",
            SagaError::Dependency { .. } => "dependency",
            SagaError::InsufficientStock { .. } => "insufficient_stock",
            SagaError::Storage(_) => "storage",
            SagaError::InvalidTransition { .. } => "invalid_transition",
            SagaError::Delivery(_) => "delivery",
            SagaError::NotFound(_) => "not_found",
            SagaError::OrderCreatedUnpublished { .. } => "unpublished",
        }
    }
}

impl From<StoreError> for SagaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SagaError::NotFound(id),
            other => SagaError::Storage(other),
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(e: OrderError) -> Self {
        SagaError::Validation(e.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: SagaError = StoreError::NotFound(OrderId::new(4)).into();
        assert!(matches!(err, SagaError::NotFound(id) if id == OrderId::new(4)));
    }

    #[test]
    fn test_other_store_errors_map_to_storage() {
        let err: SagaError = StoreError::Unavailable("down".to_string()).into();
        assert!(matches!(err, SagaError::Storage(_)));
    }

    #[test]
    fn test_order_errors_are_validation_errors() {
        let err: SagaError = OrderError::NoItems.into();
        assert!(matches!(err, SagaError::Validation(_)));
    }
}
