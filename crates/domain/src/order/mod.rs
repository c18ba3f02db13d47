//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, NewOrderItem, Order, OrderItem};
pub use state::{OrderStatus, PaymentStatus};
pub use value_objects::Money;

use common::ProductId;
use thiserror::Error;

/// Errors raised while building or validating an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// User ID is required.
    #[error("User ID is required")]
    UserIdRequired,

    /// Order has no items.
    #[error("Order must contain at least one item")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for product {product_id}: {price}")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// Amount that cannot be represented in cents.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid order status: {0}")]
    UnknownOrderStatus(String),

    #[error("Invalid payment status: {0}")]
    UnknownPaymentStatus(String),

    /// Stored total does not match the sum of the stored items.
    #[error("Order total {actual} does not match item total {expected}")]
    TotalMismatch { expected: Money, actual: Money },
}
