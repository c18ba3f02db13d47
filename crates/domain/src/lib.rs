//! Domain layer for the order fulfillment service.
//!
//! This crate provides:
//! - The Order aggregate with its line items and money values
//! - The order status transition table and the payment status machine
//! - Validation of new orders before anything is written

pub mod order;

pub use order::{
    Money, NewOrder, NewOrderItem, Order, OrderError, OrderItem, OrderStatus, PaymentStatus,
};
