//! Message bus topic names shared between the order, inventory and
//! notification services.

/// Stock outcomes produced by the inventory service.
pub const STOCK_EVENT: &str = "stockEvent";

/// Full order snapshots republished after a status change.
pub const ORDER_EVENT: &str = "orderEvent";

/// Order snapshots published once an order has been committed.
pub const ORDER_CREATED: &str = "orderCreated";
