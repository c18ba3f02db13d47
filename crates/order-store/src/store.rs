use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use common::{OrderId, UserId, topics};
use domain::{NewOrder, Order, OrderStatus, PaymentStatus};

use crate::{OutboxId, OutboxMessage, Result};

/// Outcome of a committed order creation.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    /// The order exactly as it was committed.
    pub order: Order,
    /// The `orderCreated` outbox row written in the same transaction.
    pub outbox_id: OutboxId,
}

/// Core trait for order persistence.
///
/// The store is the durable source of truth for order status. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts an order, all of its items and an `orderCreated` outbox row.
    ///
    /// The write is atomic: if any insert fails nothing is visible.
    /// Returns the committed order with its assigned ids.
    async fn create_order(&self, order: NewOrder) -> Result<CreatedOrder>;

    /// Loads an order with its items, or `None` if it does not exist.
    ///
    /// A stored order without items is reported as an integrity error.
    async fn get_order_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// Sets the order status if the stored status still equals `expected`.
    ///
    /// Fails with `StatusConflict` when another writer got there first and
    /// with `NotFound` when the order does not exist.
    async fn update_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<()>;

    /// Sets the payment status if the stored one still equals `expected`.
    async fn update_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<()>;

    /// Deletes an order and its items.
    async fn delete_order(&self, id: OrderId) -> Result<()>;

    /// Lists a user's orders, oldest first, with items.
    async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>>;

    /// Returns up to `limit` undelivered outbox messages, oldest first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// Marks an outbox message as delivered. Marking twice is harmless.
    async fn mark_outbox_delivered(&self, id: OutboxId) -> Result<()>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for std::sync::Arc<T> {
    async fn create_order(&self, order: NewOrder) -> Result<CreatedOrder> {
        (**self).create_order(order).await
    }

    async fn get_order_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get_order_by_id(id).await
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<()> {
        (**self).update_order_status(id, expected, next).await
    }

    async fn update_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<()> {
        (**self).update_payment_status(id, expected, next).await
    }

    async fn delete_order(&self, id: OrderId) -> Result<()> {
        (**self).delete_order(id).await
    }

    async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> {
        (**self).list_orders(user_id).await
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        (**self).pending_outbox(limit).await
    }

    async fn mark_outbox_delivered(&self, id: OutboxId) -> Result<()> {
        (**self).mark_outbox_delivered(id).await
    }
}

/// Current time at the precision the database keeps.
pub(crate) fn store_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Builds the `orderCreated` outbox row for a freshly committed order.
pub(crate) fn order_created_message(order: &Order) -> Result<OutboxMessage> {
    Ok(OutboxMessage::new(
        topics::ORDER_CREATED,
        order.id.to_string(),
        serde_json::to_value(order)?,
        order.created_at,
    ))
}
