use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{NewOrder, Order, OrderStatus, PaymentStatus};
use tokio::sync::RwLock;

use crate::store::{order_created_message, store_timestamp};
use crate::{CreatedOrder, OrderStore, OutboxId, OutboxMessage, Result, StoreError};

#[derive(Debug, Default)]
struct InMemoryState {
    orders: BTreeMap<OrderId, Order>,
    outbox: Vec<OutboxMessage>,
    next_order_id: i64,
    next_item_id: i64,
    fail_on_create: bool,
    fail_on_update: bool,
    create_calls: usize,
}

/// In-memory order store implementation for testing.
///
/// Offers the same transactional guarantees as the PostgreSQL store: a
/// single write lock covers the order, its items and the outbox row.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `create_order` calls fail without writing anything.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Makes subsequent status writes fail without writing anything.
    pub async fn set_fail_on_update(&self, fail: bool) {
        self.state.write().await.fail_on_update = fail;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns how many times `create_order` was called.
    pub async fn create_calls(&self) -> usize {
        self.state.read().await.create_calls
    }

    /// Returns every outbox message, delivered or not.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    /// Overwrites the stored order status without any checks.
    pub async fn force_status(&self, id: OrderId, status: OrderStatus) {
        if let Some(order) = self.state.write().await.orders.get_mut(&id) {
            order.order_status = status;
        }
    }

    /// Removes every item of a stored order, leaving an invalid row behind.
    pub async fn corrupt_items(&self, id: OrderId) {
        if let Some(order) = self.state.write().await.orders.get_mut(&id) {
            order.items.clear();
        }
    }
}

fn checked(order: &Order) -> Result<Order> {
    order
        .check_integrity()
        .map_err(|source| StoreError::Integrity {
            order_id: order.id,
            source,
        })?;
    Ok(order.clone())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<CreatedOrder> {
        let mut state = self.state.write().await;
        state.create_calls += 1;

        if state.fail_on_create {
            return Err(StoreError::Unavailable(
                "order insert rejected".to_string(),
            ));
        }

        let order_id = OrderId::new(state.next_order_id + 1);
        let item_ids: Vec<i64> = (1..=order.items().len() as i64)
            .map(|offset| state.next_item_id + offset)
            .collect();
        let order = order.into_order(order_id, &item_ids, store_timestamp());
        let message = order_created_message(&order)?;
        let outbox_id = message.id;

        // Nothing is mutated until every fallible step has succeeded.
        state.next_order_id = order_id.as_i64();
        state.next_item_id += item_ids.len() as i64;
        state.orders.insert(order_id, order.clone());
        state.outbox.push(message);

        Ok(CreatedOrder { order, outbox_id })
    }

    async fn get_order_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        state.orders.get(&id).map(checked).transpose()
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_update {
            return Err(StoreError::Unavailable("status update rejected".to_string()));
        }

        let order = state.orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if order.order_status != expected {
            return Err(StoreError::StatusConflict {
                order_id: id,
                expected: expected.to_string(),
                actual: order.order_status.to_string(),
            });
        }

        order.order_status = next;
        order.updated_at = store_timestamp();
        Ok(())
    }

    async fn update_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_update {
            return Err(StoreError::Unavailable(
                "payment update rejected".to_string(),
            ));
        }

        let order = state.orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if order.payment_status != expected {
            return Err(StoreError::StatusConflict {
                order_id: id,
                expected: expected.to_string(),
                actual: order.payment_status.to_string(),
            });
        }

        order.payment_status = next;
        order.updated_at = store_timestamp();
        Ok(())
    }

    async fn delete_order(&self, id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .orders
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        state
            .orders
            .values()
            .filter(|order| &order.user_id == user_id)
            .map(checked)
            .collect()
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|message| message.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_outbox_delivered(&self, id: OutboxId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id)
            && message.delivered_at.is_none()
        {
            message.delivered_at = Some(store_timestamp());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ProductId, topics};
    use domain::{Money, NewOrderItem};

    fn new_order(user: &str, lines: &[(&str, i64, u32)]) -> NewOrder {
        let items = lines
            .iter()
            .map(|(product, cents, qty)| NewOrderItem::new(*product, Money::from_cents(*cents), *qty))
            .collect();
        NewOrder::new(UserId::new(user), items, "1 Ship St", "1 Bill St").unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = InMemoryOrderStore::new();

        let first = store
            .create_order(new_order("u1", &[("P1", 1000, 2), ("P2", 500, 1)]))
            .await
            .unwrap();
        let second = store
            .create_order(new_order("u1", &[("P3", 100, 1)]))
            .await
            .unwrap();

        assert_eq!(first.order.id, OrderId::new(1));
        assert_eq!(second.order.id, OrderId::new(2));
        assert_eq!(
            first.order.items.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(second.order.items[0].id, 3);
    }

    #[tokio::test]
    async fn test_create_writes_outbox_row() {
        let store = InMemoryOrderStore::new();
        let created = store
            .create_order(new_order("u1", &[("P1", 1000, 2)]))
            .await
            .unwrap();

        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, created.outbox_id);
        assert_eq!(pending[0].topic, topics::ORDER_CREATED);
        assert_eq!(pending[0].key, "1");
        assert_eq!(pending[0].payload["total_amount"], 20.0);
    }

    #[tokio::test]
    async fn test_failed_create_writes_nothing() {
        let store = InMemoryOrderStore::new();
        store.set_fail_on_create(true).await;

        let result = store.create_order(new_order("u1", &[("P1", 1000, 2)])).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.order_count().await, 0);
        assert!(store.outbox_messages().await.is_empty());

        store.set_fail_on_create(false).await;
        let created = store
            .create_order(new_order("u1", &[("P1", 1000, 2)]))
            .await
            .unwrap();
        assert_eq!(created.order.id, OrderId::new(1));
    }

    #[tokio::test]
    async fn test_get_round_trips_created_order() {
        let store = InMemoryOrderStore::new();
        let created = store
            .create_order(new_order("u1", &[("P1", 1000, 2)]))
            .await
            .unwrap();

        let loaded = store.get_order_by_id(created.order.id).await.unwrap();
        assert_eq!(loaded, Some(created.order));
        assert!(store.get_order_by_id(OrderId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_of_itemless_order_is_integrity_error() {
        let store = InMemoryOrderStore::new();
        let created = store
            .create_order(new_order("u1", &[("P1", 1000, 2)]))
            .await
            .unwrap();
        store.corrupt_items(created.order.id).await;

        let result = store.get_order_by_id(created.order.id).await;
        assert!(matches!(result, Err(StoreError::Integrity { .. })));
    }

    #[tokio::test]
    async fn test_status_update_is_compare_and_swap() {
        let store = InMemoryOrderStore::new();
        let id = store
            .create_order(new_order("u1", &[("P1", 1000, 2)]))
            .await
            .unwrap()
            .order
            .id;

        store
            .update_order_status(id, OrderStatus::Pending, OrderStatus::Accepted)
            .await
            .unwrap();

        let result = store
            .update_order_status(id, OrderStatus::Pending, OrderStatus::Failed)
            .await;
        match result {
            Err(StoreError::StatusConflict { actual, .. }) => assert_eq!(actual, "Accepted"),
            other => panic!("expected conflict, got {other:?}"),
        }

        let order = store.get_order_by_id(id).await.unwrap().unwrap();
        assert_eq!(order.order_status, OrderStatus::Accepted);
        assert!(order.updated_at >= order.created_at);
    }

    #[tokio::test]
    async fn test_status_update_on_missing_order() {
        let store = InMemoryOrderStore::new();
        let result = store
            .update_order_status(OrderId::new(5), OrderStatus::Pending, OrderStatus::Accepted)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_payment_update() {
        let store = InMemoryOrderStore::new();
        let id = store
            .create_order(new_order("u1", &[("P1", 1000, 2)]))
            .await
            .unwrap()
            .order
            .id;

        store
            .update_payment_status(id, PaymentStatus::Unpaid, PaymentStatus::Paid)
            .await
            .unwrap();
        let order = store.get_order_by_id(id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.order_status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = InMemoryOrderStore::new();
        let a = store
            .create_order(new_order("u1", &[("P1", 1000, 1)]))
            .await
            .unwrap()
            .order
            .id;
        store
            .create_order(new_order("u2", &[("P1", 1000, 1)]))
            .await
            .unwrap();
        let c = store
            .create_order(new_order("u1", &[("P2", 200, 4)]))
            .await
            .unwrap()
            .order
            .id;

        let listed = store.list_orders(&UserId::new("u1")).await.unwrap();
        assert_eq!(listed.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(listed[1].items[0].product_id, ProductId::new("P2"));

        store.delete_order(a).await.unwrap();
        assert!(store.get_order_by_id(a).await.unwrap().is_none());
        assert!(matches!(
            store.delete_order(a).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.list_orders(&UserId::new("u1")).await.unwrap().len(), 1);
        assert!(store.list_orders(&UserId::new("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_outbox_delivered() {
        let store = InMemoryOrderStore::new();
        let created = store
            .create_order(new_order("u1", &[("P1", 1000, 1)]))
            .await
            .unwrap();

        store.mark_outbox_delivered(created.outbox_id).await.unwrap();
        store.mark_outbox_delivered(created.outbox_id).await.unwrap();

        assert!(store.pending_outbox(10).await.unwrap().is_empty());
        assert_eq!(store.outbox_messages().await.len(), 1);
    }
}
