//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{OrderId, UserId, topics};
use domain::{Money, NewOrder, NewOrderItem, OrderStatus, PaymentStatus};
use order_store::{OrderStore, PostgresOrderStore, StoreError};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_orders_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_items, orders, outbox_messages RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool)
}

fn new_order(user: &str, lines: &[(&str, i64, u32)]) -> NewOrder {
    let items = lines
        .iter()
        .map(|(product, cents, qty)| NewOrderItem::new(*product, Money::from_cents(*cents), *qty))
        .collect();
    NewOrder::new(UserId::new(user), items, "1 Ship St", "1 Bill St").unwrap()
}

#[tokio::test]
#[serial]
async fn create_and_read_back_order() {
    let store = get_test_store().await;

    let created = store
        .create_order(new_order("u1", &[("P1", 1000, 2), ("P2", 250, 4)]))
        .await
        .unwrap();
    assert_eq!(created.order.total_amount.cents(), 3000);

    let loaded = store
        .get_order_by_id(created.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, created.order);
    assert_eq!(loaded.order_status, OrderStatus::Pending);
    assert_eq!(loaded.payment_status, PaymentStatus::Unpaid);
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].product_id.as_str(), "P1");
    assert_eq!(loaded.items[1].total_price.cents(), 1000);
}

#[tokio::test]
#[serial]
async fn create_writes_outbox_row_in_same_transaction() {
    let store = get_test_store().await;

    let created = store
        .create_order(new_order("u1", &[("P1", 1000, 2)]))
        .await
        .unwrap();

    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, created.outbox_id);
    assert_eq!(pending[0].topic, topics::ORDER_CREATED);
    assert_eq!(pending[0].key, created.order.id.to_string());

    store.mark_outbox_delivered(created.outbox_id).await.unwrap();
    assert!(store.pending_outbox(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn failed_item_insert_rolls_back_whole_order() {
    let store = get_test_store().await;

    // Reject any product id starting with "BAD" at the database level.
    sqlx::query(
        "ALTER TABLE order_items ADD CONSTRAINT reject_bad CHECK (product_id NOT LIKE 'BAD%')",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let result = store
        .create_order(new_order("u1", &[("P1", 1000, 1), ("BAD-1", 500, 1)]))
        .await;

    sqlx::query("ALTER TABLE order_items DROP CONSTRAINT reject_bad")
        .execute(store.pool())
        .await
        .unwrap();

    assert!(matches!(result, Err(StoreError::Database(_))));

    let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(store.pool())
        .await
        .unwrap();
    let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(orders, 0);
    assert_eq!(items, 0);
    assert!(store.pending_outbox(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn status_update_is_conditional() {
    let store = get_test_store().await;
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

    let result = store
        .update_order_status(OrderId::new(9999), OrderStatus::Pending, OrderStatus::Failed)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    let order = store.get_order_by_id(id).await.unwrap().unwrap();
    assert_eq!(order.order_status, OrderStatus::Accepted);
}

#[tokio::test]
#[serial]
async fn payment_status_update() {
    let store = get_test_store().await;
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
}

#[tokio::test]
#[serial]
async fn list_and_delete_orders() {
    let store = get_test_store().await;
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
        .create_order(new_order("u1", &[("P2", 200, 4), ("P3", 100, 1)]))
        .await
        .unwrap()
        .order
        .id;

    let listed = store.list_orders(&UserId::new("u1")).await.unwrap();
    assert_eq!(listed.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a, c]);
    assert_eq!(listed[1].items.len(), 2);

    store.delete_order(a).await.unwrap();
    assert!(store.get_order_by_id(a).await.unwrap().is_none());
    assert!(matches!(
        store.delete_order(a).await,
        Err(StoreError::NotFound(_))
    ));

    let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items WHERE order_id = $1")
        .bind(a.as_i64())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(items, 0);
}

#[tokio::test]
#[serial]
async fn order_without_items_is_reported_as_integrity_error() {
    let store = get_test_store().await;
    let id = store
        .create_order(new_order("u1", &[("P1", 1000, 1)]))
        .await
        .unwrap()
        .order
        .id;

    sqlx::query("DELETE FROM order_items WHERE order_id = $1")
        .bind(id.as_i64())
        .execute(store.pool())
        .await
        .unwrap();

    let result = store.get_order_by_id(id).await;
    assert!(matches!(result, Err(StoreError::Integrity { .. })));
}

#[tokio::test]
#[serial]
async fn reads_racing_deletes_see_whole_order_or_nothing() {
    let store = get_test_store().await;

    for _ in 0..20 {
        let created = store
            .create_order(new_order("u1", &[("P1", 1000, 1), ("P2", 250, 2)]))
            .await
            .unwrap();
        let id = created.order.id;

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..10 {
                    seen.push(store.get_order_by_id(id).await);
                    seen.push(store.list_orders(&UserId::new("u1")).await.map(|_| None));
                }
                seen
            })
        };
        store.delete_order(id).await.unwrap();

        for result in reader.await.unwrap() {
            match result {
                Ok(Some(order)) => assert_eq!(order.items.len(), 2),
                Ok(None) => {}
                Err(e) => panic!("read during delete failed: {e}"),
            }
        }
    }
}
