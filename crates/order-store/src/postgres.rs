use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{Money, NewOrder, Order, OrderError, OrderItem, OrderStatus, PaymentStatus};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::store::{order_created_message, store_timestamp};
use crate::{CreatedOrder, OrderStore, OutboxId, OutboxMessage, Result, StoreError};

const ORDER_COLUMNS: &str = "id, user_id, order_status, payment_status, total_amount_cents, \
     shipping_address, billing_address, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, order_id, product_id, product_price_cents, quantity, total_price_cents";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Opens a read-only transaction whose statements all see one snapshot,
    /// so an order and its items are read consistently.
    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    fn integrity(order_id: OrderId) -> impl Fn(OrderError) -> StoreError {
        move |source| StoreError::Integrity { order_id, source }
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        let order_id = OrderId::new(row.try_get("order_id")?);
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity).map_err(|_| StoreError::Integrity {
            order_id,
            source: OrderError::InvalidAmount(quantity.to_string()),
        })?;

        Ok(OrderItem {
            id: row.try_get("id")?,
            order_id,
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            product_price: Money::from_cents(row.try_get("product_price_cents")?),
            quantity,
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let id = OrderId::new(row.try_get("id")?);
        let order_status: String = row.try_get("order_status")?;
        let payment_status: String = row.try_get("payment_status")?;

        let order = Order {
            id,
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            order_status: order_status
                .parse::<OrderStatus>()
                .map_err(Self::integrity(id))?,
            payment_status: payment_status
                .parse::<PaymentStatus>()
                .map_err(Self::integrity(id))?,
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            shipping_address: row.try_get("shipping_address")?,
            billing_address: row.try_get("billing_address")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            items,
        };

        order.check_integrity().map_err(Self::integrity(id))?;
        Ok(order)
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            topic: row.try_get("topic")?,
            key: row.try_get("message_key")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            delivered_at: row.try_get("delivered_at")?,
        })
    }

    /// Reads the current value of a status column, distinguishing a missing
    /// order from a lost compare-and-swap.
    async fn status_conflict(&self, id: OrderId, column: &str, expected: String) -> StoreError {
        let sql = format!("SELECT {column} FROM orders WHERE id = $1");
        let actual: std::result::Result<Option<String>, sqlx::Error> = sqlx::query_scalar(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await;

        match actual {
            Ok(Some(actual)) => StoreError::StatusConflict {
                order_id: id,
                expected,
                actual,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => StoreError::Database(e),
        }
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(user_id = %order.user_id(), items = order.items().len()))]
    async fn create_order(&self, order: NewOrder) -> Result<CreatedOrder> {
        let now = store_timestamp();

        // Any early return drops the transaction, which rolls it back.
        let mut tx = self.pool.begin().await?;

        let order_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (user_id, order_status, payment_status, total_amount_cents,
                                shipping_address, billing_address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING id
            "#,
        )
        .bind(order.user_id().as_str())
        .bind(order.order_status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.total_amount().cents())
        .bind(order.shipping_address())
        .bind(order.billing_address())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let mut item_ids = Vec::with_capacity(order.items().len());
        for (item, total_price) in order.lines() {
            let item_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO order_items (order_id, product_id, product_price_cents, quantity, total_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(order_id)
            .bind(item.product_id.as_str())
            .bind(item.product_price.cents())
            .bind(i64::from(item.quantity))
            .bind(total_price.cents())
            .fetch_one(&mut *tx)
            .await?;
            item_ids.push(item_id);
        }

        let order = order.into_order(OrderId::new(order_id), &item_ids, now);
        let message = order_created_message(&order)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, topic, message_key, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(&message.topic)
        .bind(&message.key)
        .bind(&message.payload)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CreatedOrder {
            order,
            outbox_id: message.id,
        })
    }

    async fn get_order_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let mut tx = self.begin_snapshot().await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let Some(row) = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let sql = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id");
        let items = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(Self::row_to_item)
            .collect::<Result<Vec<_>>>()?;
        tx.commit().await?;

        Self::row_to_order(&row, items).map(Some)
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET order_status = $1, updated_at = $2 WHERE id = $3 AND order_status = $4",
        )
        .bind(next.as_str())
        .bind(store_timestamp())
        .bind(id.as_i64())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .status_conflict(id, "order_status", expected.to_string())
                .await);
        }
        Ok(())
    }

    async fn update_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET payment_status = $1, updated_at = $2 WHERE id = $3 AND payment_status = $4",
        )
        .bind(next.as_str())
        .bind(store_timestamp())
        .bind(id.as_i64())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .status_conflict(id, "payment_status", expected.to_string())
                .await);
        }
        Ok(())
    }

    async fn delete_order(&self, id: OrderId) -> Result<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_orders(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let mut tx = self.begin_snapshot().await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(user_id.as_str())
            .fetch_all(&mut *tx)
            .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, id"
        );
        let mut items_by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in sqlx::query(&sql).bind(ids.as_slice()).fetch_all(&mut *tx).await? {
            let item = Self::row_to_item(&row)?;
            items_by_order.entry(item.order_id).or_default().push(item);
        }
        tx.commit().await?;

        rows.iter()
            .map(|row| {
                let id = OrderId::new(row.try_get("id")?);
                let items = items_by_order.remove(&id).unwrap_or_default();
                Self::row_to_order(row, items)
            })
            .collect()
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic, message_key, payload, created_at, delivered_at
            FROM outbox_messages
            WHERE delivered_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_outbox_delivered(&self, id: OutboxId) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_messages SET delivered_at = $1 WHERE id = $2 AND delivered_at IS NULL",
        )
        .bind(store_timestamp())
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
