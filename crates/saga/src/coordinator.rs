//! Order intake: stock checks, atomic persistence and the creation event.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use common::{OrderId, ProductId, UserId, topics};
use domain::{Money, NewOrder, NewOrderItem};
use event_bus::{EventBus, EventBusExt};
use futures_util::{StreamExt, TryStreamExt, stream};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::{InventoryClient, InventoryError, ProductInfo};

/// One requested line of a new order.
///
/// `price` is what the client saw; the stored price is the catalog price at
/// the time of the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub price: Money,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, price: Money, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            price,
            quantity,
        }
    }
}

/// Configuration for order intake.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Maximum number of inventory lookups in flight for one order.
    pub stock_check_concurrency: usize,
    /// Deadline for each inventory lookup.
    pub inventory_timeout: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            stock_check_concurrency: 8,
            inventory_timeout: Duration::from_secs(3),
        }
    }
}

/// Creates orders.
///
/// Every stock check completes before anything is written, so a failed or
/// insufficient check leaves no trace. The order, its items and an
/// `orderCreated` outbox row are committed together; the event is then
/// published right away and the outbox row marked delivered.
pub struct OrderIntakeCoordinator<S, B, I>
where
    S: OrderStore,
    B: EventBus,
    I: InventoryClient,
{
    store: S,
    bus: B,
    inventory: I,
    config: IntakeConfig,
}

impl<S, B, I> OrderIntakeCoordinator<S, B, I>
where
    S: OrderStore,
    B: EventBus,
    I: InventoryClient,
{
    /// Creates a new coordinator with the default configuration.
    pub fn new(store: S, bus: B, inventory: I) -> Self {
        Self::with_config(store, bus, inventory, IntakeConfig::default())
    }

    pub fn with_config(store: S, bus: B, inventory: I, config: IntakeConfig) -> Self {
        Self {
            store,
            bus,
            inventory,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates, stock-checks, persists and announces a new order.
    ///
    /// Returns [`SagaError::OrderCreatedUnpublished`] when the order was
    /// committed but the creation event could not be delivered.
    #[tracing::instrument(
        skip(self, lines, shipping_address, billing_address),
        fields(user_id = %user_id, lines = lines.len())
    )]
    pub async fn create_order(
        &self,
        user_id: UserId,
        lines: Vec<OrderLine>,
        shipping_address: String,
        billing_address: String,
    ) -> Result<OrderId> {
        let start = Instant::now();
        let result = self
            .try_create_order(user_id, lines, shipping_address, billing_address)
            .await;

        metrics::histogram!("order_create_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        match &result {
            Ok(order_id) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(%order_id, "order created");
            }
            Err(e) => {
                metrics::counter!("order_create_failures_total", "reason" => e.kind())
                    .increment(1);
                tracing::warn!(error = %e, "order creation failed");
            }
        }
        result
    }

    async fn try_create_order(
        &self,
        user_id: UserId,
        lines: Vec<OrderLine>,
        shipping_address: String,
        billing_address: String,
    ) -> Result<OrderId> {
        validate(&user_id, &lines)?;

        let catalog = self.check_stock(&lines).await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let info = catalog.get(&line.product_id).ok_or_else(|| {
                SagaError::Validation(format!("no stock check for product {}", line.product_id))
            })?;
            if info.price != line.price {
                tracing::info!(
                    product_id = %line.product_id,
                    client_price = %line.price,
                    catalog_price = %info.price,
                    "client price differs from catalog, using catalog price"
                );
            }
            items.push(NewOrderItem::new(line.product_id, info.price, line.quantity));
        }

        let new_order = NewOrder::new(user_id, items, shipping_address, billing_address)?;
        let created = self.store.create_order(new_order).await?;
        let order_id = created.order.id;

        let key = order_id.to_string();
        match self
            .bus
            .publish_json(topics::ORDER_CREATED, &key, &created.order)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.store.mark_outbox_delivered(created.outbox_id).await {
                    // The relay will publish it again; consumers tolerate duplicates.
                    tracing::warn!(%order_id, error = %e, "failed to mark outbox message delivered");
                }
                Ok(order_id)
            }
            Err(source) => {
                tracing::warn!(%order_id, error = %source, "order committed but creation event not published");
                Err(SagaError::OrderCreatedUnpublished { order_id, source })
            }
        }
    }

    /// Checks every product against the total quantity requested for it.
    ///
    /// Lookups run concurrently, bounded by the configured limit. The first
    /// failure drops the remaining lookups.
    async fn check_stock(&self, lines: &[OrderLine]) -> Result<HashMap<ProductId, ProductInfo>> {
        let demand = aggregate_demand(lines);

        stream::iter(demand)
            .map(|(product_id, requested)| async move {
                let info = self.lookup(&product_id).await?;
                if info.stock < 0 || (info.stock as u64) < requested {
                    return Err(SagaError::InsufficientStock {
                        product_id,
                        available: info.stock,
                        requested,
                    });
                }
                Ok((product_id, info))
            })
            .buffered(self.config.stock_check_concurrency.max(1))
            .try_collect()
            .await
    }

    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn lookup(&self, product_id: &ProductId) -> Result<ProductInfo> {
        let timeout = self.config.inventory_timeout;
        tokio::time::timeout(timeout, self.inventory.get_product(product_id))
            .await
            .unwrap_or(Err(InventoryError::Timeout(timeout)))
            .map_err(|source| SagaError::Dependency {
                product_id: product_id.clone(),
                source,
            })
    }
}

fn validate(user_id: &UserId, lines: &[OrderLine]) -> Result<()> {
    if user_id.as_str().trim().is_empty() {
        return Err(SagaError::Validation("user id is required".to_string()));
    }
    if lines.is_empty() {
        return Err(SagaError::Validation(
            "order must contain at least one item".to_string(),
        ));
    }
    if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
        return Err(SagaError::Validation(format!(
            "quantity for product {} must be positive",
            line.product_id
        )));
    }
    Ok(())
}

/// Sums requested quantities per product so repeated lines are checked
/// against stock once.
fn aggregate_demand(lines: &[OrderLine]) -> BTreeMap<ProductId, u64> {
    let mut demand = BTreeMap::new();
    for line in lines {
        *demand.entry(line.product_id.clone()).or_insert(0) += u64::from(line.quantity);
    }
    demand
}
