//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OrderId, UserId, topics};
use domain::{Money, Order, OrderStatus, PaymentStatus};
use event_bus::{EventBus, EventBusExt};
use order_store::OrderStore;
use saga::{
    IntakeConfig, InventoryClient, OrderIntakeCoordinator, OrderLine, OrderStatusUpdater,
    SagaError, Transition,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, B, I>
where
    S: OrderStore,
    B: EventBus,
    I: InventoryClient,
{
    pub coordinator: OrderIntakeCoordinator<S, B, I>,
    pub updater: OrderStatusUpdater<S>,
    pub store: S,
    pub bus: B,
}

impl<S, B, I> AppState<S, B, I>
where
    S: OrderStore + Clone,
    B: EventBus + Clone,
    I: InventoryClient,
{
    pub fn new(store: S, bus: B, inventory: I, intake: IntakeConfig) -> Self {
        Self {
            coordinator: OrderIntakeCoordinator::with_config(
                store.clone(),
                bus.clone(),
                inventory,
                intake,
            ),
            updater: OrderStatusUpdater::new(store.clone()),
            store,
            bus,
        }
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub shipping_address: String,
    #[serde(default)]
    pub billing_address: String,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub price: Money,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub user_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: OrderId,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

// -- Handlers --

/// POST /orders: validate, stock-check and persist a new order.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id, items = req.items.len()))]
pub async fn create<S, B, I>(
    State(state): State<Arc<AppState<S, B, I>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError>
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
    I: InventoryClient + 'static,
{
    let lines = req
        .items
        .into_iter()
        .map(|item| {
            let quantity = u32::try_from(item.quantity).map_err(|_| {
                ApiError::BadRequest(format!(
                    "Invalid quantity {} for product {}",
                    item.quantity, item.product_id
                ))
            })?;
            Ok(OrderLine::new(item.product_id, item.price, quantity))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let order_id = state
        .coordinator
        .create_order(
            UserId::new(req.user_id),
            lines,
            req.shipping_address,
            req.billing_address,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(OrderCreatedResponse { order_id })))
}

/// GET /orders/{id}: load an order with its items.
#[tracing::instrument(skip(state))]
pub async fn get<S, B, I>(
    State(state): State<Arc<AppState<S, B, I>>>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
    I: InventoryClient + 'static,
{
    let order_id = OrderId::new(id);
    let order = state
        .store
        .get_order_by_id(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;

    Ok(Json(order))
}

/// GET /orders?user_id=: list a user's orders.
#[tracing::instrument(skip(state, query), fields(user_id = %query.user_id))]
pub async fn list<S, B, I>(
    State(state): State<Arc<AppState<S, B, I>>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
    I: InventoryClient + 'static,
{
    if query.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    let orders = state.store.list_orders(&UserId::new(query.user_id)).await?;
    Ok(Json(orders))
}

/// PUT /orders/{id}/status: move an order through its lifecycle.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn update_status<S, B, I>(
    State(state): State<Arc<AppState<S, B, I>>>,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<MessageResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
    I: InventoryClient + 'static,
{
    let status: OrderStatus = req.status.parse().map_err(SagaError::from)?;
    let transition = state.updater.apply(OrderId::new(id), status).await?;
    announce(&state.bus, &transition).await;

    Ok(MessageResponse::new(if transition.is_applied() {
        "Order status updated"
    } else {
        "Order status unchanged"
    }))
}

/// PUT /orders/{id}/payment-status: record a payment outcome.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn update_payment_status<S, B, I>(
    State(state): State<Arc<AppState<S, B, I>>>,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<MessageResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
    I: InventoryClient + 'static,
{
    let status: PaymentStatus = req.status.parse().map_err(SagaError::from)?;
    let transition = state.updater.apply_payment(OrderId::new(id), status).await?;
    announce(&state.bus, &transition).await;

    Ok(MessageResponse::new(if transition.is_applied() {
        "Payment status updated"
    } else {
        "Payment status unchanged"
    }))
}

/// DELETE /orders/{id}: remove an order and its items.
#[tracing::instrument(skip(state))]
pub async fn delete<S, B, I>(
    State(state): State<Arc<AppState<S, B, I>>>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
    I: InventoryClient + 'static,
{
    state.store.delete_order(OrderId::new(id)).await?;
    Ok(MessageResponse::new("Order deleted"))
}

/// Republishes an order whose status changed. Best effort.
async fn announce<B: EventBus>(bus: &B, transition: &Transition) {
    let Transition::Applied(order) = transition else {
        return;
    };
    if let Err(e) = bus
        .publish_json(topics::ORDER_EVENT, &order.id.to_string(), order)
        .await
    {
        tracing::warn!(order_id = %order.id, error = %e, "failed to publish order event");
    }
}
