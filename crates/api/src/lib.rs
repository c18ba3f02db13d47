//! HTTP API server and process wiring for the order service.
//!
//! Exposes the order RPCs over REST, with structured logging (tracing) and
//! Prometheus metrics, and runs the saga's background workers.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, put};
use event_bus::EventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use saga::{InventoryClient, OutboxRelay, StockEventConsumer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, B, I>(state: Arc<AppState<S, B, I>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
    I: InventoryClient + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            get(routes::orders::list::<S, B, I>).post(routes::orders::create::<S, B, I>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S, B, I>).delete(routes::orders::delete::<S, B, I>),
        )
        .route(
            "/orders/{id}/status",
            put(routes::orders::update_status::<S, B, I>),
        )
        .route(
            "/orders/{id}/payment-status",
            put(routes::orders::update_payment_status::<S, B, I>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Starts the stock event consumer and the outbox relay.
///
/// Both stop once `shutdown` becomes true, after finishing the message or
/// batch in hand.
pub fn spawn_workers<S, B>(
    store: S,
    bus: B,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
    S: OrderStore + Clone + 'static,
    B: EventBus + Clone + 'static,
{
    let consumer = StockEventConsumer::new(store.clone(), bus.clone(), config.consumer_config());
    let relay = OutboxRelay::new(store, bus, config.relay_config());

    let consumer_shutdown = shutdown.clone();
    vec![
        tokio::spawn(async move { consumer.run(consumer_shutdown).await }),
        tokio::spawn(async move { relay.run(shutdown).await }),
    ]
}
