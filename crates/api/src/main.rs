//! Order service entry point.

use std::sync::Arc;

use api::config::Config;
use api::routes::orders::AppState;
use event_bus::{EventBus, InMemoryEventBus};
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use saga::HttpInventoryClient;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn connect_store(config: &Config) -> Arc<dyn OrderStore> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory order store");
        return Arc::new(InMemoryOrderStore::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    let store = PostgresOrderStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to PostgreSQL order store");
    Arc::new(store)
}

#[cfg(feature = "kafka")]
fn connect_bus(config: &Config) -> Arc<dyn EventBus> {
    match config.kafka_brokers.as_deref() {
        Some(brokers) => {
            tracing::info!(%brokers, "using Kafka event bus");
            Arc::new(event_bus::KafkaEventBus::new(brokers).expect("failed to create Kafka client"))
        }
        None => {
            tracing::warn!("KAFKA_BROKERS not set, using in-memory event bus");
            Arc::new(InMemoryEventBus::new())
        }
    }
}

#[cfg(not(feature = "kafka"))]
fn connect_bus(config: &Config) -> Arc<dyn EventBus> {
    if config.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS ignored: built without the kafka feature");
    }
    Arc::new(InMemoryEventBus::new())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect collaborators
    let store = connect_store(&config).await;
    let bus = connect_bus(&config);
    let inventory = HttpInventoryClient::new(&config.inventory_url, config.inventory_timeout)
        .expect("failed to create inventory client");

    // 4. Start background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = api::spawn_workers(store.clone(), bus.clone(), &config, shutdown_rx);

    // 5. Build the application
    let state = Arc::new(AppState::new(
        store,
        bus,
        inventory,
        config.intake_config(),
    ));
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting order service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Drain workers
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "background worker panicked");
        }
    }

    tracing::info!("server shut down gracefully");
}
