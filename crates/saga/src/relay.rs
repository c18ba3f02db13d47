//! Delivers outbox messages the intake path could not publish.

use std::time::Duration;

use event_bus::{EventBus, EventBusExt};
use order_store::OrderStore;
use tokio::sync::watch;

use crate::error::Result;

/// Configuration for the outbox relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            batch_size: 100,
        }
    }
}

/// Periodically publishes pending outbox rows, oldest first, and marks
/// them delivered. Delivery is at-least-once.
pub struct OutboxRelay<S, B> {
    store: S,
    bus: B,
    config: RelayConfig,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OrderStore,
    B: EventBus,
{
    pub fn new(store: S, bus: B, config: RelayConfig) -> Self {
        Self { store, bus, config }
    }

    /// Publishes one batch of pending messages. Stops at the first publish
    /// failure so later messages never overtake an earlier one.
    ///
    /// Returns the number of messages delivered.
    #[tracing::instrument(skip(self))]
    pub async fn relay_pending(&self) -> Result<usize> {
        let pending = self.store.pending_outbox(self.config.batch_size).await?;
        let mut relayed = 0;

        for message in pending {
            if let Err(e) = self
                .bus
                .publish_json(&message.topic, &message.key, &message.payload)
                .await
            {
                tracing::warn!(outbox_id = %message.id, topic = %message.topic, error = %e, "outbox publish failed");
                break;
            }
            self.store.mark_outbox_delivered(message.id).await?;
            metrics::counter!("outbox_relayed_total", "topic" => message.topic.clone()).increment(1);
            relayed += 1;
        }

        if relayed > 0 {
            tracing::info!(relayed, "outbox messages relayed");
        }
        Ok(relayed)
    }

    /// Relays on every tick until `shutdown` becomes true or its sender is
    /// dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_pending().await {
                        tracing::error!(error = %e, "outbox relay failed");
                    }
                }
            }
        }
        tracing::info!("outbox relay stopped");
    }
}
