//! Reconciles stock outcomes from the inventory domain into order status.

use std::time::Duration;

use common::{OrderId, topics};
use domain::{Order, OrderStatus};
use event_bus::{EventBus, EventBusExt, Message};
use futures_util::StreamExt;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::SagaError;
use crate::updater::{OrderStatusUpdater, Transition};

/// Stock outcome published by the inventory domain for a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEvent {
    pub order_id: OrderId,
    pub stock_available: bool,
}

impl StockEvent {
    /// Status the order should move to.
    pub fn target_status(&self) -> OrderStatus {
        if self.stock_available {
            OrderStatus::Accepted
        } else {
            OrderStatus::Failed
        }
    }
}

/// What happened to a single stock event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockEventOutcome {
    /// The status changed. `published` is false if the `orderEvent` could
    /// not be delivered.
    Applied {
        order_id: OrderId,
        status: OrderStatus,
        published: bool,
    },
    /// The order already had the target status (redelivery).
    Unchanged { order_id: OrderId },
    /// The transition is not allowed from the order's current status.
    Rejected { order_id: OrderId },
    /// The payload could not be decoded.
    Malformed,
    /// The order could not be loaded or written.
    Failed { order_id: OrderId },
}

impl StockEventOutcome {
    fn label(&self) -> &'static str {
        match self {
            StockEventOutcome::Applied { .. } => "applied",
            StockEventOutcome::Unchanged { .. } => "unchanged",
            StockEventOutcome::Rejected { .. } => "rejected",
            StockEventOutcome::Malformed => "malformed",
            StockEventOutcome::Failed { .. } => "failed",
        }
    }
}

/// Configuration for the stock event consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    /// Pause before subscribing again after a broker error.
    pub retry_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: topics::STOCK_EVENT.to_string(),
            group: "order-service-group".to_string(),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Long-running worker that applies `stockEvent` messages and republishes
/// the updated order on `orderEvent`.
///
/// A message that cannot be handled is logged and skipped; the loop only
/// stops when the shutdown signal fires. Offsets are committed after a
/// message has been handled, so a crash mid-message means redelivery.
pub struct StockEventConsumer<S, B> {
    updater: OrderStatusUpdater<S>,
    bus: B,
    config: ConsumerConfig,
}

impl<S, B> StockEventConsumer<S, B>
where
    S: OrderStore,
    B: EventBus,
{
    pub fn new(store: S, bus: B, config: ConsumerConfig) -> Self {
        Self {
            updater: OrderStatusUpdater::new(store),
            bus,
            config,
        }
    }

    /// Handles one message. Never fails; the outcome says what happened.
    #[tracing::instrument(skip(self, message), fields(topic = %message.topic, offset = message.offset))]
    pub async fn handle_message(&self, message: &Message) -> StockEventOutcome {
        let outcome = match message.decode::<StockEvent>() {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed stock event");
                StockEventOutcome::Malformed
            }
        };

        match outcome {
            StockEventOutcome::Applied { .. } | StockEventOutcome::Unchanged { .. } => {
                metrics::counter!("stock_events_processed_total", "outcome" => outcome.label())
                    .increment(1);
            }
            _ => {
                metrics::counter!("stock_events_skipped_total", "outcome" => outcome.label())
                    .increment(1);
            }
        }
        outcome
    }

    async fn handle_event(&self, event: StockEvent) -> StockEventOutcome {
        let order_id = event.order_id;
        match self.updater.apply(order_id, event.target_status()).await {
            Ok(Transition::Applied(order)) => StockEventOutcome::Applied {
                order_id,
                status: order.order_status,
                published: self.publish_order(&order).await,
            },
            Ok(Transition::Unchanged(_)) => {
                tracing::info!(%order_id, "stock event already applied");
                StockEventOutcome::Unchanged { order_id }
            }
            Err(e @ SagaError::InvalidTransition { .. }) => {
                tracing::warn!(%order_id, error = %e, "stock event rejected");
                StockEventOutcome::Rejected { order_id }
            }
            Err(e) => {
                tracing::error!(%order_id, error = %e, "failed to apply stock event");
                StockEventOutcome::Failed { order_id }
            }
        }
    }

    async fn publish_order(&self, order: &Order) -> bool {
        let key = order.id.to_string();
        match self.bus.publish_json(topics::ORDER_EVENT, &key, order).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "failed to publish order event");
                false
            }
        }
    }

    /// Consumes until `shutdown` becomes true or its sender is dropped.
    ///
    /// The message being handled when the signal arrives is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let topic = self.config.topic.as_str();
        let group = self.config.group.as_str();
        tracing::info!(topic, group, "stock event consumer started");

        while !*shutdown.borrow_and_update() {
            let mut stream = match self.bus.subscribe(topic, group).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(topic, error = %e, "subscribe failed");
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        tracing::info!("stock event consumer stopped");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(Ok(message)) => {
                            self.handle_message(&message).await;
                            self.commit(&message).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(topic, error = %e, "broker error, resubscribing");
                            break;
                        }
                        None => {
                            tracing::warn!(topic, "subscription ended, resubscribing");
                            break;
                        }
                    }
                }
            }

            if self.pause(&mut shutdown).await {
                break;
            }
        }
        tracing::info!("stock event consumer stopped");
    }

    /// Marks a handled message as consumed. If this fails the message is
    /// delivered again after the next rebalance, which handling tolerates.
    async fn commit(&self, message: &Message) {
        if let Err(e) = self.bus.commit(&self.config.group, message).await {
            tracing::warn!(
                topic = %message.topic,
                offset = message.offset,
                error = %e,
                "failed to commit stock event"
            );
        }
    }

    /// Sleeps for the retry delay. Returns true if shutdown was requested.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown.changed() => true,
            _ = tokio::time::sleep(self.config.retry_delay) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::UserId;
    use domain::{Money, NewOrder, NewOrderItem};
    use event_bus::InMemoryEventBus;
    use order_store::InMemoryOrderStore;

    use super::*;

    async fn setup() -> (
        StockEventConsumer<InMemoryOrderStore, InMemoryEventBus>,
        InMemoryOrderStore,
        InMemoryEventBus,
        OrderId,
    ) {
        let store = InMemoryOrderStore::new();
        let bus = InMemoryEventBus::new();
        let order = NewOrder::new(
            UserId::new("u1"),
            vec![NewOrderItem::new("P1", Money::from_cents(1000), 2)],
            "ship",
            "bill",
        )
        .unwrap();
        let id = store.create_order(order).await.unwrap().order.id;
        let consumer = StockEventConsumer::new(store.clone(), bus.clone(), ConsumerConfig::default());
        (consumer, store, bus, id)
    }

    fn message(payload: &str) -> Message {
        Message {
            topic: topics::STOCK_EVENT.to_string(),
            key: None,
            payload: payload.as_bytes().to_vec(),
            partition: 0,
            offset: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_target_status() {
        let event = StockEvent {
            order_id: OrderId::new(1),
            stock_available: true,
        };
        assert_eq!(event.target_status(), OrderStatus::Accepted);
        let event = StockEvent {
            stock_available: false,
            ..event
        };
        assert_eq!(event.target_status(), OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_available_stock_accepts_and_publishes() {
        let (consumer, store, bus, id) = setup().await;

        let outcome = consumer
            .handle_message(&message(&format!(
                r#"{{"order_id": {id}, "stock_available": true}}"#
            )))
            .await;

        assert_eq!(
            outcome,
            StockEventOutcome::Applied {
                order_id: id,
                status: OrderStatus::Accepted,
                published: true
            }
        );
        let order = store.get_order_by_id(id).await.unwrap().unwrap();
        assert_eq!(order.order_status, OrderStatus::Accepted);

        let published = bus.published(topics::ORDER_EVENT).await;
        assert_eq!(published.len(), 1);
        let snapshot: Order = published[0].decode().unwrap();
        assert_eq!(snapshot, order);
    }

    #[tokio::test]
    async fn test_unavailable_stock_fails_order() {
        let (consumer, store, _, id) = setup().await;

        consumer
            .handle_message(&message(&format!(
                r#"{{"order_id": {id}, "stock_available": false}}"#
            )))
            .await;

        let order = store.get_order_by_id(id).await.unwrap().unwrap();
        assert_eq!(order.order_status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let (consumer, _, bus, _) = setup().await;

        let outcome = consumer
            .handle_message(&message(r#"{"stock_available": true}"#))
            .await;

        assert_eq!(outcome, StockEventOutcome::Malformed);
        assert_eq!(bus.publish_calls().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_order_is_skipped() {
        let (consumer, _, _, _) = setup().await;

        let outcome = consumer
            .handle_message(&message(r#"{"order_id": 999, "stock_available": true}"#))
            .await;

        assert_eq!(
            outcome,
            StockEventOutcome::Failed {
                order_id: OrderId::new(999)
            }
        );
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_status_change() {
        let (consumer, store, bus, id) = setup().await;
        bus.set_fail_on_publish(true).await;

        let outcome = consumer
            .handle_message(&message(&format!(
                r#"{{"order_id": {id}, "stock_available": true}}"#
            )))
            .await;

        assert!(matches!(
            outcome,
            StockEventOutcome::Applied {
                published: false,
                ..
            }
        ));
        let order = store.get_order_by_id(id).await.unwrap().unwrap();
        assert_eq!(order.order_status, OrderStatus::Accepted);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (consumer, _, _, _) = setup().await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { consumer.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }
}
