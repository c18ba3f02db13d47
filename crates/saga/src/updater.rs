//! Single choke point for order and payment status changes.

use common::OrderId;
use domain::{Order, OrderStatus, PaymentStatus};
use order_store::{OrderStore, StoreError};

use crate::error::{Result, SagaError};

/// Attempts made when a concurrent writer changes the status between our
/// read and our conditional write.
const MAX_ATTEMPTS: usize = 3;

/// Result of a status change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The status was written. Holds the order as re-read from the store.
    Applied(Order),
    /// The order already had the requested status; nothing was written.
    Unchanged(Order),
}

impl Transition {
    pub fn order(&self) -> &Order {
        match self {
            Transition::Applied(order) | Transition::Unchanged(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Transition::Applied(order) | Transition::Unchanged(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Validates status changes against the transition table and writes them
/// with a compare-and-swap on the current status.
///
/// Orders in a terminal state reject every request, including one for the
/// status they already have. Otherwise a request for the current status is
/// a no-op reported as [`Transition::Unchanged`].
pub struct OrderStatusUpdater<S> {
    store: S,
}

impl<S: OrderStore> OrderStatusUpdater<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Moves the order to `requested` and returns the canonical stored row.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, requested = %requested))]
    pub async fn apply(&self, order_id: OrderId, requested: OrderStatus) -> Result<Transition> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.load(order_id).await?;
            let from = current.order_status;

            if from.is_terminal() || (from != requested && !from.can_transition_to(requested)) {
                return Err(SagaError::InvalidTransition {
                    order_id,
                    from: from.to_string(),
                    to: requested.to_string(),
                });
            }
            if from == requested {
                return Ok(Transition::Unchanged(current));
            }

            match self
                .store
                .update_order_status(order_id, from, requested)
                .await
            {
                Ok(()) => {
                    metrics::counter!(
                        "order_status_transitions_total",
                        "from" => from.as_str(),
                        "to" => requested.as_str()
                    )
                    .increment(1);
                    tracing::info!(%from, to = %requested, "order status updated");
                    return Ok(Transition::Applied(self.load(order_id).await?));
                }
                Err(StoreError::StatusConflict { actual, .. }) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, %actual, "status changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Moves the payment status to `requested` and returns the stored row.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, requested = %requested))]
    pub async fn apply_payment(
        &self,
        order_id: OrderId,
        requested: PaymentStatus,
    ) -> Result<Transition> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.load(order_id).await?;
            let from = current.payment_status;

            if from == requested {
                return Ok(Transition::Unchanged(current));
            }
            if !from.can_transition_to(requested) {
                return Err(SagaError::InvalidTransition {
                    order_id,
                    from: from.to_string(),
                    to: requested.to_string(),
                });
            }

            match self
                .store
                .update_payment_status(order_id, from, requested)
                .await
            {
                Ok(()) => {
                    tracing::info!(%from, to = %requested, "payment status updated");
                    return Ok(Transition::Applied(self.load(order_id).await?));
                }
                Err(StoreError::StatusConflict { .. }) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, "payment status changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order_by_id(order_id)
            .await?
            .ok_or(SagaError::NotFound(order_id))
    }
}
