//! Order aggregate and its construction input.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderStatus, PaymentStatus};

/// A persisted line item. The price is snapshotted when the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_price: Money,
    pub quantity: u32,
    pub total_price: Money,
}

/// Order aggregate root, as stored and as published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Money,
    pub shipping_address: String,
    pub billing_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Returns true if no further status transition is possible.
    pub fn is_terminal(&self) -> bool {
        self.order_status.is_terminal()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Sum of the line totals currently attached to the order.
    pub fn items_total(&self) -> Result<Money, OrderError> {
        Money::checked_sum(self.items.iter().map(|item| item.total_price))
    }

    /// Checks invariants a stored order must satisfy when read back.
    pub fn check_integrity(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        let expected = self.items_total()?;
        if expected != self.total_amount {
            return Err(OrderError::TotalMismatch {
                expected,
                actual: self.total_amount,
            });
        }
        Ok(())
    }
}

/// A line item that has been priced but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_price: Money,
    pub quantity: u32,
}

impl NewOrderItem {
    pub fn new(product_id: impl Into<ProductId>, product_price: Money, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            product_price,
            quantity,
        }
    }

    /// Returns the total price for this item (quantity * product_price).
    pub fn total_price(&self) -> Result<Money, OrderError> {
        self.product_price.checked_multiply(self.quantity)
    }
}

/// A validated order ready to be written in one transaction.
///
/// Always `Pending` / `Unpaid`, with at least one item; the total is
/// derived from the items and cannot be set independently. Line totals and
/// the order total are computed once, so a built order never overflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    user_id: UserId,
    shipping_address: String,
    billing_address: String,
    items: Vec<NewOrderItem>,
    line_totals: Vec<Money>,
    total_amount: Money,
}

impl NewOrder {
    pub fn new(
        user_id: UserId,
        items: Vec<NewOrderItem>,
        shipping_address: impl Into<String>,
        billing_address: impl Into<String>,
    ) -> Result<Self, OrderError> {
        if user_id.as_str().trim().is_empty() {
            return Err(OrderError::UserIdRequired);
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                });
            }
            if item.product_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.clone(),
                    price: item.product_price,
                });
            }
        }

        let line_totals = items
            .iter()
            .map(NewOrderItem::total_price)
            .collect::<Result<Vec<_>, _>>()?;
        let total_amount = Money::checked_sum(line_totals.iter().copied())?;

        Ok(Self {
            user_id,
            shipping_address: shipping_address.into(),
            billing_address: billing_address.into(),
            items,
            line_totals,
            total_amount,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn billing_address(&self) -> &str {
        &self.billing_address
    }

    pub fn items(&self) -> &[NewOrderItem] {
        &self.items
    }

    /// Items paired with their line totals.
    pub fn lines(&self) -> impl Iterator<Item = (&NewOrderItem, Money)> {
        self.items.iter().zip(self.line_totals.iter().copied())
    }

    pub fn order_status(&self) -> OrderStatus {
        OrderStatus::Pending
    }

    pub fn payment_status(&self) -> PaymentStatus {
        PaymentStatus::Unpaid
    }

    /// Sum of all line totals.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Builds the stored representation once the store has assigned ids.
    ///
    /// `item_ids` must be in the same order as [`NewOrder::items`].
    pub fn into_order(self, id: OrderId, item_ids: &[i64], now: DateTime<Utc>) -> Order {
        let items = self
            .items
            .into_iter()
            .zip(self.line_totals)
            .zip(item_ids)
            .map(|((item, total_price), item_id)| OrderItem {
                id: *item_id,
                order_id: id,
                total_price,
                product_id: item.product_id,
                product_price: item.product_price,
                quantity: item.quantity,
            })
            .collect();

        Order {
            id,
            user_id: self.user_id,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            total_amount: self.total_amount,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            created_at: now,
            updated_at: now,
            items,
        }
    }
}
