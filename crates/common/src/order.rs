//! The checkout order driven through the saga.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Money, OrderId, ProductId, UserId};

/// Lifecycle status of a checkout order.
///
/// ```text
/// Pending ──┬──► Completed
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Completed => "Completed",
            OrderStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A product and the quantity to reserve/commit for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl LineItem {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A cart line with the unit price resolved by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
}

impl PricedLine {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// Reasons a checkout is rejected before any reservation is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderValidationError {
    #[error("invalid user id: {0}")]
    InvalidUser(UserId),

    #[error("cart is empty")]
    EmptyCart,

    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    #[error("invalid unit price {price} for product {product_id}")]
    InvalidPrice { product_id: ProductId, price: Money },

    #[error("order total must be positive, got {0}")]
    InvalidTotal(Money),

    #[error("order total overflows")]
    TotalOverflow,
}

/// A checkout spanning the funds ledger and the product-inventory ledger.
///
/// Created when checkout starts and mutated only by the saga orchestrator.
/// Once written to the outbox it is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub total: Money,
    pub status: OrderStatus,
}

impl CheckoutOrder {
    /// Creates a pending order from already-known parts.
    pub fn new(
        order_id: impl Into<OrderId>,
        user_id: UserId,
        items: Vec<LineItem>,
        total: Money,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id,
            items,
            total,
            status: OrderStatus::Pending,
        }
    }

    /// Starts a checkout: generates the order ID and computes the total as
    /// the sum of `unit_price × quantity` over all lines.
    pub fn start(
        user_id: UserId,
        lines: impl IntoIterator<Item = PricedLine>,
    ) -> Result<Self, OrderValidationError> {
        let mut items = Vec::new();
        let mut total = Money::zero();

        for line in lines {
            if line.quantity <= 0 {
                return Err(OrderValidationError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                });
            }
            if line.unit_price.is_negative() {
                return Err(OrderValidationError::InvalidPrice {
                    product_id: line.product_id,
                    price: line.unit_price,
                });
            }
            let line_total = line
                .unit_price
                .checked_multiply(line.quantity)
                .ok_or(OrderValidationError::TotalOverflow)?;
            total = total
                .checked_add(line_total)
                .ok_or(OrderValidationError::TotalOverflow)?;
            items.push(LineItem::new(line.product_id, line.quantity));
        }

        let order = Self::new(OrderId::new(), user_id, items, total);
        order.validate()?;
        Ok(order)
    }

    /// Checks the order can enter the saga.
    pub fn validate(&self) -> Result<(), OrderValidationError> {
        if !self.user_id.is_valid() {
            return Err(OrderValidationError::InvalidUser(self.user_id));
        }
        if self.items.is_empty() {
            return Err(OrderValidationError::EmptyCart);
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity <= 0) {
            return Err(OrderValidationError::InvalidQuantity {
                product_id: item.product_id,
                quantity: item.quantity,
            });
        }
        if !self.total.is_positive() {
            return Err(OrderValidationError::InvalidTotal(self.total));
        }
        Ok(())
    }

    /// Returns the items in ascending `ProductId` order, the lock
    /// acquisition order every participant call must follow.
    pub fn sorted_items(&self) -> Vec<LineItem> {
        let mut items = self.items.clone();
        items.sort_by_key(|item| item.product_id);
        items
    }

    pub fn mark_completed(&mut self) {
        self.status = OrderStatus::Completed;
    }

    pub fn mark_failed(&mut self) {
        self.status = OrderStatus::Failed;
    }
}
