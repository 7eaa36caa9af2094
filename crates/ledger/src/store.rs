use async_trait::async_trait;
use common::{LineItem, Money, ProductId, UserId};

use crate::{Holding, HoldingError, Result, StoreError};

/// A user's funds: balance and the part of it held by in-flight checkouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Money,
    pub reserved: Money,
}

impl Wallet {
    pub(crate) fn from_holding(user_id: UserId, holding: Holding) -> Self {
        Self {
            user_id,
            balance: Money::from_cents(holding.total),
            reserved: Money::from_cents(holding.reserved),
        }
    }

    pub fn available(&self) -> Money {
        self.balance - self.reserved
    }
}

/// A product's stock: total quantity and the part of it held by in-flight checkouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reserved: i64,
}

impl Product {
    pub(crate) fn from_holding(product_id: ProductId, holding: Holding) -> Self {
        Self {
            product_id,
            quantity: holding.total,
            reserved: holding.reserved,
        }
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }
}

/// The funds ledger participant.
///
/// Each operation runs in one transaction with the wallet row locked.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Holds `amount` against the wallet's available balance.
    async fn reserve(&self, user_id: UserId, amount: Money) -> Result<Wallet>;

    /// Drops a hold. Releasing more than is reserved clamps at zero.
    async fn release(&self, user_id: UserId, amount: Money) -> Result<Wallet>;

    /// Deducts `amount` from the balance and from the reservation.
    async fn commit(&self, user_id: UserId, amount: Money) -> Result<Wallet>;

    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;
}

/// The product-inventory ledger participant.
///
/// A call covers every item in one transaction: if any item fails the
/// whole batch is rolled back. Items must arrive sorted by `ProductId`
/// so concurrent batches lock rows in the same order.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn reserve(&self, items: &[LineItem]) -> Result<()>;

    async fn release(&self, items: &[LineItem]) -> Result<()>;

    async fn commit(&self, items: &[LineItem]) -> Result<()>;

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;
}

/// The three protocol transitions, shared by every store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Reserve,
    Release,
    Commit,
}

impl Transition {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Transition::Reserve => "reserve",
            Transition::Release => "release",
            Transition::Commit => "commit",
        }
    }

    pub(crate) fn apply(
        &self,
        holding: Holding,
        amount: i64,
    ) -> std::result::Result<Holding, HoldingError> {
        match self {
            Transition::Reserve => holding.reserve(amount),
            Transition::Release => Ok(holding.release(amount)),
            Transition::Commit => holding.commit(amount),
        }
    }
}

pub(crate) fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(StoreError::InvalidAmount(amount));
    }
    Ok(())
}

pub(crate) fn wallet_error(user_id: UserId, err: HoldingError) -> StoreError {
    match err {
        HoldingError::Insufficient {
            requested,
            available,
        } => StoreError::InsufficientFunds {
            user_id,
            requested: Money::from_cents(requested),
            available: Money::from_cents(available),
        },
        HoldingError::CommitExceedsReservation {
            amount,
            total,
            reserved,
        } => StoreError::CommitExceedsReservation {
            entity: format!("wallet {user_id}"),
            amount,
            total,
            reserved,
        },
    }
}

pub(crate) fn product_error(product_id: ProductId, err: HoldingError) -> StoreError {
    match err {
        HoldingError::Insufficient {
            requested,
            available,
        } => StoreError::InsufficientStock {
            product_id,
            requested,
            available,
        },
        HoldingError::CommitExceedsReservation {
            amount,
            total,
            reserved,
        } => StoreError::CommitExceedsReservation {
            entity: format!("product {product_id}"),
            amount,
            total,
            reserved,
        },
    }
}

pub(crate) fn validate_items(items: &[LineItem]) -> Result<()> {
    for item in items {
        ensure_positive(item.quantity)?;
    }
    debug_assert!(
        items.is_sorted_by_key(|item| item.product_id),
        "product items must be sorted by id"
    );
    Ok(())
}
