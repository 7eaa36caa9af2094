use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{LineItem, Money, ProductId, UserId};
use tokio::sync::Mutex;

use crate::store::{Transition, ensure_positive, product_error, validate_items, wallet_error};
use crate::{Holding, Product, ProductStore, Result, StoreError, Wallet, WalletStore};

/// Failure and latency injection shared by the in-memory stores.
#[derive(Debug, Clone, Default)]
struct Faults {
    deadlocks: Arc<AtomicU32>,
    latency_ms: Arc<AtomicU64>,
}

impl Faults {
    async fn before_call(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self
            .deadlocks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "deadlock detected".to_string(),
            )));
        }
        Ok(())
    }
}

/// In-memory wallet store for testing.
///
/// The map mutex plays the role of the row lock: each call holds it for
/// the whole read-modify-write.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWalletStore {
    wallets: Arc<Mutex<HashMap<UserId, Holding>>>,
    faults: Faults,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a wallet with the given balance and nothing reserved.
    pub async fn insert_wallet(&self, user_id: UserId, balance: Money) {
        self.wallets
            .lock()
            .await
            .insert(user_id, Holding::new(balance.cents(), 0));
    }

    /// Makes the next `count` mutating calls fail with a deadlock error.
    pub fn inject_deadlocks(&self, count: u32) {
        self.faults.deadlocks.store(count, Ordering::SeqCst);
    }

    /// Delays every mutating call by `latency` before it takes the lock.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn apply(
        &self,
        transition: Transition,
        user_id: UserId,
        amount: Money,
    ) -> Result<Wallet> {
        ensure_positive(amount.cents())?;
        self.faults.before_call().await?;

        let mut wallets = self.wallets.lock().await;
        let current = *wallets
            .get(&user_id)
            .ok_or(StoreError::WalletNotFound(user_id))?;
        let next = transition
            .apply(current, amount.cents())
            .map_err(|e| wallet_error(user_id, e))?;
        wallets.insert(user_id, next);

        tracing::debug!(
            %user_id,
            op = transition.as_str(),
            amount = amount.cents(),
            balance = next.total,
            reserved = next.reserved,
            "wallet updated"
        );
        Ok(Wallet::from_holding(user_id, next))
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn reserve(&self, user_id: UserId, amount: Money) -> Result<Wallet> {
        self.apply(Transition::Reserve, user_id, amount).await
    }

    async fn release(&self, user_id: UserId, amount: Money) -> Result<Wallet> {
        self.apply(Transition::Release, user_id, amount).await
    }

    async fn commit(&self, user_id: UserId, amount: Money) -> Result<Wallet> {
        self.apply(Transition::Commit, user_id, amount).await
    }

    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.lock().await;
        Ok(wallets
            .get(&user_id)
            .map(|h| Wallet::from_holding(user_id, *h)))
    }
}

/// In-memory product store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductStore {
    products: Arc<Mutex<HashMap<ProductId, Holding>>>,
    faults: Faults,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a product with the given stock and nothing reserved.
    pub async fn insert_product(&self, product_id: ProductId, quantity: i64) {
        self.products
            .lock()
            .await
            .insert(product_id, Holding::new(quantity, 0));
    }

    /// Makes the next `count` mutating calls fail with a deadlock error.
    pub fn inject_deadlocks(&self, count: u32) {
        self.faults.deadlocks.store(count, Ordering::SeqCst);
    }

    /// Delays every mutating call by `latency` before it takes the lock.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn apply(&self, transition: Transition, items: &[LineItem]) -> Result<()> {
        validate_items(items)?;
        self.faults.before_call().await?;

        let mut products = self.products.lock().await;

        // Stage every row first so a failing item leaves the batch untouched.
        let mut staged: HashMap<ProductId, Holding> = HashMap::new();
        for item in items {
            let current = match staged.get(&item.product_id) {
                Some(holding) => *holding,
                None => *products
                    .get(&item.product_id)
                    .ok_or(StoreError::ProductNotFound(item.product_id))?,
            };
            let next = transition
                .apply(current, item.quantity)
                .map_err(|e| product_error(item.product_id, e))?;
            staged.insert(item.product_id, next);
        }
        products.extend(staged);

        tracing::debug!(
            op = transition.as_str(),
            items = items.len(),
            "products updated"
        );
        Ok(())
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn reserve(&self, items: &[LineItem]) -> Result<()> {
        self.apply(Transition::Reserve, items).await
    }

    async fn release(&self, items: &[LineItem]) -> Result<()> {
        self.apply(Transition::Release, items).await
    }

    async fn commit(&self, items: &[LineItem]) -> Result<()> {
        self.apply(Transition::Commit, items).await
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let products = self.products.lock().await;
        Ok(products
            .get(&product_id)
            .map(|h| Product::from_holding(product_id, *h)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new(1)
    }

    #[tokio::test]
    async fn test_reserve_commit_wallet() {
        let store = InMemoryWalletStore::new();
        store.insert_wallet(user(), Money::from_cents(5000)).await;

        let wallet = store.reserve(user(), Money::from_cents(1000)).await.unwrap();
        assert_eq!(wallet.reserved, Money::from_cents(1000));
        assert_eq!(wallet.available(), Money::from_cents(4000));

        let wallet = store.commit(user(), Money::from_cents(1000)).await.unwrap();
        assert_eq!(wallet.balance, Money::from_cents(4000));
        assert_eq!(wallet.reserved, Money::zero());
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let store = InMemoryWalletStore::new();
        store.insert_wallet(user(), Money::from_cents(500)).await;

        let err = store
            .reserve(user(), Money::from_cents(501))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));

        let wallet = store.get_wallet(user()).await.unwrap().unwrap();
        assert_eq!(wallet.reserved, Money::zero());
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let store = InMemoryWalletStore::new();
        let err = store
            .reserve(UserId::new(99), Money::from_cents(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WalletNotFound(_)));
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let store = InMemoryWalletStore::new();
        store.insert_wallet(user(), Money::from_cents(500)).await;
        let err = store.reserve(user(), Money::zero()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidAmount(0)));
    }

    #[tokio::test]
    async fn test_injected_deadlocks_are_consumed() {
        let store = InMemoryWalletStore::new();
        store.insert_wallet(user(), Money::from_cents(500)).await;
        store.inject_deadlocks(1);

        let err = store
            .reserve(user(), Money::from_cents(100))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(store.reserve(user(), Money::from_cents(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_product_batch_is_all_or_nothing() {
        let store = InMemoryProductStore::new();
        store.insert_product(ProductId::new(1), 10).await;
        store.insert_product(ProductId::new(2), 1).await;

        let items = vec![
            LineItem::new(ProductId::new(1), 5),
            LineItem::new(ProductId::new(2), 2),
        ];
        let err = store.reserve(&items).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock { requested: 2, available: 1, .. }
        ));

        let first = store.get_product(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!(first.reserved, 0);
    }

    #[tokio::test]
    async fn test_product_missing_row_fails_batch() {
        let store = InMemoryProductStore::new();
        store.insert_product(ProductId::new(1), 10).await;

        let items = vec![
            LineItem::new(ProductId::new(1), 1),
            LineItem::new(ProductId::new(3), 1),
        ];
        let err = store.reserve(&items).await.unwrap_err();
        assert!(matches!(err, StoreError::ProductNotFound(id) if id == ProductId::new(3)));
    }

    #[tokio::test]
    async fn test_product_commit_deducts_stock() {
        let store = InMemoryProductStore::new();
        store.insert_product(ProductId::new(1), 10).await;
        let items = vec![LineItem::new(ProductId::new(1), 3)];

        store.reserve(&items).await.unwrap();
        store.commit(&items).await.unwrap();

        let product = store.get_product(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!(product.quantity, 7);
        assert_eq!(product.reserved, 0);
    }
}
