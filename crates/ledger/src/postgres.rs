use async_trait::async_trait;
use common::{LineItem, Money, ProductId, UserId};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::store::{Transition, ensure_positive, product_error, validate_items, wallet_error};
use crate::{Holding, Product, ProductStore, Result, StoreError, Wallet, WalletStore};

/// PostgreSQL-backed wallet ledger.
#[derive(Clone)]
pub struct PostgresWalletStore {
    pool: PgPool,
}

impl PostgresWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_wallet(
        tx: &mut Transaction<'static, Postgres>,
        user_id: UserId,
    ) -> Result<Holding> {
        let row =
            sqlx::query("SELECT balance, reserved FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id.as_i64())
                .fetch_optional(&mut **tx)
                .await?
                .ok_or(StoreError::WalletNotFound(user_id))?;

        Ok(Holding::new(row.try_get("balance")?, row.try_get("reserved")?))
    }

    #[tracing::instrument(skip(self), fields(op = transition.as_str()))]
    async fn apply(
        &self,
        transition: Transition,
        user_id: UserId,
        amount: Money,
    ) -> Result<Wallet> {
        ensure_positive(amount.cents())?;

        let mut tx = self.pool.begin().await?;
        let current = Self::lock_wallet(&mut tx, user_id).await?;

        // Returning early drops `tx`, which rolls it back and releases the lock.
        let next = transition
            .apply(current, amount.cents())
            .map_err(|e| wallet_error(user_id, e))?;

        sqlx::query("UPDATE wallets SET balance = $1, reserved = $2 WHERE user_id = $3")
            .bind(next.total)
            .bind(next.reserved)
            .bind(user_id.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Wallet::from_holding(user_id, next))
    }
}

#[async_trait]
impl WalletStore for PostgresWalletStore {
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
        let row = sqlx::query("SELECT balance, reserved FROM wallets WHERE user_id = $1")
            .bind(user_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Wallet::from_holding(
                user_id,
                Holding::new(row.try_get("balance")?, row.try_get("reserved")?),
            ))),
            None => Ok(None),
        }
    }
}

/// PostgreSQL-backed product ledger.
#[derive(Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_product(
        tx: &mut Transaction<'static, Postgres>,
        product_id: ProductId,
    ) -> Result<Holding> {
        let row = sqlx::query(
            "SELECT quantity, reserved FROM products WHERE product_id = $1 FOR UPDATE",
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::ProductNotFound(product_id))?;

        Ok(Holding::new(row.try_get("quantity")?, row.try_get("reserved")?))
    }

    /// Applies `transition` to every item inside a single transaction.
    ///
    /// Rows are locked in the order given; any failing item rolls back the
    /// whole batch.
    #[tracing::instrument(skip(self, items), fields(op = transition.as_str(), items = items.len()))]
    async fn apply(&self, transition: Transition, items: &[LineItem]) -> Result<()> {
        validate_items(items)?;

        let mut tx = self.pool.begin().await?;
        for item in items {
            let current = Self::lock_product(&mut tx, item.product_id).await?;
            let next = transition
                .apply(current, item.quantity)
                .map_err(|e| product_error(item.product_id, e))?;

            sqlx::query(
                "UPDATE products SET quantity = $1, reserved = $2 WHERE product_id = $3",
            )
            .bind(next.total)
            .bind(next.reserved)
            .bind(item.product_id.as_i64())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
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
        let row = sqlx::query("SELECT quantity, reserved FROM products WHERE product_id = $1")
            .bind(product_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Product::from_holding(
                product_id,
                Holding::new(row.try_get("quantity")?, row.try_get("reserved")?),
            ))),
            None => Ok(None),
        }
    }
}
