//! Participants backed by the local ledger stores.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use common::{LineItem, Money, UserId};
use ledger::{ProductStore, RetryPolicy, StoreError, WalletStore, with_retry_until};
use tokio::time::Instant;

use super::{MoneyReserver, ParticipantOp, ProductsReserver, ReservationToken};
use crate::error::ParticipantError;

/// Default bound on a single store call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Retry and deadline settings shared by the ledger participants.
#[derive(Debug, Clone, Copy)]
struct CallGuard {
    retry: RetryPolicy,
    timeout: Duration,
}

impl CallGuard {
    /// Runs `f` under the retry policy with one deadline for the whole call,
    /// backoff included. Running out of time counts as transient only when
    /// `op` is safe to repeat.
    async fn run<T, F, Fut>(&self, op_name: &str, op: ParticipantOp, f: F) -> ledger::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ledger::Result<T>>,
    {
        let deadline = Instant::now() + self.timeout;
        let attempts = with_retry_until(&self.retry, op_name, Some(deadline), f);

        match tokio::time::timeout_at(deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::DeadlineExceeded {
                op: op_name.to_string(),
                timeout: self.timeout,
                retryable: op.retry_on_timeout(),
            }),
        }
    }
}

/// Funds participant over a [`WalletStore`].
pub struct WalletParticipant<S> {
    store: S,
    guard: CallGuard,
}

impl<S: WalletStore> WalletParticipant<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, RetryPolicy::default(), DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_policy(store: S, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            guard: CallGuard { retry, timeout },
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self), fields(op = op.as_str()))]
    async fn call(
        &self,
        op: ParticipantOp,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        let op_name = format!("wallet {op}");
        let wallet = self
            .guard
            .run(&op_name, op, || async move {
                match op {
                    ParticipantOp::Reserve => self.store.reserve(user_id, amount).await,
                    ParticipantOp::Commit => self.store.commit(user_id, amount).await,
                    ParticipantOp::Release => self.store.release(user_id, amount).await,
                }
            })
            .await?;

        tracing::debug!(
            balance = wallet.balance.cents(),
            reserved = wallet.reserved.cents(),
            "wallet updated"
        );

        Ok(ReservationToken {
            reference: format!("wallet:{user_id}:{op}"),
            user_id,
            amount,
        })
    }
}

#[async_trait]
impl<S: WalletStore> MoneyReserver for WalletParticipant<S> {
    async fn reserve(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        self.call(ParticipantOp::Reserve, user_id, amount).await
    }

    async fn commit(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        self.call(ParticipantOp::Commit, user_id, amount).await
    }

    async fn release(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        self.call(ParticipantOp::Release, user_id, amount).await
    }
}

/// Stock participant over a [`ProductStore`].
///
/// A store rejection surfaces as an error carrying the reason, so this
/// participant never answers `Ok(false)`.
pub struct ProductsParticipant<S> {
    store: S,
    guard: CallGuard,
}

impl<S: ProductStore> ProductsParticipant<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, RetryPolicy::default(), DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_policy(store: S, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            guard: CallGuard { retry, timeout },
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self, items), fields(op = op.as_str(), items = items.len()))]
    async fn call(&self, op: ParticipantOp, items: &[LineItem]) -> Result<bool, ParticipantError> {
        let op_name = format!("inventory {op}");
        self.guard
            .run(&op_name, op, || async move {
                match op {
                    ParticipantOp::Reserve => self.store.reserve(items).await,
                    ParticipantOp::Commit => self.store.commit(items).await,
                    ParticipantOp::Release => self.store.release(items).await,
                }
            })
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl<S: ProductStore> ProductsReserver for ProductsParticipant<S> {
    async fn reserve(&self, items: &[LineItem]) -> Result<bool, ParticipantError> {
        self.call(ParticipantOp::Reserve, items).await
    }

    async fn commit(&self, items: &[LineItem]) -> Result<bool, ParticipantError> {
        self.call(ParticipantOp::Commit, items).await
    }

    async fn release(&self, items: &[LineItem]) -> Result<bool, ParticipantError> {
        self.call(ParticipantOp::Release, items).await
    }
}
