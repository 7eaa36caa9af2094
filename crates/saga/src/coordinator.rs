//! Saga coordinator for the checkout transaction.

use common::{CheckoutOrder, LineItem};
use ledger::StoreError;
use outbox::OutboxWriter;
use tokio::time::Instant;

use crate::error::{ParticipantError, SagaError};
use crate::services::{MoneyReserver, ProductsReserver};
use crate::state::SagaState;
use crate::steps::{CompensatingAction, CompensationPoint, SagaStep};

/// Orchestrates checkout across the funds and stock participants.
///
/// The coordinator runs the five steps of [`SagaStep::SEQUENCE`] strictly
/// in order. When a step fails it issues the compensating actions for the
/// point the saga had reached and returns the original failure. It holds no
/// state between executions.
pub struct SagaCoordinator<M, P, O>
where
    M: MoneyReserver,
    P: ProductsReserver,
    O: OutboxWriter,
{
    money: M,
    products: P,
    outbox: O,
}

impl<M, P, O> SagaCoordinator<M, P, O>
where
    M: MoneyReserver,
    P: ProductsReserver,
    O: OutboxWriter,
{
    /// Creates a new saga coordinator.
    pub fn new(money: M, products: P, outbox: O) -> Self {
        Self {
            money,
            products,
            outbox,
        }
    }

    /// Executes the checkout saga for `order`.
    ///
    /// On success the order is `Completed` and its event is in the outbox.
    /// On failure the order is `Failed`, whatever was still held has been
    /// released, and the error names the step that failed.
    pub async fn execute(&self, order: &mut CheckoutOrder) -> Result<(), SagaError> {
        self.run(order, None).await
    }

    /// Like [`execute`](Self::execute), but a forward step still running at
    /// `deadline` is abandoned and fails the saga. Compensation is not bound
    /// by the deadline.
    pub async fn execute_with_deadline(
        &self,
        order: &mut CheckoutOrder,
        deadline: Instant,
    ) -> Result<(), SagaError> {
        self.run(order, Some(deadline)).await
    }

    #[tracing::instrument(
        skip(self, order, deadline),
        fields(order_id = %order.order_id, user_id = %order.user_id, total = order.total.cents())
    )]
    async fn run(
        &self,
        order: &mut CheckoutOrder,
        deadline: Option<Instant>,
    ) -> Result<(), SagaError> {
        if order.status.is_terminal() {
            return Err(SagaError::AlreadyFinished {
                order_id: order.order_id.clone(),
                status: order.status,
            });
        }
        order.validate()?;

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        // One lock order for every saga touching these products.
        let items = order.sorted_items();
        let mut state = SagaState::Init;

        for step in SagaStep::SEQUENCE {
            tracing::info!(step = step.name(), "saga step started");

            let outcome = match deadline {
                Some(deadline) => {
                    self.run_step_until(step, order, &items, saga_start, deadline)
                        .await
                }
                None => self.run_step(step, order, &items).await,
            };

            if let Err(source) = outcome {
                tracing::warn!(step = step.name(), %state, error = %source, "saga step failed");
                order.mark_failed();

                if let Some(point) = step.compensation() {
                    state = SagaState::RollingBack;
                    tracing::info!(%state, actions = point.actions().len(), "rolling back");
                    let reconcile = step.needs_reconciliation(source.outcome_unknown());
                    self.compensate(point, step, reconcile, order, &items).await;
                }
                state = SagaState::Failed;

                metrics::counter!("saga_failed", "step" => step.name()).increment(1);
                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());
                tracing::warn!(%state, step = step.name(), "saga failed");

                return Err(SagaError::StepFailed { step, source });
            }

            state = step.completed_state();
            tracing::debug!(%state, "saga step completed");
        }

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(%state, duration, "saga completed successfully");

        Ok(())
    }

    /// Runs `step`, abandoning it at `deadline`. A step that never started
    /// is safe to retry; one cut off midway is only if it is a reservation.
    async fn run_step_until(
        &self,
        step: SagaStep,
        order: &mut CheckoutOrder,
        items: &[LineItem],
        saga_start: Instant,
        deadline: Instant,
    ) -> Result<(), ParticipantError> {
        let expired = |retryable: bool| {
            ParticipantError::Store(StoreError::DeadlineExceeded {
                op: step.name().to_string(),
                timeout: deadline.saturating_duration_since(saga_start),
                retryable,
            })
        };

        if Instant::now() >= deadline {
            return Err(expired(true));
        }

        tokio::time::timeout_at(deadline, self.run_step(step, order, items))
            .await
            .unwrap_or_else(|_| Err(expired(step.safe_on_timeout())))
    }

    async fn run_step(
        &self,
        step: SagaStep,
        order: &mut CheckoutOrder,
        items: &[LineItem],
    ) -> Result<(), ParticipantError> {
        match step {
            SagaStep::ReserveFunds => {
                self.money.reserve(order.user_id, order.total).await?;
            }
            SagaStep::ReserveProducts => {
                accepted(self.products.reserve(items).await?, "reserve")?;
            }
            SagaStep::CommitFunds => {
                self.money.commit(order.user_id, order.total).await?;
            }
            SagaStep::CommitProducts => {
                accepted(self.products.commit(items).await?, "commit")?;
            }
            SagaStep::SaveEvent => {
                order.mark_completed();
                self.outbox.save_event(order).await?;
            }
        }
        Ok(())
    }

    /// Issues the releases for `point`. Failures are logged and counted,
    /// never returned.
    #[tracing::instrument(skip(self, order, items), fields(failed_step = failed_step.name()))]
    async fn compensate(
        &self,
        point: CompensationPoint,
        failed_step: SagaStep,
        reconcile: bool,
        order: &CheckoutOrder,
        items: &[LineItem],
    ) {
        if reconcile {
            metrics::counter!("saga_manual_reconciliation").increment(1);
            tracing::error!(
                order_id = %order.order_id,
                user_id = %order.user_id,
                total = order.total.cents(),
                manual_reconciliation = true,
                "funds may have been deducted before the saga failed; releases will not refund them"
            );
        }

        for action in point.actions() {
            let result = match action {
                CompensatingAction::ReleaseProducts => self
                    .products
                    .release(items)
                    .await
                    .and_then(|ok| accepted(ok, "release")),
                CompensatingAction::ReleaseFunds => self
                    .money
                    .release(order.user_id, order.total)
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => tracing::info!(action = action.as_str(), "compensation step completed"),
                Err(e) => {
                    metrics::counter!("saga_compensation_failures").increment(1);
                    tracing::error!(
                        action = action.as_str(),
                        error = %e,
                        manual_reconciliation = reconcile,
                        "compensation step failed"
                    );
                }
            }
        }
    }
}

fn accepted(ok: bool, op: &str) -> Result<(), ParticipantError> {
    if ok {
        Ok(())
    } else {
        Err(ParticipantError::Rejected(format!(
            "inventory declined {op}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{LineItem, Money, OrderStatus, ProductId, UserId};
    use ledger::InMemoryProductStore;

    use super::*;
    use crate::services::{
        InMemoryMoneyReserver, InMemoryOutboxWriter, InMemoryProductsReserver, MoneyReserver,
        ParticipantOp, ProductsParticipant, ReservationToken,
    };

    /// Funds participant whose commit applies but never answers in time.
    ///
    /// With `stall` set the commit hangs for that long first. Without it
    /// the commit reports that its own call deadline ran out.
    #[derive(Clone)]
    struct StalledCommit {
        inner: InMemoryMoneyReserver,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl MoneyReserver for StalledCommit {
        async fn reserve(
            &self,
            user_id: UserId,
            amount: Money,
        ) -> Result<ReservationToken, ParticipantError> {
            self.inner.reserve(user_id, amount).await
        }

        async fn commit(
            &self,
            user_id: UserId,
            amount: Money,
        ) -> Result<ReservationToken, ParticipantError> {
            let token = self.inner.commit(user_id, amount).await?;
            match self.stall {
                Some(stall) => {
                    tokio::time::sleep(stall).await;
                    Ok(token)
                }
                None => Err(ParticipantError::Store(StoreError::DeadlineExceeded {
                    op: "wallet commit".to_string(),
                    timeout: Duration::from_secs(2),
                    retryable: false,
                })),
            }
        }

        async fn release(
            &self,
            user_id: UserId,
            amount: Money,
        ) -> Result<ReservationToken, ParticipantError> {
            self.inner.release(user_id, amount).await
        }
    }

    fn coordinator() -> (
        SagaCoordinator<InMemoryMoneyReserver, InMemoryProductsReserver, InMemoryOutboxWriter>,
        InMemoryMoneyReserver,
        InMemoryProductsReserver,
        InMemoryOutboxWriter,
    ) {
        let money = InMemoryMoneyReserver::new();
        let products = InMemoryProductsReserver::new();
        let outbox = InMemoryOutboxWriter::new();
        let coordinator = SagaCoordinator::new(money.clone(), products.clone(), outbox.clone());
        (coordinator, money, products, outbox)
    }

    fn order() -> CheckoutOrder {
        CheckoutOrder::new(
            "order-1",
            UserId::new(1),
            vec![
                LineItem::new(ProductId::new(3), 1),
                LineItem::new(ProductId::new(1), 2),
            ],
            Money::from_cents(1500),
        )
    }

    #[tokio::test]
    async fn test_products_are_reserved_in_id_order() {
        let (coordinator, _, products, _) = coordinator();
        let mut order = order();

        coordinator.execute(&mut order).await.unwrap();

        let (_, items) = &products.calls()[0];
        let ids: Vec<i64> = items.iter().map(|i| i.product_id.as_i64()).collect();
        assert_eq!(ids, vec![1, 3]);
        // The order itself keeps the caller's item order.
        assert_eq!(order.items[0].product_id, ProductId::new(3));
    }

    #[tokio::test]
    async fn test_invalid_order_touches_nothing() {
        let (coordinator, money, products, _) = coordinator();
        let mut order = CheckoutOrder::new("order-1", UserId::new(1), vec![], Money::zero());

        let err = coordinator.execute(&mut order).await.unwrap_err();

        assert!(matches!(err, SagaError::Validation(_)));
        assert!(money.calls().is_empty());
        assert!(products.calls().is_empty());
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_finished_order_is_refused() {
        let (coordinator, money, _, _) = coordinator();
        let mut order = order();
        order.mark_completed();

        let err = coordinator.execute(&mut order).await.unwrap_err();

        assert!(matches!(err, SagaError::AlreadyFinished { .. }));
        assert!(money.calls().is_empty());
    }

    #[tokio::test]
    async fn test_declined_reservation_releases_funds() {
        let (coordinator, money, products, _) = coordinator();
        products.set_decline_on(ParticipantOp::Reserve, true);
        let mut order = order();

        let err = coordinator.execute(&mut order).await.unwrap_err();

        assert!(err.is_business());
        assert_eq!(err.failed_step(), Some(SagaStep::ReserveProducts));
        assert_eq!(money.call_count(ParticipantOp::Release), 1);
        assert_eq!(products.call_count(ParticipantOp::Release), 0);
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_funds_commit_failure_releases_both() {
        let (coordinator, money, products, outbox) = coordinator();
        money.set_fail_on(ParticipantOp::Commit, true);
        let mut order = order();

        let err = coordinator.execute(&mut order).await.unwrap_err();

        assert!(err.to_string().starts_with("funds commit failed"));
        assert!(!err.requires_reconciliation());
        assert_eq!(products.call_count(ParticipantOp::Commit), 0);
        assert_eq!(products.call_count(ParticipantOp::Release), 1);
        assert_eq!(money.call_count(ParticipantOp::Release), 1);
        assert!(outbox.saved().await.is_empty());
    }

    #[tokio::test]
    async fn test_compensation_failure_keeps_original_error() {
        let (coordinator, money, products, _) = coordinator();
        products.set_fail_on(ParticipantOp::Reserve, true);
        money.set_fail_on(ParticipantOp::Release, true);
        let mut order = order();

        let err = coordinator.execute(&mut order).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "products reservation failed: inventory reserve unavailable"
        );
        assert_eq!(money.call_count(ParticipantOp::Release), 1);
    }

    #[tokio::test]
    async fn test_outbox_failure_compensates_and_fails_order() {
        let (coordinator, money, products, outbox) = coordinator();
        outbox.set_fail(true);
        let mut order = order();

        let err = coordinator.execute(&mut order).await.unwrap_err();

        assert_eq!(err.failed_step(), Some(SagaStep::SaveEvent));
        assert_eq!(products.call_count(ParticipantOp::Release), 1);
        assert_eq!(money.call_count(ParticipantOp::Release), 1);
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_funds_commit_timeout_flags_reconciliation() {
        let money = InMemoryMoneyReserver::new();
        let products = InMemoryProductsReserver::new();
        let stalled = StalledCommit {
            inner: money.clone(),
            stall: None,
        };
        let coordinator =
            SagaCoordinator::new(stalled, products.clone(), InMemoryOutboxWriter::new());
        let mut order = order();

        let err = coordinator.execute(&mut order).await.unwrap_err();

        assert_eq!(err.failed_step(), Some(SagaStep::CommitFunds));
        assert!(err.requires_reconciliation());
        assert_eq!(products.call_count(ParticipantOp::Release), 1);
        assert_eq!(money.call_count(ParticipantOp::Release), 1);
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_funds_commit_flags_reconciliation() {
        let money = InMemoryMoneyReserver::new();
        let products = InMemoryProductsReserver::new();
        let stalled = StalledCommit {
            inner: money.clone(),
            stall: Some(Duration::from_secs(1)),
        };
        let coordinator =
            SagaCoordinator::new(stalled, products.clone(), InMemoryOutboxWriter::new());
        let mut order = order();
        let start = Instant::now();

        let err = coordinator
            .execute_with_deadline(&mut order, start + Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(err.failed_step(), Some(SagaStep::CommitFunds));
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(err.requires_reconciliation());
        assert_eq!(products.call_count(ParticipantOp::Commit), 0);
        assert_eq!(products.call_count(ParticipantOp::Release), 1);
        assert_eq!(money.call_count(ParticipantOp::Release), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_slow_stock_reservation() {
        let money = InMemoryMoneyReserver::new();
        let store = InMemoryProductStore::new();
        store.insert_product(ProductId::new(1), 10).await;
        store.insert_product(ProductId::new(3), 10).await;
        store.set_latency(Duration::from_millis(500));
        let coordinator = SagaCoordinator::new(
            money.clone(),
            ProductsParticipant::new(store),
            InMemoryOutboxWriter::new(),
        );
        let mut order = order();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(100);

        let err = coordinator
            .execute_with_deadline(&mut order, deadline)
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_millis(150));
        assert_eq!(err.failed_step(), Some(SagaStep::ReserveProducts));
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(!err.requires_reconciliation());
        assert_eq!(money.call_count(ParticipantOp::Release), 1);
        assert_eq!(money.call_count(ParticipantOp::Commit), 0);
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_passed_deadline_runs_no_step() {
        let (coordinator, money, _, _) = coordinator();
        let mut order = order();

        let err = coordinator
            .execute_with_deadline(&mut order, Instant::now())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SagaError::StepFailed {
                step: SagaStep::ReserveFunds,
                source: ParticipantError::Store(StoreError::DeadlineExceeded {
                    retryable: true,
                    ..
                }),
            }
        ));
        assert!(money.calls().is_empty());
    }
}
