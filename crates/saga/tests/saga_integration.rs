//! Checkout saga behavior against recording participants.

use common::{CheckoutOrder, LineItem, Money, OrderStatus, ProductId, UserId};
use saga::{
    InMemoryMoneyReserver, InMemoryOutboxWriter, InMemoryProductsReserver, ParticipantOp,
    SagaCoordinator, SagaError, SagaStep,
};

type TestCoordinator =
    SagaCoordinator<InMemoryMoneyReserver, InMemoryProductsReserver, InMemoryOutboxWriter>;

struct TestHarness {
    coordinator: TestCoordinator,
    money: InMemoryMoneyReserver,
    products: InMemoryProductsReserver,
    outbox: InMemoryOutboxWriter,
}

impl TestHarness {
    fn new() -> Self {
        let money = InMemoryMoneyReserver::new();
        let products = InMemoryProductsReserver::new();
        let outbox = InMemoryOutboxWriter::new();

        let coordinator = SagaCoordinator::new(money.clone(), products.clone(), outbox.clone());

        Self {
            coordinator,
            money,
            products,
            outbox,
        }
    }

    fn order() -> CheckoutOrder {
        CheckoutOrder::new(
            "order-123",
            UserId::new(1),
            vec![LineItem::new(ProductId::new(1), 1)],
            Money::from_cents(1000),
        )
    }
}

#[tokio::test]
async fn test_happy_path_saves_completed_event() {
    let h = TestHarness::new();
    let mut order = TestHarness::order();

    h.coordinator.execute(&mut order).await.unwrap();

    assert_eq!(order.status, OrderStatus::Completed);

    let saved = h.outbox.saved().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].order_id.as_str(), "order-123");
    assert_eq!(saved[0].status, OrderStatus::Completed);

    assert_eq!(
        h.money
            .calls()
            .iter()
            .map(|(op, _, _)| *op)
            .collect::<Vec<_>>(),
        vec![ParticipantOp::Reserve, ParticipantOp::Commit]
    );
    assert_eq!(h.products.call_count(ParticipantOp::Reserve), 1);
    assert_eq!(h.products.call_count(ParticipantOp::Commit), 1);
    assert_eq!(h.products.call_count(ParticipantOp::Release), 0);
}

#[tokio::test]
async fn test_funds_reservation_failure_stops_immediately() {
    let h = TestHarness::new();
    h.money.set_reject_on(ParticipantOp::Reserve, true);
    let mut order = TestHarness::order();

    let err = h.coordinator.execute(&mut order).await.unwrap_err();

    assert!(err.is_business());
    assert_eq!(err.failed_step(), Some(SagaStep::ReserveFunds));
    assert!(err.to_string().starts_with("funds reservation failed"));

    // Only the failed reserve reached a participant.
    assert_eq!(h.money.calls().len(), 1);
    assert!(h.products.calls().is_empty());
    assert!(h.outbox.saved().await.is_empty());
    assert_eq!(order.status, OrderStatus::Failed);
}

#[tokio::test]
async fn test_products_reservation_failure_releases_funds_once() {
    let h = TestHarness::new();
    h.products.set_fail_on(ParticipantOp::Reserve, true);
    let mut order = TestHarness::order();

    let err = h.coordinator.execute(&mut order).await.unwrap_err();

    assert_eq!(err.failed_step(), Some(SagaStep::ReserveProducts));
    assert_eq!(
        h.money.calls(),
        vec![
            (ParticipantOp::Reserve, UserId::new(1), Money::from_cents(1000)),
            (ParticipantOp::Release, UserId::new(1), Money::from_cents(1000)),
        ]
    );
    assert_eq!(h.money.call_count(ParticipantOp::Commit), 0);
    assert_eq!(h.products.call_count(ParticipantOp::Commit), 0);
    assert_eq!(h.products.call_count(ParticipantOp::Release), 0);
    assert!(h.outbox.saved().await.is_empty());
}

#[tokio::test]
async fn test_products_commit_failure_compensates_both() {
    let h = TestHarness::new();
    h.products.set_fail_on(ParticipantOp::Commit, true);
    let mut order = TestHarness::order();

    let err = h.coordinator.execute(&mut order).await.unwrap_err();

    assert!(err.to_string().contains("products commit failed"));
    assert!(matches!(
        err,
        SagaError::StepFailed {
            step: SagaStep::CommitProducts,
            ..
        }
    ));

    assert_eq!(h.products.call_count(ParticipantOp::Release), 1);
    assert_eq!(
        h.money.calls().last(),
        Some(&(ParticipantOp::Release, UserId::new(1), Money::from_cents(1000)))
    );
    assert!(h.outbox.saved().await.is_empty());
    assert_eq!(order.status, OrderStatus::Failed);
}

#[tokio::test]
async fn test_products_release_happens_before_funds_release() {
    let h = TestHarness::new();
    h.money.set_fail_on(ParticipantOp::Commit, true);
    let mut order = TestHarness::order();

    h.coordinator.execute(&mut order).await.unwrap_err();

    let product_ops: Vec<_> = h.products.calls().into_iter().map(|(op, _)| op).collect();
    assert_eq!(
        product_ops,
        vec![ParticipantOp::Reserve, ParticipantOp::Release]
    );
    assert_eq!(h.money.call_count(ParticipantOp::Release), 1);
}

#[tokio::test]
async fn test_order_cannot_run_twice() {
    let h = TestHarness::new();
    let mut order = TestHarness::order();

    h.coordinator.execute(&mut order).await.unwrap();
    let err = h.coordinator.execute(&mut order).await.unwrap_err();

    assert!(matches!(err, SagaError::AlreadyFinished { .. }));
    assert_eq!(h.outbox.saved().await.len(), 1);
}
