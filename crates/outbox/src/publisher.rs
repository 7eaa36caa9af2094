use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{OutboxRepository, Producer, Result};

/// Publisher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Maximum rows claimed per poll.
    pub batch_size: usize,
}

impl OutboxConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_BATCH_SIZE: usize = 10;
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub processed: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.failed == 0
    }
}

/// Relays pending outbox rows to a broker.
pub struct OutboxPublisher<R, P> {
    repository: R,
    producer: P,
    config: OutboxConfig,
}

impl<R, P> OutboxPublisher<R, P>
where
    R: OutboxRepository,
    P: Producer,
{
    pub fn new(repository: R, producer: P, config: OutboxConfig) -> Self {
        Self {
            repository,
            producer,
            config,
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Claims one batch of pending rows and publishes each of them.
    ///
    /// Every row is delivered to the topic named by its event type, keyed by
    /// aggregate ID. A row the broker acknowledges becomes `processed`; a row
    /// the broker rejects becomes `failed` and is not retried. Status changes
    /// are committed together when the batch ends.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<PublishReport> {
        let mut batch = self.repository.claim_pending(self.config.batch_size).await?;
        let events = batch.events().to_vec();
        let mut report = PublishReport::default();

        for event in &events {
            match self
                .producer
                .produce(&event.event_type, &event.aggregate_id, &event.payload)
                .await
            {
                Ok(_) => {
                    batch.mark_processed(event.id).await?;
                    report.processed += 1;
                    debug!(
                        event_id = %event.id,
                        aggregate_id = %event.aggregate_id,
                        "Event published"
                    );
                }
                Err(e) => {
                    batch.mark_failed(event.id).await?;
                    report.failed += 1;
                    warn!(
                        event_id = %event.id,
                        aggregate_id = %event.aggregate_id,
                        error = %e,
                        "Event publish failed"
                    );
                }
            }
        }

        batch.commit().await?;

        if !report.is_empty() {
            metrics::counter!("outbox_events_published").increment(report.processed as u64);
            metrics::counter!("outbox_events_failed").increment(report.failed as u64);
            info!(
                processed = report.processed,
                failed = report.failed,
                "Outbox batch finished"
            );
        }

        Ok(report)
    }
}

/// Handle to a running publisher loop.
pub struct PublisherHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Signals the loop to stop and waits for it.
    ///
    /// A batch in flight is finished before the loop exits.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Outbox publisher task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Runs `publisher` on a background task until the handle is stopped.
///
/// Cancellation is only observed while waiting for the next poll.
pub fn spawn_publisher<R, P>(publisher: OutboxPublisher<R, P>) -> PublisherHandle
where
    R: OutboxRepository + 'static,
    P: Producer + 'static,
{
    let (cancel, mut cancelled) = watch::channel(false);
    let poll_interval = publisher.config.poll_interval;

    let task = tokio::spawn(async move {
        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            batch_size = publisher.config.batch_size,
            "Outbox publisher started"
        );

        loop {
            if let Err(e) = publisher.run_once().await {
                error!(error = %e, "Outbox poll failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = cancelled.changed() => break,
            }
        }

        info!("Outbox publisher stopped");
    });

    PublisherHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        DeliveryAck, InMemoryOutboxRepository, InMemoryProducer, NewOutboxEvent, OutboxStatus,
        PublishError,
    };

    /// Sleeps before every delivery and counts deliveries in progress.
    struct SlowProducer {
        inner: InMemoryProducer,
        delay: Duration,
        started: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Producer for SlowProducer {
        async fn produce(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
        ) -> std::result::Result<DeliveryAck, PublishError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.produce(topic, key, payload).await
        }
    }

    fn event(aggregate_id: &str) -> NewOutboxEvent {
        NewOutboxEvent {
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: "Order".to_string(),
            event_type: "CheckoutCompleted".to_string(),
            payload: br#"{"order_id":"x"}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_run_once_publishes_pending_rows() {
        let repo = InMemoryOutboxRepository::new();
        let producer = InMemoryProducer::new();
        repo.insert(event("order-1")).await.unwrap();
        repo.insert(event("order-2")).await.unwrap();

        let publisher =
            OutboxPublisher::new(repo.clone(), producer.clone(), OutboxConfig::default());
        let report = publisher.run_once().await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(repo.count_with_status(OutboxStatus::Processed), 2);

        let messages = producer.messages().await;
        assert_eq!(messages[0].topic, "CheckoutCompleted");
        assert_eq!(messages[0].key, "order-1");
    }

    #[tokio::test]
    async fn test_broker_rejection_marks_failed() {
        let repo = InMemoryOutboxRepository::new();
        let producer = InMemoryProducer::new();
        producer.set_fail(true);
        repo.insert(event("order-1")).await.unwrap();

        let publisher =
            OutboxPublisher::new(repo.clone(), producer.clone(), OutboxConfig::default());
        let report = publisher.run_once().await.unwrap();
        assert_eq!(report.failed, 1);

        // Failed rows are not picked up again.
        producer.set_fail(false);
        let report = publisher.run_once().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(repo.count_with_status(OutboxStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_batch_size_limits_claim() {
        let repo = InMemoryOutboxRepository::new();
        for i in 0..5 {
            repo.insert(event(&format!("order-{i}"))).await.unwrap();
        }

        let config = OutboxConfig {
            batch_size: 2,
            ..OutboxConfig::default()
        };
        let publisher = OutboxPublisher::new(repo.clone(), InMemoryProducer::new(), config);

        assert_eq!(publisher.run_once().await.unwrap().processed, 2);
        assert_eq!(repo.count_with_status(OutboxStatus::Pending), 3);
    }

    #[tokio::test]
    async fn test_spawned_publisher_stops_on_cancel() {
        let repo = InMemoryOutboxRepository::new();
        repo.insert(event("order-1")).await.unwrap();

        let config = OutboxConfig {
            poll_interval: Duration::from_millis(10),
            ..OutboxConfig::default()
        };
        let handle = spawn_publisher(OutboxPublisher::new(
            repo.clone(),
            InMemoryProducer::new(),
            config,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        assert_eq!(repo.count_with_status(OutboxStatus::Processed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_batch_in_flight() {
        let repo = InMemoryOutboxRepository::new();
        for i in 0..3 {
            repo.insert(event(&format!("order-{i}"))).await.unwrap();
        }

        let producer = InMemoryProducer::new();
        let started = Arc::new(AtomicUsize::new(0));
        let slow = SlowProducer {
            inner: producer.clone(),
            delay: Duration::from_millis(100),
            started: started.clone(),
        };
        let handle = spawn_publisher(OutboxPublisher::new(
            repo.clone(),
            slow,
            OutboxConfig::default(),
        ));

        // The first delivery is under way and nothing is marked yet.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(producer.messages().await.is_empty());
        assert_eq!(repo.count_with_status(OutboxStatus::Pending), 3);

        handle.stop().await;

        assert_eq!(repo.count_with_status(OutboxStatus::Processed), 3);
        assert_eq!(producer.messages().await.len(), 3);
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }
}
