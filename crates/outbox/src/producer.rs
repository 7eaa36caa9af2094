use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::PublishError;

/// Broker acknowledgement for one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAck {
    pub topic: String,
    pub key: String,
}

/// Message broker seam used by the publisher.
///
/// `produce` returns only after the broker has acknowledged the message.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryAck, PublishError>;
}

#[async_trait]
impl<P: Producer + ?Sized> Producer for Box<P> {
    async fn produce(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryAck, PublishError> {
        (**self).produce(topic, key, payload).await
    }
}

/// A message captured by [`InMemoryProducer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Records messages instead of sending them.
#[derive(Clone, Default)]
pub struct InMemoryProducer {
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `produce` call fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl Producer for InMemoryProducer {
    async fn produce(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryAck, PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Broker("broker unavailable".to_string()));
        }

        self.messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });

        Ok(DeliveryAck {
            topic: topic.to_string(),
            key: key.to_string(),
        })
    }
}

/// Writes each message to the log. For running the worker without a broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProducer;

#[async_trait]
impl Producer for LogProducer {
    async fn produce(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryAck, PublishError> {
        tracing::info!(topic, key, bytes = payload.len(), "Event delivered to log");
        Ok(DeliveryAck {
            topic: topic.to_string(),
            key: key.to_string(),
        })
    }
}

#[cfg(feature = "kafka")]
pub use kafka::KafkaProducer;

#[cfg(feature = "kafka")]
mod kafka {
    use std::time::Duration;

    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::error::{KafkaError, RDKafkaErrorCode};
    use rdkafka::producer::{FutureProducer, FutureRecord};

    use super::{DeliveryAck, Producer};
    use crate::PublishError;

    /// Kafka producer with idempotence and full-ISR acknowledgement.
    pub struct KafkaProducer {
        producer: FutureProducer,
        delivery_timeout: Duration,
    }

    impl KafkaProducer {
        pub fn new(brokers: &str, delivery_timeout: Duration) -> Result<Self, PublishError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("acks", "all")
                .set("enable.idempotence", "true")
                .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
                .create()
                .map_err(|e| PublishError::Broker(e.to_string()))?;

            tracing::info!(brokers, "Kafka producer created");

            Ok(Self {
                producer,
                delivery_timeout,
            })
        }
    }

    #[async_trait]
    impl Producer for KafkaProducer {
        async fn produce(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
        ) -> Result<DeliveryAck, PublishError> {
            let record = FutureRecord::to(topic).key(key).payload(payload);

            self.producer
                .send(record, self.delivery_timeout)
                .await
                .map_err(|(e, _)| match e {
                    KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
                        PublishError::Timeout {
                            topic: topic.to_string(),
                        }
                    }
                    other => PublishError::Broker(other.to_string()),
                })?;

            Ok(DeliveryAck {
                topic: topic.to_string(),
                key: key.to_string(),
            })
        }
    }
}
