//! Recording outbox writer for testing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::CheckoutOrder;
use outbox::{OutboxError, OutboxWriter};
use tokio::sync::Mutex;

/// Keeps saved orders in memory and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxWriter {
    saved: Arc<Mutex<Vec<CheckoutOrder>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryOutboxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Orders saved so far, as they were at save time.
    pub async fn saved(&self) -> Vec<CheckoutOrder> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl OutboxWriter for InMemoryOutboxWriter {
    async fn save_event(&self, order: &CheckoutOrder) -> Result<(), OutboxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OutboxError::Unavailable("outbox write failed".to_string()));
        }
        self.saved.lock().await.push(order.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{LineItem, Money, ProductId, UserId};

    use super::*;

    fn order() -> CheckoutOrder {
        CheckoutOrder::new(
            "order-1",
            UserId::new(1),
            vec![LineItem::new(ProductId::new(1), 1)],
            Money::from_cents(100),
        )
    }

    #[tokio::test]
    async fn test_saves_orders() {
        let writer = InMemoryOutboxWriter::new();
        writer.save_event(&order()).await.unwrap();
        assert_eq!(writer.saved().await, vec![order()]);
    }

    #[tokio::test]
    async fn test_fail() {
        let writer = InMemoryOutboxWriter::new();
        writer.set_fail(true);
        assert!(writer.save_event(&order()).await.is_err());
        assert!(writer.saved().await.is_empty());
    }
}
