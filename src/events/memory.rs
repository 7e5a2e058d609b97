//! In-memory event publisher used by tests and local development.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{EventEnvelope, EventPublisher, PublishError};

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub envelope: EventEnvelope,
}

#[derive(Default)]
pub struct MemoryEventPublisher {
    published: Mutex<Vec<PublishedEvent>>,
    fail_publishes: Mutex<bool>,
}

impl MemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Makes subsequent publishes fail, for exercising the fire-and-forget
    /// path.
    pub fn fail_next_publishes(&self) {
        *self.fail_publishes.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &EventEnvelope,
    ) -> Result<(), PublishError> {
        if *self.fail_publishes.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(PublishError::Transport("simulated outage".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedEvent {
                topic: topic.to_string(),
                key: key.to_string(),
                envelope: event.clone(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transaction;
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    #[tokio::test]
    async fn captures_published_events_in_order() {
        let publisher = MemoryEventPublisher::new();
        let tx = Transaction::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            BigDecimal::from(1),
            "x".to_string(),
            None,
        );

        let envelope = crate::events::EventEnvelope::transaction_completed(&tx);
        publisher
            .publish("transaction-events", &tx.id.to_string(), &envelope)
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "transaction-events");
        assert_eq!(published[0].key, tx.id.to_string());
    }

    #[tokio::test]
    async fn simulated_outage_fails_publish() {
        let publisher = MemoryEventPublisher::new();
        publisher.fail_next_publishes();
        let tx = Transaction::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            BigDecimal::from(1),
            "x".to_string(),
            None,
        );
        let envelope = crate::events::EventEnvelope::transaction_completed(&tx);
        let result = publisher.publish("t", "k", &envelope).await;
        assert!(result.is_err());
        assert!(publisher.published().is_empty());
    }
}
