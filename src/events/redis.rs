//! Redis Streams event publisher.
//!
//! Appends each event with `XADD` so consumers can replay from any offset;
//! the stream is the durable log, delivery is at-least-once.

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{EventEnvelope, EventPublisher, PublishError};

#[derive(Clone)]
pub struct RedisEventPublisher {
    client: redis::Client,
}

impl RedisEventPublisher {
    pub fn new(redis_url: &str) -> Result<Self, PublishError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_string(event)?;

        let mut conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let _id: String = conn
            .xadd(topic, "*", &[("key", key), ("event", body.as_str())])
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        tracing::debug!(topic, key, event_id = %event.event_id, "event appended");
        Ok(())
    }
}
