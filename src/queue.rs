use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::info;

/// Durable FIFO channel between the crawler and the enrichment consumer.
///
/// Values are bare UTF-8 product names on one named Redis list: push is
/// RPUSH, pop is BLPOP. Delivery is at-least-once: there is no
/// acknowledgment, so a consumer crash between pop and output loses that
/// one in-flight item and a redelivered name may be processed twice.
#[derive(Clone)]
pub struct WorkQueue {
    conn: ConnectionManager,
    key: String,
}

impl WorkQueue {
    pub async fn connect(redis_url: &str, key: &str) -> Result<Self, RedisError> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to work queue '{}' at {}", key, redis_url);
        Ok(Self {
            conn,
            key: key.to_string(),
        })
    }

    /// Append a product name to the tail of the queue. Fire-and-forget:
    /// the caller decides whether a failure is worth more than a log line.
    pub async fn push(&mut self, product_name: &str) -> Result<(), RedisError> {
        let _: () = self.conn.rpush(&self.key, product_name).await?;
        Ok(())
    }

    /// Pop from the head of the queue, blocking until a message arrives.
    /// `None` blocks indefinitely; with a timeout, `Ok(None)` means it
    /// expired with the queue still empty.
    pub async fn blocking_pop(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, RedisError> {
        let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
        let reply: Option<(String, String)> = self.conn.blpop(&self.key, secs).await?;
        Ok(reply.map(|(_, value)| value))
    }

    /// Number of messages currently waiting.
    pub async fn len(&mut self) -> Result<usize, RedisError> {
        self.conn.llen(&self.key).await
    }
}

// ── Tests ──
