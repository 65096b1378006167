//! Durable queue contract
//!
//! At-least-once delivery with redelivery on failure. Production rides a
//! Redis stream consumer group; tests use an in-memory queue with the same
//! semantics. Consumers must be idempotent.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unreachable: {0}")]
    Unreachable(String),

    #[error("queue operation failed: {0}")]
    Operation(String),

    /// Returned by handlers to request redelivery.
    #[error("message handling failed: {0}")]
    Handler(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            QueueError::Unreachable(err.to_string())
        } else {
            QueueError::Operation(err.to_string())
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// One delivery of a message. `attempts` counts completed failed attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub payload: String,
    pub attempts: u32,
}

/// Redelivery backoff: `min(ceiling, base · 2^attempts)` seconds.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_secs: u64,
    pub ceiling_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: 30,
            ceiling_secs: 3_600,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let secs = self
            .base_secs
            .checked_mul(factor)
            .unwrap_or(self.ceiling_secs)
            .min(self.ceiling_secs);
        Duration::from_secs(secs)
    }
}

/// At-least-once message queue.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn publish(&self, payload: &str) -> QueueResult<()>;

    /// Block (bounded) until a delivery is available. `None` on idle timeout.
    async fn consume(&self) -> QueueResult<Option<Envelope>>;

    async fn ack(&self, envelope: &Envelope) -> QueueResult<()>;

    /// Schedule redelivery with `attempts + 1` after the backoff delay.
    async fn nack(&self, envelope: &Envelope) -> QueueResult<()>;
}

/// Drive a handler over a queue until the task is aborted. Failures are
/// nacked for redelivery; consume errors back off briefly to avoid a busy
/// loop against a dead broker.
pub async fn run_consumer<Q, H, F>(queue: Arc<Q>, handler: H)
where
    Q: DurableQueue + ?Sized,
    H: Fn(String) -> F,
    F: Future<Output = QueueResult<()>>,
{
    loop {
        let envelope = match queue.consume().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(e) => {
                error!("queue consume failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        match handler(envelope.payload.clone()).await {
            Ok(()) => {
                if let Err(e) = queue.ack(&envelope).await {
                    warn!(envelope_id = %envelope.id, "ack failed: {}", e);
                }
            }
            Err(e) => {
                warn!(
                    envelope_id = %envelope.id,
                    attempts = envelope.attempts,
                    "handler failed, scheduling redelivery: {}",
                    e
                );
                if let Err(e) = queue.nack(&envelope).await {
                    error!(envelope_id = %envelope.id, "nack failed: {}", e);
                }
            }
        }
    }
}

struct MemoryQueueInner {
    ready: VecDeque<Envelope>,
    next_id: u64,
}

/// In-memory queue for tests and local development. Redelivery timers run
/// on the tokio runtime; pending messages do not survive a restart.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<MemoryQueueInner>>,
    notify: Arc<Notify>,
    backoff: BackoffPolicy,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl MemoryQueue {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryQueueInner {
                ready: VecDeque::new(),
                next_id: 0,
            })),
            notify: Arc::new(Notify::new()),
            backoff,
        }
    }

    async fn enqueue(&self, envelope: Envelope) {
        let mut inner = self.inner.lock().await;
        inner.ready.push_back(envelope);
        drop(inner);
        self.notify.notify_one();
    }

    /// Number of messages currently ready; test helper.
    pub async fn ready_len(&self) -> usize {
        self.inner.lock().await.ready.len()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn publish(&self, payload: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.ready.push_back(Envelope {
            id: id.to_string(),
            payload: payload.to_string(),
            attempts: 0,
        });
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(&self) -> QueueResult<Option<Envelope>> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(envelope) = inner.ready.pop_front() {
                    return Ok(Some(envelope));
                }
            }
            if tokio::time::timeout(Duration::from_millis(500), self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, _envelope: &Envelope) -> QueueResult<()> {
        Ok(())
    }

    async fn nack(&self, envelope: &Envelope) -> QueueResult<()> {
        let redelivery = Envelope {
            id: envelope.id.clone(),
            payload: envelope.payload.clone(),
            attempts: envelope.attempts + 1,
        };
        let delay = self.backoff.delay(envelope.attempts);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(redelivery).await;
        });
        Ok(())
    }
}

/// Redis-streams queue: XADD producers, an XREADGROUP consumer group, XACK
/// on completion. Redelivery re-publishes with a bumped attempt counter
/// after acking the failed delivery, so the backoff schedule is explicit
/// rather than relying on pending-entry claims.
#[derive(Clone)]
pub struct RedisStreamQueue {
    client: Arc<ConnectionManager>,
    stream: String,
    group: String,
    consumer: String,
    backoff: BackoffPolicy,
}

impl RedisStreamQueue {
    pub async fn connect(
        redis_url: &str,
        stream: &str,
        group: &str,
        backoff: BackoffPolicy,
    ) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Unreachable(format!("failed to create Redis client: {}", e)))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Unreachable(format!("failed to connect to Redis: {}", e)))?;

        // BUSYGROUP just means another worker created it first.
        let created: Result<(), redis::RedisError> = manager
            .xgroup_create_mkstream(stream, group, "0")
            .await;
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e.into());
            }
        }

        Ok(Self {
            client: Arc::new(manager),
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::new_v4()),
            backoff,
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.client.as_ref().clone()
    }

    async fn xadd(&self, payload: &str, attempts: u32) -> QueueResult<()> {
        let mut conn = self.conn();
        let attempts = attempts.to_string();
        let _: String = conn
            .xadd(
                &self.stream,
                "*",
                &[("payload", payload), ("attempts", attempts.as_str())],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for RedisStreamQueue {
    async fn publish(&self, payload: &str) -> QueueResult<()> {
        self.xadd(payload, 0).await
    }

    async fn consume(&self) -> QueueResult<Option<Envelope>> {
        let mut conn = self.conn();
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(5_000);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let payload = entry
                    .get::<String>("payload")
                    .ok_or_else(|| QueueError::Operation("stream entry missing payload".into()))?;
                let attempts = entry
                    .get::<String>("attempts")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                return Ok(Some(Envelope {
                    id: entry.id,
                    payload,
                    attempts,
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, envelope: &Envelope) -> QueueResult<()> {
        let mut conn = self.conn();
        let _: u64 = conn
            .xack(&self.stream, &self.group, &[&envelope.id])
            .await?;
        Ok(())
    }

    async fn nack(&self, envelope: &Envelope) -> QueueResult<()> {
        // The failed delivery is acked and the message re-enters the stream
        // after the backoff delay with a bumped counter.
        self.ack(envelope).await?;

        let queue = self.clone();
        let payload = envelope.payload.clone();
        let attempts = envelope.attempts + 1;
        let delay = self.backoff.delay(envelope.attempts);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.xadd(&payload, attempts).await {
                error!("redelivery publish failed: {}", e);
            } else {
                debug!(attempts, "message redelivered to stream");
            }
        });
        Ok(())
    }
}
