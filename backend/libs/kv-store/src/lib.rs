//! Key-value tier contract
//!
//! The backing store is an eventually consistent string→string map with
//! TTLs and prefix listing. Production runs on Redis; tests and local
//! development run on an in-memory map with the same semantics.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store unreachable: {0}")]
    Unreachable(String),

    #[error("kv operation failed: {0}")]
    Operation(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            KvError::Unreachable(err.to_string())
        } else {
            KvError::Operation(err.to_string())
        }
    }
}

pub type KvResult<T> = Result<T, KvError>;

/// Eventually consistent string→string store with TTL and prefix listing.
///
/// Writers own their keys (coordinator discipline); readers must tolerate
/// staleness. TTLs are in seconds; a TTL of zero means no expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// Set with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()>;

    /// Atomic set-if-absent. Returns true when this call created the key.
    async fn set_nx(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<bool>;

    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Sliding-window counter: increment, starting the window (EXPIRE) on
    /// the first hit. Returns the post-increment count.
    async fn incr_window(&self, key: &str, window_secs: u64) -> KvResult<u64>;

    /// List key/value pairs under a prefix, bounded. Ordering follows the
    /// store; callers must not rely on it.
    async fn list_prefix(&self, prefix: &str, limit: usize) -> KvResult<Vec<(String, String)>>;

    async fn ping(&self) -> KvResult<()>;
}

/// Redis-backed store using a shared `ConnectionManager`.
#[derive(Clone)]
pub struct RedisKv {
    client: Arc<ConnectionManager>,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> KvResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| KvError::Unreachable(format!("failed to create Redis client: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Unreachable(format!("failed to connect to Redis: {}", e)))?;
        Ok(Self {
            client: Arc::new(manager),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.client.as_ref().clone()
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> KvResult<u64> {
        let mut conn = self.conn();
        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async::<_, ()>(&mut conn)
                .await?;
        }
        Ok(count)
    }

    async fn list_prefix(&self, prefix: &str, limit: usize) -> KvResult<Vec<(String, String)>> {
        // SCAN is non-blocking unlike KEYS.
        let pattern = format!("{}*", escape_match_pattern(prefix));
        let mut cursor: u64 = 0;
        let mut keys: Vec<String> = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut self.conn())
                .await?;

            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 || keys.len() >= limit {
                break;
            }
        }
        keys.truncate(limit);

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut self.conn())
            .await?;

        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    async fn ping(&self) -> KvResult<()> {
        let reply: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        if reply != "PONG" {
            warn!("Redis PING returned unexpected reply: {}", reply);
        }
        Ok(())
    }
}

/// Escape glob metacharacters so a literal prefix stays literal in MATCH.
fn escape_match_pattern(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

/// In-memory store with the same observable semantics as [`RedisKv`].
/// Backs tests and local development; not shared across processes.
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<RwLock<BTreeMap<String, MemoryEntry>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys; test helper.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.live()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.live())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).map(|e| e.live()).unwrap_or(false) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl_secs.map(|ttl| Instant::now() + Duration::from_secs(ttl)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> KvResult<u64> {
        let mut entries = self.entries.write().await;
        let current = entries
            .get(key)
            .filter(|e| e.live())
            .and_then(|e| e.value.parse::<u64>().ok());

        match current {
            Some(count) => {
                let next = count + 1;
                // Window start is preserved: only the value changes.
                if let Some(entry) = entries.get_mut(key) {
                    entry.value = next.to_string();
                }
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: "1".to_string(),
                        expires_at: Some(Instant::now() + Duration::from_secs(window_secs)),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn list_prefix(&self, prefix: &str, limit: usize) -> KvResult<Vec<(String, String)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.live())
            .take(limit)
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn ping(&self) -> KvResult<()> {
        Ok(())
    }
}
