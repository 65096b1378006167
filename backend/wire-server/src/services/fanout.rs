//! Fan-out worker
//!
//! Consumes post-lifecycle events from the durable queue and materializes
//! them into follower feeds and live connections. Delivery is
//! at-least-once: every step is idempotent (feed inserts dedupe on post
//! id, removals drop all matches), so replays converge.

use crate::coordinators::{kv_err, Coordinators};
use crate::keys;
use crate::models::{FeedEntry, FeedSource, PostSnapshot};
use crate::websocket::ConnectionManager;
use durable_queue::{DurableQueue, QueueError, QueueResult};
use error_types::AppResult;
use kv_store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Post-lifecycle events carried by the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutEvent {
    NewPost {
        post_id: String,
        author_id: String,
        /// Creation time in Unix milliseconds; becomes the feed-entry sort
        /// key.
        timestamp: i64,
    },
    DeletePost {
        post_id: String,
        author_id: String,
    },
}

impl FanoutEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Publish a lifecycle event; callers treat failures as non-fatal (the
/// post exists either way, the queue will redeliver on retry paths).
pub async fn publish(queue: &dyn DurableQueue, event: &FanoutEvent) -> QueueResult<()> {
    let payload = event
        .to_json()
        .map_err(|e| QueueError::Operation(format!("serialize fanout event: {}", e)))?;
    queue.publish(&payload).await
}

#[derive(Clone)]
pub struct FanoutWorker {
    kv: Arc<dyn KvStore>,
    coordinators: Arc<Coordinators>,
    connections: ConnectionManager,
}

impl FanoutWorker {
    pub fn new(
        kv: Arc<dyn KvStore>,
        coordinators: Arc<Coordinators>,
        connections: ConnectionManager,
    ) -> Self {
        Self {
            kv,
            coordinators,
            connections,
        }
    }

    /// Queue-consumer entry point. Errors request redelivery.
    pub async fn handle(&self, payload: String) -> QueueResult<()> {
        let event: FanoutEvent = serde_json::from_str(&payload)
            .map_err(|e| QueueError::Operation(format!("malformed fanout event: {}", e)))?;

        let result = match &event {
            FanoutEvent::NewPost {
                post_id,
                author_id,
                timestamp,
            } => self.fan_out_new_post(post_id, author_id, *timestamp).await,
            FanoutEvent::DeletePost { post_id, author_id } => {
                self.fan_out_delete(post_id, author_id).await
            }
        };

        result.map_err(|e| {
            warn!("fanout failed for {:?}: {}", event, e);
            QueueError::Handler(e.to_string())
        })
    }

    async fn fan_out_new_post(
        &self,
        post_id: &str,
        author_id: &str,
        timestamp: i64,
    ) -> AppResult<()> {
        // Author's own feed first so the author observes the post
        // immediately even while follower fan-out is still in flight.
        self.coordinators
            .feed(author_id)
            .add_entry(FeedEntry {
                post_id: post_id.to_string(),
                author_id: author_id.to_string(),
                timestamp,
                source: FeedSource::Own,
            })
            .await?;

        let followers = self.coordinators.user(author_id).get().await?.followers;
        let snapshot = self.post_snapshot(post_id).await?;

        let mut delivered = 0;
        for follower_id in &followers {
            if follower_id != author_id {
                self.coordinators
                    .feed(follower_id)
                    .add_entry(FeedEntry {
                        post_id: post_id.to_string(),
                        author_id: author_id.to_string(),
                        timestamp,
                        source: FeedSource::Follow,
                    })
                    .await?;
            }
            if let Some(snapshot) = &snapshot {
                self.connections.broadcast_post(follower_id, snapshot);
            }
            delivered += 1;
        }

        info!(
            post_id = %post_id,
            author_id = %author_id,
            followers = delivered,
            "post fanned out"
        );
        Ok(())
    }

    async fn fan_out_delete(&self, post_id: &str, author_id: &str) -> AppResult<()> {
        self.coordinators
            .feed(author_id)
            .remove_entry(post_id)
            .await?;

        let followers = self.coordinators.user(author_id).get().await?.followers;
        for follower_id in &followers {
            if follower_id != author_id {
                self.coordinators
                    .feed(follower_id)
                    .remove_entry(post_id)
                    .await?;
            }
        }

        debug!(post_id = %post_id, "post removed from feeds");
        Ok(())
    }

    async fn post_snapshot(&self, post_id: &str) -> AppResult<Option<PostSnapshot>> {
        match self
            .kv
            .get(&keys::post_snapshot(post_id))
            .await
            .map_err(kv_err)?
        {
            Some(blob) => Ok(serde_json::from_str(&blob).ok()),
            None => Ok(None),
        }
    }
}
