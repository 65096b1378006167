//! Post coordinator
//!
//! Owns the authoritative blob at `post-record:{id}` and refreshes the
//! denormalized snapshot at `post:{id}` after every mutation. Like and
//! repost counters always equal set cardinality.

use super::{kv_err, with_deadline};
use crate::keys;
use crate::models::PostRecord;
use chrono::Utc;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct PostCoord {
    kv: Arc<dyn KvStore>,
    lock: Arc<Mutex<()>>,
    post_id: String,
}

impl PostCoord {
    pub(super) fn new(kv: Arc<dyn KvStore>, lock: Arc<Mutex<()>>, post_id: String) -> Self {
        Self { kv, lock, post_id }
    }

    async fn load(&self) -> AppResult<PostRecord> {
        let blob = self
            .kv
            .get(&keys::post_record(&self.post_id))
            .await
            .map_err(kv_err)?
            .ok_or_else(|| AppError::not_found("Post not found"))?;
        serde_json::from_str(&blob)
            .map_err(|e| AppError::internal(format!("corrupt post record {}: {}", self.post_id, e)))
    }

    async fn save(&self, record: &mut PostRecord) -> AppResult<()> {
        record.version += 1;
        let blob = serde_json::to_string(record)
            .map_err(|e| AppError::internal(format!("serialize post record: {}", e)))?;
        self.kv
            .set(&keys::post_record(&self.post_id), &blob)
            .await
            .map_err(kv_err)?;

        let snapshot = serde_json::to_string(&record.snapshot())
            .map_err(|e| AppError::internal(format!("serialize post snapshot: {}", e)))?;
        self.kv
            .set(&keys::post_snapshot(&self.post_id), &snapshot)
            .await
            .map_err(kv_err)?;
        Ok(())
    }

    pub async fn initialize(&self, record: &PostRecord) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let blob = serde_json::to_string(record)
                .map_err(|e| AppError::internal(format!("serialize post record: {}", e)))?;
            let created = self
                .kv
                .set_nx(&keys::post_record(&self.post_id), &blob, None)
                .await
                .map_err(kv_err)?;
            if !created {
                return Err(AppError::conflict("Post already initialized"));
            }
            let snapshot = serde_json::to_string(&record.snapshot())
                .map_err(|e| AppError::internal(format!("serialize post snapshot: {}", e)))?;
            self.kv
                .set(&keys::post_snapshot(&self.post_id), &snapshot)
                .await
                .map_err(kv_err)?;
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn get(&self) -> AppResult<PostRecord> {
        let op = async {
            let _guard = self.lock.lock().await;
            self.load().await
        };
        with_deadline(op).await
    }

    /// Add the user to the like set. Returns the new like count and
    /// whether this call added the edge; liking an already-liked post is a
    /// no-op success.
    pub async fn like(&self, user_id: &str) -> AppResult<(u64, bool)> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            let added = record.likes.insert(user_id.to_string());
            if added {
                record.counters.like_count = record.likes.len() as u64;
                self.save(&mut record).await?;
            }
            Ok((record.counters.like_count, added))
        };
        with_deadline(op).await
    }

    pub async fn unlike(&self, user_id: &str) -> AppResult<u64> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if record.likes.remove(user_id) {
                record.counters.like_count = record.likes.len() as u64;
                self.save(&mut record).await?;
            }
            Ok(record.counters.like_count)
        };
        with_deadline(op).await
    }

    /// Add the user to the repost set. Returns the new count and whether
    /// this call added the edge; the API layer turns a duplicate into 409.
    pub async fn add_repost(&self, user_id: &str) -> AppResult<(u64, bool)> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            let added = record.reposts.insert(user_id.to_string());
            if added {
                record.counters.repost_count = record.reposts.len() as u64;
                self.save(&mut record).await?;
            }
            Ok((record.counters.repost_count, added))
        };
        with_deadline(op).await
    }

    pub async fn remove_repost(&self, user_id: &str) -> AppResult<u64> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if record.reposts.remove(user_id) {
                record.counters.repost_count = record.reposts.len() as u64;
                self.save(&mut record).await?;
            }
            Ok(record.counters.repost_count)
        };
        with_deadline(op).await
    }

    pub async fn increment_reply_count(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.counters.reply_count += 1;
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    pub async fn decrement_reply_count(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.counters.reply_count = record.counters.reply_count.saturating_sub(1);
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    pub async fn increment_quote_count(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.counters.quote_count += 1;
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    pub async fn has_liked(&self, user_id: &str) -> AppResult<bool> {
        Ok(self.get().await?.likes.contains(user_id))
    }

    pub async fn has_reposted(&self, user_id: &str) -> AppResult<bool> {
        Ok(self.get().await?.reposts.contains(user_id))
    }

    /// Author-side soft delete. The record keeps its content for audit;
    /// the snapshot is scrubbed by `PostRecord::snapshot`.
    pub async fn delete(&self) -> AppResult<PostRecord> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if !record.is_deleted {
                record.is_deleted = true;
                record.deleted_at = Some(Utc::now());
                self.save(&mut record).await?;
            }
            Ok(record)
        };
        with_deadline(op).await
    }

    /// Admin takedown; independent of the author-delete tombstone.
    pub async fn takedown(&self, reason: &str, admin_id: &str) -> AppResult<PostRecord> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.is_taken_down = true;
            record.taken_down_at = Some(Utc::now());
            record.taken_down_reason = Some(reason.to_string());
            record.taken_down_by = Some(admin_id.to_string());
            self.save(&mut record).await?;
            Ok(record)
        };
        with_deadline(op).await
    }

    pub async fn untakedown(&self) -> AppResult<PostRecord> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.is_taken_down = false;
            record.taken_down_at = None;
            record.taken_down_reason = None;
            record.taken_down_by = None;
            self.save(&mut record).await?;
            Ok(record)
        };
        with_deadline(op).await
    }
}
