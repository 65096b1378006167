//! Feed coordinator
//!
//! Owns the bounded, timestamp-sorted entry list at `feed:{userId}`.
//! Inserts dedupe on post id and evict the oldest entries past capacity.
//! Paging is cursor-based on (timestamp, post id) so filter churn between
//! pages cannot duplicate or skip entries.

use super::{kv_err, with_deadline};
use crate::keys;
use crate::models::{FeedEntry, PostSnapshot, FEED_CAPACITY};
use crate::utils::cursor;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One page of a feed: entries joined with their post snapshots.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<(FeedEntry, PostSnapshot)>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

pub struct FeedCoord {
    kv: Arc<dyn KvStore>,
    lock: Arc<Mutex<()>>,
    user_id: String,
}

impl FeedCoord {
    pub(super) fn new(kv: Arc<dyn KvStore>, lock: Arc<Mutex<()>>, user_id: String) -> Self {
        Self { kv, lock, user_id }
    }

    async fn load(&self) -> AppResult<Vec<FeedEntry>> {
        let blob = self
            .kv
            .get(&keys::feed(&self.user_id))
            .await
            .map_err(kv_err)?;
        match blob {
            Some(blob) => serde_json::from_str(&blob).map_err(|e| {
                AppError::internal(format!("corrupt feed {}: {}", self.user_id, e))
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, entries: &[FeedEntry]) -> AppResult<()> {
        let blob = serde_json::to_string(entries)
            .map_err(|e| AppError::internal(format!("serialize feed: {}", e)))?;
        self.kv
            .set(&keys::feed(&self.user_id), &blob)
            .await
            .map_err(kv_err)
    }

    /// Insert in descending (timestamp, post id) order. A duplicate post id
    /// is a no-op; capacity overflow evicts the oldest entries.
    pub async fn add_entry(&self, entry: FeedEntry) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut entries = self.load().await?;
            if entries.iter().any(|e| e.post_id == entry.post_id) {
                return Ok(());
            }
            entries.push(entry);
            sort_descending(&mut entries);
            entries.truncate(FEED_CAPACITY);
            self.save(&entries).await
        };
        with_deadline(op).await
    }

    /// Drop every entry carrying the post id.
    pub async fn remove_entry(&self, post_id: &str) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut entries = self.load().await?;
            let before = entries.len();
            entries.retain(|e| e.post_id != post_id);
            if entries.len() != before {
                self.save(&entries).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn clear(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            self.kv
                .delete(&keys::feed(&self.user_id))
                .await
                .map_err(kv_err)
        };
        with_deadline(op).await
    }

    pub async fn entries(&self) -> AppResult<Vec<FeedEntry>> {
        let op = async {
            let _guard = self.lock.lock().await;
            self.load().await
        };
        with_deadline(op).await
    }

    /// Serve a filtered page. Entries from blocked authors are dropped
    /// before the snapshot join; tombstoned posts and muted-word matches
    /// are dropped after it.
    pub async fn page(
        &self,
        limit: usize,
        cursor_token: Option<&str>,
        blocked: &std::collections::BTreeSet<String>,
        muted_words: &[String],
    ) -> AppResult<FeedPage> {
        let op = async {
            let _guard = self.lock.lock().await;
            let entries = self.load().await?;

            let position = match cursor_token {
                Some(token) => Some(cursor::decode(token)?),
                None => None,
            };

            let mut items = Vec::with_capacity(limit);
            let mut remaining_after_page = false;

            for entry in entries.iter() {
                if let Some((cursor_ts, cursor_id)) = &position {
                    if !cursor::is_after(entry.timestamp, &entry.post_id, *cursor_ts, cursor_id) {
                        continue;
                    }
                }
                if items.len() == limit {
                    remaining_after_page = true;
                    break;
                }
                if blocked.contains(&entry.author_id) {
                    continue;
                }

                let Some(snapshot) = self.post_snapshot(&entry.post_id).await? else {
                    continue;
                };
                if !snapshot.is_visible() {
                    continue;
                }
                if matches_muted_word(&snapshot.content, muted_words) {
                    continue;
                }
                items.push((entry.clone(), snapshot));
            }

            let next_cursor = items
                .last()
                .map(|(entry, _)| cursor::encode(entry.timestamp, &entry.post_id));

            Ok(FeedPage {
                has_more: remaining_after_page,
                next_cursor,
                items,
            })
        };
        with_deadline(op).await
    }

    async fn post_snapshot(&self, post_id: &str) -> AppResult<Option<PostSnapshot>> {
        let blob = self
            .kv
            .get(&keys::post_snapshot(post_id))
            .await
            .map_err(kv_err)?;
        match blob {
            Some(blob) => serde_json::from_str(&blob)
                .map(Some)
                .map_err(|e| AppError::internal(format!("corrupt post snapshot: {}", e))),
            None => Ok(None),
        }
    }
}

fn sort_descending(entries: &mut [FeedEntry]) {
    entries.sort_by(|a, b| match b.timestamp.cmp(&a.timestamp) {
        Ordering::Equal => snowflake_id::compare(&b.post_id, &a.post_id),
        other => other,
    });
}

/// Case-insensitive substring match against any muted word.
pub fn matches_muted_word(content: &str, muted_words: &[String]) -> bool {
    if muted_words.is_empty() {
        return false;
    }
    let folded = content.to_lowercase();
    muted_words
        .iter()
        .any(|word| !word.is_empty() && folded.contains(&word.to_lowercase()))
}
