use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PostCounters {
    pub like_count: u64,
    pub reply_count: u64,
    pub repost_count: u64,
    pub quote_count: u64,
}

/// Authoritative post state, persisted as one blob by the post coordinator.
/// Author fields are denormalized at creation time so snapshot refreshes
/// never reach into another coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub author_id: String,
    pub author_handle: String,
    pub author_display_name: String,
    #[serde(default)]
    pub author_avatar_url: String,
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub reply_to_id: Option<String>,
    pub quote_of_id: Option<String>,
    /// Always the leaf original: reposting a repost stores the root post.
    pub repost_of_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub counters: PostCounters,
    #[serde(default)]
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_taken_down: bool,
    pub taken_down_at: Option<DateTime<Utc>>,
    pub taken_down_reason: Option<String>,
    pub taken_down_by: Option<String>,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub reposts: BTreeSet<String>,
    #[serde(default)]
    pub version: u64,
}

impl PostRecord {
    /// Tombstoned posts stay addressable but are filtered from reads.
    pub fn is_visible(&self) -> bool {
        !self.is_deleted && !self.is_taken_down
    }

    /// Denormalized snapshot for `post:{id}`. Tombstones keep their id but
    /// expose no content and zeroed counters.
    pub fn snapshot(&self) -> PostSnapshot {
        let visible = self.is_visible();
        PostSnapshot {
            id: self.id.clone(),
            author_id: self.author_id.clone(),
            author_handle: self.author_handle.clone(),
            author_display_name: self.author_display_name.clone(),
            author_avatar_url: self.author_avatar_url.clone(),
            content: if visible {
                self.content.clone()
            } else {
                String::new()
            },
            media_urls: if visible {
                self.media_urls.clone()
            } else {
                Vec::new()
            },
            reply_to_id: self.reply_to_id.clone(),
            quote_of_id: self.quote_of_id.clone(),
            repost_of_id: self.repost_of_id.clone(),
            created_at: self.created_at,
            counters: if visible {
                self.counters
            } else {
                PostCounters::default()
            },
            is_deleted: self.is_deleted,
            is_taken_down: self.is_taken_down,
        }
    }
}

/// Denormalized post for cheap reads, cached at `post:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub id: String,
    pub author_id: String,
    pub author_handle: String,
    pub author_display_name: String,
    #[serde(default)]
    pub author_avatar_url: String,
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub reply_to_id: Option<String>,
    pub quote_of_id: Option<String>,
    pub repost_of_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub counters: PostCounters,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_taken_down: bool,
}

impl PostSnapshot {
    pub fn is_visible(&self) -> bool {
        !self.is_deleted && !self.is_taken_down
    }

    pub fn into_view(self) -> PostView {
        PostView {
            post: self,
            has_liked: None,
            has_reposted: None,
        }
    }
}

/// Snapshot plus viewer-relative edges, as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: PostSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_liked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_reposted: Option<bool>,
}
