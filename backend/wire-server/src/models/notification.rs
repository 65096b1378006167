use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notifications expire after 30 days.
pub const NOTIFICATION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Most recent notifications kept per recipient.
pub const NOTIFICATION_LIST_CAP: usize = 1_000;

/// Preview length taken from the triggering post content.
pub const CONTENT_PREVIEW_LEN: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Reply,
    Follow,
    Mention,
    Repost,
    Quote,
}

/// Who acted, frozen at notification time so renames don't rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorSnapshot {
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    /// Recipient.
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub actor_id: String,
    pub actor: ActorSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Truncate post content to the preview cap on a char boundary.
    pub fn preview_of(content: &str) -> Option<String> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(CONTENT_PREVIEW_LEN).collect())
    }
}
