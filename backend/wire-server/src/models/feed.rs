use serde::{Deserialize, Serialize};

/// Newest entries retained per feed; older entries are evicted on insert.
pub const FEED_CAPACITY: usize = 5_000;

/// How an entry reached this feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Own,
    Follow,
    Fof,
}

/// One materialized feed entry. The post body is joined from the snapshot
/// tier at read time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub post_id: String,
    pub author_id: String,
    /// Creation time in Unix milliseconds; the feed sorts on this.
    pub timestamp: i64,
    pub source: FeedSource,
}

impl FeedEntry {
    /// Descending timestamp, post id as the tie-break, matching the cursor
    /// encoding.
    pub fn sort_key(&self) -> (i64, String) {
        (self.timestamp, self.post_id.clone())
    }
}
