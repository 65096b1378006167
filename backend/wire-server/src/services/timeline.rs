//! Timeline assembly
//!
//! The home timeline interleaves the user's materialized followed feed
//! with ranked friend-of-friend candidates in a strict 2:1 round-robin.
//! The chronological timeline serves the followed feed alone. Cursors pin
//! the last-returned followed entry.

use crate::coordinators::{feed::matches_muted_word, kv_err, Coordinators};
use crate::keys;
use crate::models::{PostSnapshot, PostView};
use crate::services::ranking::RankingService;
use crate::utils::cursor;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Extra explore candidates requested beyond the merge quota, covering
/// post-filter losses.
const EXPLORE_OVERFETCH: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct TimelinePage {
    pub posts: Vec<PostView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct TimelineService {
    kv: Arc<dyn KvStore>,
    coordinators: Arc<Coordinators>,
    ranking: RankingService,
}

impl TimelineService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        coordinators: Arc<Coordinators>,
        ranking: RankingService,
    ) -> Self {
        Self {
            kv,
            coordinators,
            ranking,
        }
    }

    /// Hybrid home timeline: two followed posts, then one explore post.
    pub async fn home(
        &self,
        user_id: &str,
        limit: usize,
        cursor_token: Option<&str>,
    ) -> AppResult<TimelinePage> {
        // One coordinator consult covers the blocked set, muted words, and
        // following set.
        let user = self.coordinators.user(user_id).get().await?;

        let followed_page = self
            .coordinators
            .feed(user_id)
            .page(
                limit * 2,
                cursor_token,
                &user.blocked,
                &user.settings.muted_words,
            )
            .await?;

        let explore_quota = limit.div_ceil(3) + EXPLORE_OVERFETCH;
        let mut followed_ids: HashSet<String> = followed_page
            .items
            .iter()
            .map(|(entry, _)| entry.post_id.clone())
            .collect();

        let mut explore: Vec<PostSnapshot> = Vec::new();
        for candidate in self.ranking.explore_candidates().await? {
            if explore.len() >= explore_quota {
                break;
            }
            // Directly-followed authors (the user included) come through
            // the followed feed instead.
            if user.following.contains(&candidate.author_id)
                || user.blocked.contains(&candidate.author_id)
                || followed_ids.contains(&candidate.post_id)
            {
                continue;
            }
            let Some(snapshot) = self.post_snapshot(&candidate.post_id).await? else {
                continue;
            };
            if !snapshot.is_visible()
                || matches_muted_word(&snapshot.content, &user.settings.muted_words)
            {
                continue;
            }
            followed_ids.insert(snapshot.id.clone());
            explore.push(snapshot);
        }

        let explore_left = explore.len();
        let mut followed_iter = followed_page.items.into_iter();
        let mut explore_iter = explore.into_iter();

        let mut posts: Vec<PostView> = Vec::with_capacity(limit);
        let mut last_followed: Option<(i64, String)> = None;
        let mut followed_used = 0usize;
        let mut explore_used = 0usize;

        // Strict F,F,X interleave; the remainder drains whichever side is
        // still producing.
        'merge: loop {
            for _ in 0..2 {
                if posts.len() == limit {
                    break 'merge;
                }
                match followed_iter.next() {
                    Some((entry, snapshot)) => {
                        last_followed = Some((entry.timestamp, entry.post_id.clone()));
                        followed_used += 1;
                        posts.push(snapshot.into_view());
                    }
                    None => break,
                }
            }
            if posts.len() == limit {
                break;
            }
            match explore_iter.next() {
                Some(snapshot) => {
                    explore_used += 1;
                    posts.push(snapshot.into_view());
                }
                None => {
                    // Explore exhausted: drain the followed side.
                    for (entry, snapshot) in followed_iter.by_ref() {
                        if posts.len() == limit {
                            break;
                        }
                        last_followed = Some((entry.timestamp, entry.post_id.clone()));
                        followed_used += 1;
                        posts.push(snapshot.into_view());
                    }
                    // Followed exhausted too: drain explore.
                    for snapshot in explore_iter.by_ref() {
                        if posts.len() == limit {
                            break;
                        }
                        explore_used += 1;
                        posts.push(snapshot.into_view());
                    }
                    break;
                }
            }
        }

        let followed_remaining = followed_iter.next().is_some() || followed_page.has_more;
        let explore_remaining = explore_used < explore_left;

        self.attach_viewer_edges(user_id, &mut posts).await?;

        debug!(
            user_id = %user_id,
            followed = followed_used,
            explore = explore_used,
            "home timeline assembled"
        );

        Ok(TimelinePage {
            posts,
            cursor: last_followed.map(|(ts, id)| cursor::encode(ts, &id)),
            has_more: followed_remaining || explore_remaining,
        })
    }

    /// Followed-feed-only timeline.
    pub async fn chronological(
        &self,
        user_id: &str,
        limit: usize,
        cursor_token: Option<&str>,
    ) -> AppResult<TimelinePage> {
        let user = self.coordinators.user(user_id).get().await?;
        let page = self
            .coordinators
            .feed(user_id)
            .page(
                limit,
                cursor_token,
                &user.blocked,
                &user.settings.muted_words,
            )
            .await?;

        let mut posts: Vec<PostView> = page
            .items
            .into_iter()
            .map(|(_, snapshot)| snapshot.into_view())
            .collect();
        self.attach_viewer_edges(user_id, &mut posts).await?;

        Ok(TimelinePage {
            posts,
            cursor: page.next_cursor,
            has_more: page.has_more,
        })
    }

    /// Join the viewer's like/repost edges from the authoritative records.
    async fn attach_viewer_edges(
        &self,
        viewer_id: &str,
        posts: &mut [PostView],
    ) -> AppResult<()> {
        for view in posts.iter_mut() {
            match self.coordinators.post(&view.post.id).get().await {
                Ok(record) => {
                    view.has_liked = Some(record.likes.contains(viewer_id));
                    view.has_reposted = Some(record.reposts.contains(viewer_id));
                }
                // The edge join is optional; clients fetch lazily on miss.
                Err(e) if e.status_code() == 404 => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn post_snapshot(&self, post_id: &str) -> AppResult<Option<PostSnapshot>> {
        match self
            .kv
            .get(&keys::post_snapshot(post_id))
            .await
            .map_err(kv_err)?
        {
            Some(blob) => serde_json::from_str(&blob)
                .map(Some)
                .map_err(|e| AppError::internal(format!("corrupt post snapshot: {}", e))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FeedEntry, FeedSource, PasswordVerifier, PostCounters, PostRecord, UserRecord,
    };
    use crate::services::ranking::RankedCandidate;
    use chrono::Utc;
    use kv_store::MemoryKv;
    use std::collections::BTreeSet;

    fn verifier() -> PasswordVerifier {
        PasswordVerifier {
            salt: "00".repeat(16),
            hash: "11".repeat(32),
            iterations: 100_000,
        }
    }

    struct Fixture {
        kv: Arc<MemoryKv>,
        coordinators: Arc<Coordinators>,
        timeline: TimelineService,
    }

    async fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKv::new());
        let coordinators = Coordinators::new(kv.clone());
        let ranking = RankingService::new(kv.clone());
        let timeline = TimelineService::new(kv.clone(), coordinators.clone(), ranking);
        Fixture {
            kv,
            coordinators,
            timeline,
        }
    }

    async fn seed_user(fixture: &Fixture, id: &str, following: &[&str]) {
        let mut record = UserRecord::new(
            id.to_string(),
            format!("user{}", id),
            format!("user{}@example.com", id),
            verifier(),
            format!("User {}", id),
        );
        for target in following {
            record.following.insert(target.to_string());
        }
        record.counters.following_count = record.following.len() as u64;
        fixture.coordinators.user(id).initialize(&record).await.unwrap();
    }

    async fn seed_post(fixture: &Fixture, id: &str, author: &str, content: &str) {
        let record = PostRecord {
            id: id.to_string(),
            author_id: author.to_string(),
            author_handle: format!("user{}", author),
            author_display_name: format!("User {}", author),
            author_avatar_url: String::new(),
            content: content.to_string(),
            media_urls: Vec::new(),
            reply_to_id: None,
            quote_of_id: None,
            repost_of_id: None,
            created_at: Utc::now(),
            counters: PostCounters::default(),
            is_deleted: false,
            deleted_at: None,
            is_taken_down: false,
            taken_down_at: None,
            taken_down_reason: None,
            taken_down_by: None,
            likes: BTreeSet::new(),
            reposts: BTreeSet::new(),
            version: 0,
        };
        fixture.coordinators.post(id).initialize(&record).await.unwrap();
    }

    async fn feed_entry(fixture: &Fixture, user: &str, post_id: &str, author: &str, ts: i64) {
        fixture
            .coordinators
            .feed(user)
            .add_entry(FeedEntry {
                post_id: post_id.to_string(),
                author_id: author.to_string(),
                timestamp: ts,
                source: FeedSource::Follow,
            })
            .await
            .unwrap();
    }

    async fn seed_explore(fixture: &Fixture, entries: &[(&str, &str)]) {
        let candidates: Vec<RankedCandidate> = entries
            .iter()
            .enumerate()
            .map(|(i, (post_id, author_id))| RankedCandidate {
                post_id: post_id.to_string(),
                author_id: author_id.to_string(),
                score: 100.0 - i as f64,
                created_at_ms: 0,
            })
            .collect();
        fixture
            .kv
            .set("explore:ranked", &serde_json::to_string(&candidates).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_round_robin_merge_pattern() {
        let fixture = fixture().await;
        seed_user(&fixture, "u", &["f"]).await;
        seed_user(&fixture, "f", &[]).await;

        // Five followed posts, newest first: p1..p5.
        for (i, id) in ["p1", "p2", "p3", "p4", "p5"].iter().enumerate() {
            seed_post(&fixture, id, "f", &format!("followed {}", id)).await;
            feed_entry(&fixture, "u", id, "f", 1_000 - i as i64).await;
        }
        // Two explore posts by a stranger.
        seed_post(&fixture, "q1", "x", "explore one").await;
        seed_post(&fixture, "q2", "x", "explore two").await;
        seed_explore(&fixture, &[("q1", "x"), ("q2", "x")]).await;

        let page = fixture.timeline.home("u", 6, None).await.unwrap();
        let ids: Vec<_> = page.posts.iter().map(|p| p.post.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "q1", "p3", "p4", "q2"]);
    }

    #[tokio::test]
    async fn test_merge_drains_followed_when_explore_empty() {
        let fixture = fixture().await;
        seed_user(&fixture, "u", &["f"]).await;
        seed_user(&fixture, "f", &[]).await;
        for (i, id) in ["p1", "p2", "p3"].iter().enumerate() {
            seed_post(&fixture, id, "f", "content").await;
            feed_entry(&fixture, "u", id, "f", 1_000 - i as i64).await;
        }

        let page = fixture.timeline.home("u", 6, None).await.unwrap();
        let ids: Vec<_> = page.posts.iter().map(|p| p.post.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_explore_excludes_followed_authors_and_self() {
        let fixture = fixture().await;
        seed_user(&fixture, "u", &["f"]).await;
        seed_user(&fixture, "f", &[]).await;
        seed_post(&fixture, "q1", "f", "from a followed author").await;
        seed_post(&fixture, "q2", "u", "own post").await;
        seed_post(&fixture, "q3", "x", "novel author").await;
        seed_explore(&fixture, &[("q1", "f"), ("q2", "u"), ("q3", "x")]).await;

        let page = fixture.timeline.home("u", 6, None).await.unwrap();
        let ids: Vec<_> = page.posts.iter().map(|p| p.post.id.as_str()).collect();
        assert_eq!(ids, vec!["q3"]);
    }

    #[tokio::test]
    async fn test_muted_words_filter_explore() {
        let fixture = fixture().await;
        seed_user(&fixture, "u", &[]).await;
        fixture
            .coordinators
            .user("u")
            .update_settings(crate::coordinators::SettingsUpdate {
                muted_words: Some(vec!["crypto".into()]),
                ..Default::default()
            })
            .await
            .unwrap();
        seed_post(&fixture, "q1", "x", "great CRYPTO deal").await;
        seed_post(&fixture, "q2", "x", "harmless post").await;
        seed_explore(&fixture, &[("q1", "x"), ("q2", "x")]).await;

        let page = fixture.timeline.home("u", 6, None).await.unwrap();
        let ids: Vec<_> = page.posts.iter().map(|p| p.post.id.as_str()).collect();
        assert_eq!(ids, vec!["q2"]);
    }

    #[tokio::test]
    async fn test_viewer_edges_attached() {
        let fixture = fixture().await;
        seed_user(&fixture, "u", &["f"]).await;
        seed_user(&fixture, "f", &[]).await;
        seed_post(&fixture, "p1", "f", "likable").await;
        fixture.coordinators.post("p1").like("u").await.unwrap();
        feed_entry(&fixture, "u", "p1", "f", 100).await;

        let page = fixture.timeline.chronological("u", 10, None).await.unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].has_liked, Some(true));
        assert_eq!(page.posts[0].has_reposted, Some(false));
    }

    #[tokio::test]
    async fn test_cursor_pages_through_followed_feed() {
        let fixture = fixture().await;
        seed_user(&fixture, "u", &["f"]).await;
        seed_user(&fixture, "f", &[]).await;
        for i in 1..=6 {
            let id = format!("p{}", i);
            seed_post(&fixture, &id, "f", "content").await;
            feed_entry(&fixture, "u", &id, "f", 1_000 - i as i64).await;
        }

        let first = fixture.timeline.chronological("u", 3, None).await.unwrap();
        let second = fixture
            .timeline
            .chronological("u", 3, first.cursor.as_deref())
            .await
            .unwrap();

        let mut seen: Vec<_> = first
            .posts
            .iter()
            .chain(second.posts.iter())
            .map(|p| p.post.id.clone())
            .collect();
        let total = seen.len();
        seen.dedup();
        assert_eq!(total, 6);
        assert_eq!(seen.len(), 6, "cursor paging duplicated a post");
    }
}
