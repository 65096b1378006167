//! Post workflows
//!
//! Orchestrates the write path: mint id → post coordinator → KV indexes →
//! durable queue → counters → mentions and related-action notifications.
//! Fan-out failures never fail the request; the post exists and the queue
//! redelivers.

use crate::coordinators::{kv_err, Coordinators};
use crate::keys;
use crate::models::{
    ActorSnapshot, Notification, NotificationKind, PostCounters, PostRecord, PostSnapshot,
    PostView, UserRecord,
};
use crate::services::fanout::{self, FanoutEvent};
use crate::services::mentions::extract_mentions;
use crate::services::notifications::{NotificationService, NotifyRequest};
use crate::services::search::SearchIndex;
use crate::utils::cursor;
use chrono::Utc;
use durable_queue::DurableQueue;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use snowflake_id::SnowflakeGenerator;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ancestor chain bound for thread assembly.
const MAX_THREAD_DEPTH: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct CreatePostInput {
    pub content: String,
    pub media_urls: Vec<String>,
    pub reply_to_id: Option<String>,
    pub quote_of_id: Option<String>,
}

/// Which slice of an author's posts a listing serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorListing {
    Posts,
    Replies,
    Media,
}

#[derive(Debug, Clone)]
pub struct PostPage {
    pub posts: Vec<PostView>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub ancestors: Vec<PostView>,
    pub post: PostView,
    pub replies: Vec<PostView>,
}

#[derive(Clone)]
pub struct PostService {
    kv: Arc<dyn KvStore>,
    coordinators: Arc<Coordinators>,
    queue: Arc<dyn DurableQueue>,
    search: SearchIndex,
    notifications: NotificationService,
    ids: Arc<SnowflakeGenerator>,
    max_post_length: usize,
}

impl PostService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<dyn KvStore>,
        coordinators: Arc<Coordinators>,
        queue: Arc<dyn DurableQueue>,
        search: SearchIndex,
        notifications: NotificationService,
        ids: Arc<SnowflakeGenerator>,
        max_post_length: usize,
    ) -> Self {
        Self {
            kv,
            coordinators,
            queue,
            search,
            notifications,
            ids,
            max_post_length,
        }
    }

    /// Create a post, reply, or quote.
    pub async fn create_post(&self, author_id: &str, input: CreatePostInput) -> AppResult<PostView> {
        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(AppError::validation("Post content cannot be empty"));
        }
        if content.chars().count() > self.max_post_length {
            return Err(AppError::validation(format!(
                "Post content exceeds {} characters",
                self.max_post_length
            )));
        }
        if input.reply_to_id.is_some() && input.quote_of_id.is_some() {
            return Err(AppError::validation(
                "A post cannot be both a reply and a quote",
            ));
        }

        // Validate referenced posts before minting anything.
        if let Some(parent_id) = &input.reply_to_id {
            self.visible_snapshot(parent_id)
                .await?
                .ok_or_else(|| AppError::not_found("Parent post not found"))?;
        }
        if let Some(quoted_id) = &input.quote_of_id {
            self.visible_snapshot(quoted_id)
                .await?
                .ok_or_else(|| AppError::not_found("Quoted post not found"))?;
        }

        let author = self.coordinators.user(author_id).get().await?;
        let post_id = self.mint_id()?;
        let record = PostRecord {
            id: post_id.clone(),
            author_id: author_id.to_string(),
            author_handle: author.handle.clone(),
            author_display_name: author.profile.display_name.clone(),
            author_avatar_url: author.profile.avatar_url.clone(),
            content: content.clone(),
            media_urls: input.media_urls,
            reply_to_id: input.reply_to_id.clone(),
            quote_of_id: input.quote_of_id.clone(),
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

        self.coordinators.post(&post_id).initialize(&record).await?;
        self.prepend_index(&keys::user_posts(author_id), &post_id)
            .await?;
        if let Some(parent_id) = &input.reply_to_id {
            self.prepend_index(&keys::replies(parent_id), &post_id)
                .await?;
        }

        self.enqueue(FanoutEvent::NewPost {
            post_id: post_id.clone(),
            author_id: author_id.to_string(),
            timestamp: record.created_at.timestamp_millis(),
        })
        .await;

        self.coordinators.user(author_id).increment_post_count().await?;
        self.search
            .index_post(&post_id, &content, record.created_at.timestamp_millis())
            .await?;

        let actor = actor_snapshot(&author);
        self.notify_mentions(&author, &actor, &record).await?;

        if let Some(parent_id) = &input.reply_to_id {
            self.coordinators
                .post(parent_id)
                .increment_reply_count()
                .await?;
            self.notify_related(parent_id, &actor, author_id, NotificationKind::Reply, &content)
                .await?;
        }
        if let Some(quoted_id) = &input.quote_of_id {
            self.coordinators
                .post(quoted_id)
                .increment_quote_count()
                .await?;
            self.notify_related(quoted_id, &actor, author_id, NotificationKind::Quote, &content)
                .await?;
        }

        debug!(post_id = %post_id, author_id = %author_id, "post created");
        Ok(record.snapshot().into_view())
    }

    /// Repost. The stored reference always points at the leaf original, so
    /// reposting a repost collapses to the root.
    pub async fn repost(&self, user_id: &str, post_id: &str) -> AppResult<PostView> {
        let target = self
            .visible_snapshot(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post not found"))?;

        let leaf_id = target.repost_of_id.clone().unwrap_or(target.id.clone());
        let leaf = self
            .visible_snapshot(&leaf_id)
            .await?
            .ok_or_else(|| AppError::not_found("Original post not found"))?;
        if leaf.author_id == user_id {
            return Err(AppError::validation("Cannot repost your own post"));
        }

        let (_, added) = self.coordinators.post(&leaf_id).add_repost(user_id).await?;
        if !added {
            return Err(AppError::conflict("Post already reposted"));
        }

        let author = self.coordinators.user(user_id).get().await?;
        let repost_id = self.mint_id()?;
        let record = PostRecord {
            id: repost_id.clone(),
            author_id: user_id.to_string(),
            author_handle: author.handle.clone(),
            author_display_name: author.profile.display_name.clone(),
            author_avatar_url: author.profile.avatar_url.clone(),
            content: String::new(),
            media_urls: Vec::new(),
            reply_to_id: None,
            quote_of_id: None,
            repost_of_id: Some(leaf_id.clone()),
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

        self.coordinators.post(&repost_id).initialize(&record).await?;
        self.prepend_index(&keys::user_posts(user_id), &repost_id)
            .await?;

        self.enqueue(FanoutEvent::NewPost {
            post_id: repost_id.clone(),
            author_id: user_id.to_string(),
            timestamp: record.created_at.timestamp_millis(),
        })
        .await;

        self.coordinators.user(user_id).increment_post_count().await?;
        self.notifications
            .notify(NotifyRequest {
                recipient_id: leaf.author_id.clone(),
                kind: NotificationKind::Repost,
                actor_id: user_id.to_string(),
                actor: actor_snapshot(&author),
                post_id: Some(leaf_id),
                content_preview: Notification::preview_of(&leaf.content),
            })
            .await?;

        Ok(record.snapshot().into_view())
    }

    /// Like. Returns the new like count; duplicate likes are no-op
    /// successes returning the unchanged count.
    pub async fn like(&self, user_id: &str, post_id: &str) -> AppResult<u64> {
        let snapshot = self
            .visible_snapshot(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post not found"))?;

        let (count, added) = self.coordinators.post(post_id).like(user_id).await?;
        if !added {
            return Ok(count);
        }
        self.coordinators.user(user_id).record_like(post_id).await?;

        let actor = self.coordinators.user(user_id).get().await?;
        self.notifications
            .notify(NotifyRequest {
                recipient_id: snapshot.author_id.clone(),
                kind: NotificationKind::Like,
                actor_id: user_id.to_string(),
                actor: actor_snapshot(&actor),
                post_id: Some(post_id.to_string()),
                content_preview: Notification::preview_of(&snapshot.content),
            })
            .await?;
        Ok(count)
    }

    pub async fn unlike(&self, user_id: &str, post_id: &str) -> AppResult<u64> {
        let count = self.coordinators.post(post_id).unlike(user_id).await?;
        self.coordinators.user(user_id).remove_like(post_id).await?;
        Ok(count)
    }

    /// Author-side soft delete.
    pub async fn delete_post(&self, user_id: &str, post_id: &str) -> AppResult<()> {
        let record = self.coordinators.post(post_id).get().await?;
        if record.author_id != user_id {
            return Err(AppError::forbidden("Only the author can delete a post"));
        }
        if record.is_deleted {
            return Ok(());
        }

        self.coordinators.post(post_id).delete().await?;
        self.coordinators.user(user_id).decrement_post_count().await?;
        self.search.remove_post(post_id).await?;
        self.remove_from_index(&keys::user_posts(user_id), post_id)
            .await?;

        if let Some(parent_id) = &record.reply_to_id {
            if let Err(e) = self
                .coordinators
                .post(parent_id)
                .decrement_reply_count()
                .await
            {
                warn!(parent_id = %parent_id, "reply count decrement failed: {}", e);
            }
        }
        // Deleting a repost releases the edge on the original.
        if let Some(leaf_id) = &record.repost_of_id {
            if let Err(e) = self
                .coordinators
                .post(leaf_id)
                .remove_repost(user_id)
                .await
            {
                warn!(leaf_id = %leaf_id, "repost edge removal failed: {}", e);
            }
        }

        self.enqueue(FanoutEvent::DeletePost {
            post_id: post_id.to_string(),
            author_id: user_id.to_string(),
        })
        .await;
        Ok(())
    }

    /// Admin takedown: independent tombstone, author post count untouched.
    pub async fn takedown(
        &self,
        admin_id: &str,
        post_id: &str,
        reason: &str,
    ) -> AppResult<()> {
        let record = self
            .coordinators
            .post(post_id)
            .takedown(reason, admin_id)
            .await?;
        self.search.remove_post(post_id).await?;
        self.enqueue(FanoutEvent::DeletePost {
            post_id: post_id.to_string(),
            author_id: record.author_id,
        })
        .await;
        Ok(())
    }

    /// Reverse a takedown and restore the post into feeds.
    pub async fn untakedown(&self, post_id: &str) -> AppResult<()> {
        let record = self.coordinators.post(post_id).untakedown().await?;
        if record.is_deleted {
            return Ok(());
        }
        self.search
            .index_post(
                post_id,
                &record.content,
                record.created_at.timestamp_millis(),
            )
            .await?;
        self.enqueue(FanoutEvent::NewPost {
            post_id: post_id.to_string(),
            author_id: record.author_id,
            timestamp: record.created_at.timestamp_millis(),
        })
        .await;
        Ok(())
    }

    pub async fn get_post(&self, post_id: &str, viewer: Option<&str>) -> AppResult<PostView> {
        let snapshot = self
            .visible_snapshot(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post not found"))?;
        let mut view = snapshot.into_view();
        self.attach_viewer_edges(viewer, std::slice::from_mut(&mut view))
            .await?;
        Ok(view)
    }

    /// Ancestor chain (root first) plus direct replies (oldest first).
    pub async fn thread(&self, post_id: &str, viewer: Option<&str>) -> AppResult<Thread> {
        let snapshot = self
            .visible_snapshot(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post not found"))?;

        let mut ancestors = Vec::new();
        let mut cursor_id = snapshot.reply_to_id.clone();
        while let Some(parent_id) = cursor_id {
            if ancestors.len() >= MAX_THREAD_DEPTH {
                break;
            }
            match self.visible_snapshot(&parent_id).await? {
                Some(parent) => {
                    cursor_id = parent.reply_to_id.clone();
                    ancestors.push(parent);
                }
                None => break,
            }
        }
        ancestors.reverse();

        let reply_ids = self.load_index(&keys::replies(post_id)).await?;
        let mut replies = Vec::with_capacity(reply_ids.len());
        for reply_id in reply_ids.iter().rev() {
            if let Some(reply) = self.visible_snapshot(reply_id).await? {
                replies.push(reply);
            }
        }

        let mut thread = Thread {
            ancestors: ancestors.into_iter().map(PostSnapshot::into_view).collect(),
            post: snapshot.into_view(),
            replies: replies.into_iter().map(PostSnapshot::into_view).collect(),
        };
        self.attach_viewer_edges(viewer, &mut thread.ancestors).await?;
        self.attach_viewer_edges(viewer, std::slice::from_mut(&mut thread.post))
            .await?;
        self.attach_viewer_edges(viewer, &mut thread.replies).await?;
        Ok(thread)
    }

    /// Page through an author's posts, filtered to the requested slice.
    pub async fn author_posts(
        &self,
        author_id: &str,
        listing: AuthorListing,
        limit: usize,
        cursor_token: Option<&str>,
    ) -> AppResult<PostPage> {
        let ids = self.load_index(&keys::user_posts(author_id)).await?;
        self.page_posts(ids, limit, cursor_token, viewer_filter(listing))
            .await
    }

    /// A user's recently-liked posts, newest like first.
    pub async fn liked_posts(&self, user_id: &str, limit: usize) -> AppResult<Vec<PostView>> {
        let ids = self.coordinators.user(user_id).liked_posts(limit).await?;
        let mut posts = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(snapshot) = self.visible_snapshot(id).await? {
                posts.push(snapshot.into_view());
            }
        }
        Ok(posts)
    }

    pub async fn attach_viewer_edges(
        &self,
        viewer: Option<&str>,
        posts: &mut [PostView],
    ) -> AppResult<()> {
        let Some(viewer_id) = viewer else {
            return Ok(());
        };
        for view in posts.iter_mut() {
            match self.coordinators.post(&view.post.id).get().await {
                Ok(record) => {
                    view.has_liked = Some(record.likes.contains(viewer_id));
                    view.has_reposted = Some(record.reposts.contains(viewer_id));
                }
                Err(e) if e.status_code() == 404 => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn page_posts(
        &self,
        ids: Vec<String>,
        limit: usize,
        cursor_token: Option<&str>,
        keep: fn(&PostSnapshot) -> bool,
    ) -> AppResult<PostPage> {
        let position = match cursor_token {
            Some(token) => Some(cursor::decode(token)?),
            None => None,
        };

        let mut posts: Vec<PostView> = Vec::with_capacity(limit);
        let mut last: Option<(i64, String)> = None;
        let mut has_more = false;

        for id in &ids {
            let timestamp = snowflake_id::timestamp_ms(id).unwrap_or(0) as i64;
            if let Some((cursor_ts, cursor_id)) = &position {
                if !cursor::is_after(timestamp, id, *cursor_ts, cursor_id) {
                    continue;
                }
            }
            if posts.len() == limit {
                has_more = true;
                break;
            }
            let Some(snapshot) = self.visible_snapshot(id).await? else {
                continue;
            };
            if !keep(&snapshot) {
                continue;
            }
            last = Some((timestamp, id.clone()));
            posts.push(snapshot.into_view());
        }

        Ok(PostPage {
            posts,
            cursor: last.map(|(ts, id)| cursor::encode(ts, &id)),
            has_more,
        })
    }

    async fn notify_mentions(
        &self,
        author: &UserRecord,
        actor: &ActorSnapshot,
        record: &PostRecord,
    ) -> AppResult<()> {
        for handle in extract_mentions(&record.content) {
            let Some(user_id) = self
                .kv
                .get(&keys::handle(&handle))
                .await
                .map_err(kv_err)?
            else {
                continue;
            };
            // Blocked users don't get pinged by who they blocked.
            if self
                .coordinators
                .user(&user_id)
                .get()
                .await
                .map(|target| target.blocked.contains(&author.id))
                .unwrap_or(true)
            {
                continue;
            }
            self.notifications
                .notify(NotifyRequest {
                    recipient_id: user_id,
                    kind: NotificationKind::Mention,
                    actor_id: author.id.clone(),
                    actor: actor.clone(),
                    post_id: Some(record.id.clone()),
                    content_preview: Notification::preview_of(&record.content),
                })
                .await?;
        }
        Ok(())
    }

    async fn notify_related(
        &self,
        target_post_id: &str,
        actor: &ActorSnapshot,
        actor_id: &str,
        kind: NotificationKind,
        content: &str,
    ) -> AppResult<()> {
        let Some(target) = self.visible_snapshot(target_post_id).await? else {
            return Ok(());
        };
        self.notifications
            .notify(NotifyRequest {
                recipient_id: target.author_id,
                kind,
                actor_id: actor_id.to_string(),
                actor: actor.clone(),
                post_id: Some(target_post_id.to_string()),
                content_preview: Notification::preview_of(content),
            })
            .await
    }

    fn mint_id(&self) -> AppResult<String> {
        self.ids
            .generate()
            .map_err(|e| AppError::internal(format!("id generation failed: {}", e)))
    }

    async fn enqueue(&self, event: FanoutEvent) {
        if let Err(e) = fanout::publish(self.queue.as_ref(), &event).await {
            warn!("fanout enqueue failed (queue will not carry {:?}): {}", event, e);
        }
    }

    async fn visible_snapshot(&self, post_id: &str) -> AppResult<Option<PostSnapshot>> {
        let blob = self
            .kv
            .get(&keys::post_snapshot(post_id))
            .await
            .map_err(kv_err)?;
        let Some(blob) = blob else {
            return Ok(None);
        };
        let snapshot: PostSnapshot = serde_json::from_str(&blob)
            .map_err(|e| AppError::internal(format!("corrupt post snapshot: {}", e)))?;
        Ok(snapshot.is_visible().then_some(snapshot))
    }

    async fn load_index(&self, key: &str) -> AppResult<Vec<String>> {
        match self.kv.get(key).await.map_err(kv_err)? {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| AppError::internal(format!("corrupt post index: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn prepend_index(&self, key: &str, post_id: &str) -> AppResult<()> {
        let mut ids = self.load_index(key).await?;
        if !ids.iter().any(|id| id == post_id) {
            ids.insert(0, post_id.to_string());
            let blob = serde_json::to_string(&ids)
                .map_err(|e| AppError::internal(format!("serialize post index: {}", e)))?;
            self.kv.set(key, &blob).await.map_err(kv_err)?;
        }
        Ok(())
    }

    async fn remove_from_index(&self, key: &str, post_id: &str) -> AppResult<()> {
        let mut ids = self.load_index(key).await?;
        let before = ids.len();
        ids.retain(|id| id != post_id);
        if ids.len() != before {
            let blob = serde_json::to_string(&ids)
                .map_err(|e| AppError::internal(format!("serialize post index: {}", e)))?;
            self.kv.set(key, &blob).await.map_err(kv_err)?;
        }
        Ok(())
    }
}

fn viewer_filter(listing: AuthorListing) -> fn(&PostSnapshot) -> bool {
    match listing {
        AuthorListing::Posts => |snapshot| snapshot.reply_to_id.is_none(),
        AuthorListing::Replies => |snapshot| snapshot.reply_to_id.is_some(),
        AuthorListing::Media => |snapshot| !snapshot.media_urls.is_empty(),
    }
}

fn actor_snapshot(user: &UserRecord) -> ActorSnapshot {
    ActorSnapshot {
        handle: user.handle.clone(),
        display_name: user.profile.display_name.clone(),
        avatar_url: user.profile.avatar_url.clone(),
    }
}
