//! User workflows
//!
//! Profile reads ride the cached snapshot at `profile:{handle}`; every
//! mutation goes through the user coordinator, which invalidates that
//! snapshot. Follow and block edges are choreographed as sequential
//! coordinator calls — never under more than one entity lock at a time.

use crate::coordinators::{kv_err, Coordinators, ProfileUpdate, SettingsUpdate};
use crate::keys;
use crate::models::{
    ActorSnapshot, NotificationKind, PublicProfile, UserRecord, UserSettings,
};
use crate::services::notifications::{NotificationService, NotifyRequest};
use crate::services::search::SearchIndex;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const PROFILE_CACHE_TTL_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: PublicProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_following: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct UserPage {
    pub users: Vec<PublicProfile>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct UserService {
    kv: Arc<dyn KvStore>,
    coordinators: Arc<Coordinators>,
    search: SearchIndex,
    notifications: NotificationService,
}

impl UserService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        coordinators: Arc<Coordinators>,
        search: SearchIndex,
        notifications: NotificationService,
    ) -> Self {
        Self {
            kv,
            coordinators,
            search,
            notifications,
        }
    }

    /// Resolve a handle to a user id through the reservation key.
    pub async fn resolve_handle(&self, handle: &str) -> AppResult<String> {
        self.kv
            .get(&keys::handle(&handle.to_lowercase()))
            .await
            .map_err(kv_err)?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    /// Public profile with the viewer's follow edge. Banned accounts read
    /// as missing.
    pub async fn public_profile(
        &self,
        handle: &str,
        viewer: Option<&str>,
    ) -> AppResult<ProfileResponse> {
        let handle = handle.to_lowercase();
        let profile = match self.cached_profile(&handle).await? {
            Some(profile) => profile,
            None => {
                let user_id = self.resolve_handle(&handle).await?;
                let record = self.coordinators.user(&user_id).get().await?;
                if record.profile.is_banned {
                    return Err(AppError::not_found("User not found"));
                }
                let profile = record.public_profile();
                self.cache_profile(&handle, &profile).await?;
                profile
            }
        };

        let is_following = match viewer {
            Some(viewer_id) if viewer_id != profile.id => Some(
                self.coordinators
                    .user(viewer_id)
                    .is_following(&profile.id)
                    .await?,
            ),
            _ => None,
        };

        Ok(ProfileResponse {
            profile,
            is_following,
        })
    }

    pub async fn me(&self, user_id: &str) -> AppResult<UserRecord> {
        self.coordinators.user(user_id).get().await
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> AppResult<PublicProfile> {
        let (record, old_display_name) =
            self.coordinators.user(user_id).update_profile(update).await?;
        if let Some(old) = old_display_name {
            self.search
                .reindex_display_name(user_id, &old, &record.profile.display_name)
                .await?;
        }
        Ok(record.public_profile())
    }

    pub async fn settings(&self, user_id: &str) -> AppResult<UserSettings> {
        Ok(self.coordinators.user(user_id).get().await?.settings)
    }

    pub async fn update_settings(
        &self,
        user_id: &str,
        update: SettingsUpdate,
    ) -> AppResult<UserSettings> {
        Ok(self
            .coordinators
            .user(user_id)
            .update_settings(update)
            .await?
            .settings)
    }

    /// Follow by handle. Both sides of the edge are updated sequentially;
    /// the operations are individually idempotent so replays converge.
    pub async fn follow(&self, follower_id: &str, target_handle: &str) -> AppResult<()> {
        let target_id = self.resolve_handle(target_handle).await?;
        if target_id == follower_id {
            // Self-follow already holds as an invariant.
            return Ok(());
        }

        let follower = self.coordinators.user(follower_id).get().await?;
        if follower.blocked.contains(&target_id) {
            return Err(AppError::forbidden("Cannot follow a blocked user"));
        }
        let target = self.coordinators.user(&target_id).get().await?;
        if target.blocked.contains(follower_id) {
            return Err(AppError::forbidden("Cannot follow this user"));
        }
        if target.profile.is_banned {
            return Err(AppError::not_found("User not found"));
        }

        self.coordinators.user(follower_id).follow(&target_id).await?;
        self.coordinators
            .user(&target_id)
            .add_follower(follower_id)
            .await?;

        self.notifications
            .notify(NotifyRequest {
                recipient_id: target_id.clone(),
                kind: NotificationKind::Follow,
                actor_id: follower_id.to_string(),
                actor: actor_of(&follower),
                post_id: None,
                content_preview: None,
            })
            .await?;

        debug!(follower = %follower_id, target = %target_id, "follow edge added");
        Ok(())
    }

    pub async fn unfollow(&self, follower_id: &str, target_handle: &str) -> AppResult<()> {
        let target_id = self.resolve_handle(target_handle).await?;
        self.coordinators.user(follower_id).unfollow(&target_id).await?;
        self.coordinators
            .user(&target_id)
            .remove_follower(follower_id)
            .await?;
        Ok(())
    }

    /// Block: after this, no follow edge exists between the pair in either
    /// direction.
    pub async fn block(&self, blocker_id: &str, target_handle: &str) -> AppResult<()> {
        let target_id = self.resolve_handle(target_handle).await?;
        self.coordinators.user(blocker_id).block(&target_id).await?;
        // Mirror side: the target no longer follows or is followed by the
        // blocker.
        self.coordinators
            .user(&target_id)
            .unfollow(blocker_id)
            .await?;
        self.coordinators
            .user(&target_id)
            .remove_follower(blocker_id)
            .await?;

        debug!(blocker = %blocker_id, target = %target_id, "block applied");
        Ok(())
    }

    pub async fn unblock(&self, blocker_id: &str, target_handle: &str) -> AppResult<()> {
        let target_id = self.resolve_handle(target_handle).await?;
        self.coordinators.user(blocker_id).unblock(&target_id).await
    }

    pub async fn blocked_profiles(&self, user_id: &str) -> AppResult<Vec<PublicProfile>> {
        let record = self.coordinators.user(user_id).get().await?;
        let mut profiles = Vec::with_capacity(record.blocked.len());
        for blocked_id in &record.blocked {
            if let Ok(blocked) = self.coordinators.user(blocked_id).get().await {
                profiles.push(blocked.public_profile());
            }
        }
        Ok(profiles)
    }

    pub async fn followers(
        &self,
        handle: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> AppResult<UserPage> {
        let user_id = self.resolve_handle(handle).await?;
        let record = self.coordinators.user(&user_id).get().await?;
        self.page_users(&record.followers, &user_id, limit, cursor).await
    }

    pub async fn following(
        &self,
        handle: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> AppResult<UserPage> {
        let user_id = self.resolve_handle(handle).await?;
        let record = self.coordinators.user(&user_id).get().await?;
        self.page_users(&record.following, &user_id, limit, cursor).await
    }

    /// Moderation: ban an account. Existing sessions die at the next ban
    /// check (60 s cache window).
    pub async fn ban(&self, handle: &str, reason: &str) -> AppResult<()> {
        let user_id = self.resolve_handle(handle).await?;
        self.coordinators.user(&user_id).ban(reason).await
    }

    pub async fn unban(&self, handle: &str) -> AppResult<()> {
        let user_id = self.resolve_handle(handle).await?;
        self.coordinators.user(&user_id).unban().await
    }

    /// Resolve user-id lists (search hits) into public profiles, dropping
    /// banned accounts.
    pub async fn profiles_for_ids(&self, user_ids: &[String]) -> AppResult<Vec<PublicProfile>> {
        let mut profiles = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            match self.coordinators.user(user_id).get().await {
                Ok(record) if !record.profile.is_banned => {
                    profiles.push(record.public_profile())
                }
                Ok(_) => {}
                Err(e) if e.status_code() == 404 => {}
                Err(e) => return Err(e),
            }
        }
        Ok(profiles)
    }

    /// The relation sets have no timestamps; pages walk the set order with
    /// the last-returned id as the opaque cursor. Self-follow entries are
    /// not listed.
    async fn page_users(
        &self,
        member_ids: &std::collections::BTreeSet<String>,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> AppResult<UserPage> {
        let mut users = Vec::with_capacity(limit);
        let mut last: Option<String> = None;
        let mut has_more = false;

        for member_id in member_ids.iter() {
            if member_id == owner_id {
                continue;
            }
            if let Some(after) = cursor {
                if member_id.as_str() <= after {
                    continue;
                }
            }
            if users.len() == limit {
                has_more = true;
                break;
            }
            match self.coordinators.user(member_id).get().await {
                Ok(record) if !record.profile.is_banned => {
                    last = Some(member_id.clone());
                    users.push(record.public_profile());
                }
                Ok(_) => {}
                Err(e) if e.status_code() == 404 => {}
                Err(e) => return Err(e),
            }
        }

        Ok(UserPage {
            users,
            cursor: last,
            has_more,
        })
    }

    async fn cached_profile(&self, handle: &str) -> AppResult<Option<PublicProfile>> {
        match self.kv.get(&keys::profile(handle)).await.map_err(kv_err)? {
            Some(blob) => serde_json::from_str(&blob)
                .map(Some)
                .map_err(|e| AppError::internal(format!("corrupt profile cache: {}", e))),
            None => Ok(None),
        }
    }

    async fn cache_profile(&self, handle: &str, profile: &PublicProfile) -> AppResult<()> {
        let blob = serde_json::to_string(profile)
            .map_err(|e| AppError::internal(format!("serialize profile cache: {}", e)))?;
        self.kv
            .set_ex(&keys::profile(handle), &blob, PROFILE_CACHE_TTL_SECS)
            .await
            .map_err(kv_err)
    }
}

fn actor_of(user: &UserRecord) -> ActorSnapshot {
    ActorSnapshot {
        handle: user.handle.clone(),
        display_name: user.profile.display_name.clone(),
        avatar_url: user.profile.avatar_url.clone(),
    }
}
