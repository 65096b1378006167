//! User coordinator
//!
//! Owns the authoritative user blob at `user:{id}` and the bounded
//! liked-post list at `user:{id}:likes`. Duplicate adds and removes of
//! non-members are no-op successes; counters floor at zero and always
//! mirror set cardinality.

use super::{kv_err, with_deadline};
use crate::keys;
use crate::models::{PasswordVerifier, UserRecord, LIKED_POSTS_CAP};
use chrono::Utc;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutable profile fields. Everything else (id, handle, joined_at, counts,
/// is_verified, moderation flags) is immutable through this path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub email_notifications: Option<bool>,
    pub private_account: Option<bool>,
    pub muted_words: Option<Vec<String>>,
}

pub struct UserCoord {
    kv: Arc<dyn KvStore>,
    lock: Arc<Mutex<()>>,
    user_id: String,
}

impl UserCoord {
    pub(super) fn new(kv: Arc<dyn KvStore>, lock: Arc<Mutex<()>>, user_id: String) -> Self {
        Self { kv, lock, user_id }
    }

    async fn load(&self) -> AppResult<UserRecord> {
        let blob = self
            .kv
            .get(&keys::user(&self.user_id))
            .await
            .map_err(kv_err)?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        serde_json::from_str(&blob)
            .map_err(|e| AppError::internal(format!("corrupt user record {}: {}", self.user_id, e)))
    }

    /// Persist the blob and drop the derived profile snapshot; the next
    /// read repopulates it.
    async fn save(&self, record: &mut UserRecord) -> AppResult<()> {
        record.version += 1;
        let blob = serde_json::to_string(record)
            .map_err(|e| AppError::internal(format!("serialize user record: {}", e)))?;
        self.kv
            .set(&keys::user(&self.user_id), &blob)
            .await
            .map_err(kv_err)?;
        self.kv
            .delete(&keys::profile(&record.handle))
            .await
            .map_err(kv_err)?;
        Ok(())
    }

    /// Create the blob once. Fails with a conflict if the user exists.
    pub async fn initialize(&self, record: &UserRecord) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let blob = serde_json::to_string(record)
                .map_err(|e| AppError::internal(format!("serialize user record: {}", e)))?;
            let created = self
                .kv
                .set_nx(&keys::user(&self.user_id), &blob, None)
                .await
                .map_err(kv_err)?;
            if !created {
                return Err(AppError::conflict("User already initialized"));
            }
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn get(&self) -> AppResult<UserRecord> {
        let op = async {
            let _guard = self.lock.lock().await;
            self.load().await
        };
        with_deadline(op).await
    }

    /// Apply a whitelisted profile update. Returns the saved record and,
    /// when the display name changed, the old value so the caller can
    /// re-index the user search prefixes.
    pub async fn update_profile(
        &self,
        update: ProfileUpdate,
    ) -> AppResult<(UserRecord, Option<String>)> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;

            let mut old_display_name = None;
            if let Some(display_name) = update.display_name {
                let display_name = display_name.trim().to_string();
                if display_name.is_empty() || display_name.chars().count() > 50 {
                    return Err(AppError::validation(
                        "Display name must be 1-50 characters",
                    ));
                }
                if display_name != record.profile.display_name {
                    old_display_name = Some(record.profile.display_name.clone());
                    record.profile.display_name = display_name;
                }
            }
            if let Some(bio) = update.bio {
                if bio.chars().count() > 160 {
                    return Err(AppError::validation("Bio must be at most 160 characters"));
                }
                record.profile.bio = bio;
            }
            if let Some(location) = update.location {
                record.profile.location = location;
            }
            if let Some(website) = update.website {
                record.profile.website = website;
            }
            if let Some(avatar_url) = update.avatar_url {
                record.profile.avatar_url = avatar_url;
            }
            if let Some(banner_url) = update.banner_url {
                record.profile.banner_url = banner_url;
            }

            self.save(&mut record).await?;
            Ok((record, old_display_name))
        };
        with_deadline(op).await
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> AppResult<UserRecord> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;

            if let Some(email_notifications) = update.email_notifications {
                record.settings.email_notifications = email_notifications;
            }
            if let Some(private_account) = update.private_account {
                record.settings.private_account = private_account;
            }
            if let Some(muted_words) = update.muted_words {
                record.settings.muted_words = muted_words
                    .into_iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect();
            }

            self.save(&mut record).await?;
            Ok(record)
        };
        with_deadline(op).await
    }

    /// Add `target_id` to this user's following set.
    pub async fn follow(&self, target_id: &str) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if record.following.insert(target_id.to_string()) {
                record.counters.following_count = record.following.len() as u64;
                self.save(&mut record).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    /// Remove `target_id` from this user's following set. Self-follow is an
    /// invariant, so self-unfollow is rejected.
    pub async fn unfollow(&self, target_id: &str) -> AppResult<()> {
        if target_id == self.user_id {
            return Err(AppError::validation("Cannot unfollow yourself"));
        }
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if record.following.remove(target_id) {
                record.counters.following_count = record.following.len() as u64;
                self.save(&mut record).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    /// Mirror side of a follow edge.
    pub async fn add_follower(&self, follower_id: &str) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if record.followers.insert(follower_id.to_string()) {
                record.counters.follower_count = record.followers.len() as u64;
                self.save(&mut record).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn remove_follower(&self, follower_id: &str) -> AppResult<()> {
        if follower_id == self.user_id {
            return Err(AppError::validation("Cannot remove yourself as follower"));
        }
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if record.followers.remove(follower_id) {
                record.counters.follower_count = record.followers.len() as u64;
                self.save(&mut record).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    /// Block severs both follow edges on this side in the same write, so
    /// no interleaved operation can observe a blocked-but-followed state.
    pub async fn block(&self, target_id: &str) -> AppResult<()> {
        if target_id == self.user_id {
            return Err(AppError::validation("Cannot block yourself"));
        }
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;

            let mut changed = record.blocked.insert(target_id.to_string());
            if record.following.remove(target_id) {
                record.counters.following_count = record.following.len() as u64;
                changed = true;
            }
            if record.followers.remove(target_id) {
                record.counters.follower_count = record.followers.len() as u64;
                changed = true;
            }
            if changed {
                self.save(&mut record).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn unblock(&self, target_id: &str) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            if record.blocked.remove(target_id) {
                self.save(&mut record).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn is_following(&self, target_id: &str) -> AppResult<bool> {
        Ok(self.get().await?.following.contains(target_id))
    }

    pub async fn is_blocked(&self, target_id: &str) -> AppResult<bool> {
        Ok(self.get().await?.blocked.contains(target_id))
    }

    pub async fn is_banned(&self) -> AppResult<bool> {
        Ok(self.get().await?.profile.is_banned)
    }

    pub async fn is_admin(&self) -> AppResult<bool> {
        Ok(self.get().await?.profile.is_admin)
    }

    pub async fn increment_post_count(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.counters.post_count += 1;
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    pub async fn decrement_post_count(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.counters.post_count = record.counters.post_count.saturating_sub(1);
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    /// Ban the account and drop the cached ban verdict so the next
    /// trust check reads the authoritative flag.
    pub async fn ban(&self, reason: &str) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.profile.is_banned = true;
            record.profile.banned_at = Some(Utc::now());
            record.profile.banned_reason = Some(reason.to_string());
            self.save(&mut record).await?;
            self.kv
                .delete(&keys::ban_status(&self.user_id))
                .await
                .map_err(kv_err)?;
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn unban(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.profile.is_banned = false;
            record.profile.banned_at = None;
            record.profile.banned_reason = None;
            self.save(&mut record).await?;
            self.kv
                .delete(&keys::ban_status(&self.user_id))
                .await
                .map_err(kv_err)?;
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn set_admin(&self, is_admin: bool) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.profile.is_admin = is_admin;
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    pub async fn set_password(&self, verifier: PasswordVerifier) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.password = verifier;
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    pub async fn touch_last_login(&self) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut record = self.load().await?;
            record.last_login = Some(Utc::now());
            self.save(&mut record).await
        };
        with_deadline(op).await
    }

    /// Prepend to the liked-post list, newest first, bounded.
    pub async fn record_like(&self, post_id: &str) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut liked = self.load_likes().await?;
            liked.retain(|id| id != post_id);
            liked.insert(0, post_id.to_string());
            liked.truncate(LIKED_POSTS_CAP);
            self.save_likes(&liked).await
        };
        with_deadline(op).await
    }

    pub async fn remove_like(&self, post_id: &str) -> AppResult<()> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut liked = self.load_likes().await?;
            let before = liked.len();
            liked.retain(|id| id != post_id);
            if liked.len() != before {
                self.save_likes(&liked).await?;
            }
            Ok(())
        };
        with_deadline(op).await
    }

    pub async fn liked_posts(&self, limit: usize) -> AppResult<Vec<String>> {
        let op = async {
            let _guard = self.lock.lock().await;
            let mut liked = self.load_likes().await?;
            liked.truncate(limit);
            Ok(liked)
        };
        with_deadline(op).await
    }

    async fn load_likes(&self) -> AppResult<Vec<String>> {
        let blob = self
            .kv
            .get(&keys::user_likes(&self.user_id))
            .await
            .map_err(kv_err)?;
        match blob {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| AppError::internal(format!("corrupt liked list: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn save_likes(&self, liked: &[String]) -> AppResult<()> {
        let blob = serde_json::to_string(liked)
            .map_err(|e| AppError::internal(format!("serialize liked list: {}", e)))?;
        self.kv
            .set(&keys::user_likes(&self.user_id), &blob)
            .await
            .map_err(kv_err)
    }
}
