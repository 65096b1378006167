use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Recency-ordered liked-post list cap.
pub const LIKED_POSTS_CAP: usize = 1_000;

/// PBKDF2-SHA256 password verifier. The iteration count is stored so old
/// verifiers keep validating after the default is raised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordVerifier {
    pub salt: String,
    pub hash: String,
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub banner_url: String,
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_banned: bool,
    pub banned_at: Option<DateTime<Utc>>,
    pub banned_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UserCounters {
    pub follower_count: u64,
    pub following_count: u64,
    pub post_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub email_notifications: bool,
    pub private_account: bool,
    #[serde(default)]
    pub muted_words: Vec<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            email_notifications: true,
            private_account: false,
            muted_words: Vec::new(),
        }
    }
}

/// Authoritative user state, persisted as one blob by the user coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub handle: String,
    pub email: String,
    pub password: PasswordVerifier,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub profile: Profile,
    #[serde(default)]
    pub counters: UserCounters,
    #[serde(default)]
    pub settings: UserSettings,
    #[serde(default)]
    pub following: BTreeSet<String>,
    #[serde(default)]
    pub followers: BTreeSet<String>,
    #[serde(default)]
    pub blocked: BTreeSet<String>,
    /// Bumped on every save.
    #[serde(default)]
    pub version: u64,
}

impl UserRecord {
    /// Fresh record for signup. Every user follows itself, so the relation
    /// sets and counters start at one.
    pub fn new(
        id: String,
        handle: String,
        email: String,
        password: PasswordVerifier,
        display_name: String,
    ) -> Self {
        let now = Utc::now();
        let mut following = BTreeSet::new();
        following.insert(id.clone());
        let mut followers = BTreeSet::new();
        followers.insert(id.clone());

        Self {
            id: id.clone(),
            handle,
            email,
            password,
            created_at: now,
            last_login: None,
            profile: Profile {
                display_name,
                joined_at: Some(now),
                ..Profile::default()
            },
            counters: UserCounters {
                follower_count: 1,
                following_count: 1,
                post_count: 0,
            },
            settings: UserSettings::default(),
            following,
            followers,
            blocked: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id.clone(),
            handle: self.handle.clone(),
            display_name: self.profile.display_name.clone(),
            bio: self.profile.bio.clone(),
            location: self.profile.location.clone(),
            website: self.profile.website.clone(),
            avatar_url: self.profile.avatar_url.clone(),
            banner_url: self.profile.banner_url.clone(),
            joined_at: self.profile.joined_at,
            is_verified: self.profile.is_verified,
            follower_count: self.counters.follower_count,
            following_count: self.counters.following_count,
            post_count: self.counters.post_count,
        }
    }
}

/// Denormalized profile served to clients, cached at `profile:{handle}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicProfile {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub bio: String,
    pub location: String,
    pub website: String,
    pub avatar_url: String,
    pub banner_url: String,
    pub joined_at: Option<DateTime<Utc>>,
    pub is_verified: bool,
    pub follower_count: u64,
    pub following_count: u64,
    pub post_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> PasswordVerifier {
        PasswordVerifier {
            salt: "aa".repeat(16),
            hash: "bb".repeat(32),
            iterations: 100_000,
        }
    }

    #[test]
    fn test_new_user_follows_itself() {
        let user = UserRecord::new(
            "1".into(),
            "alice".into(),
            "alice@example.com".into(),
            verifier(),
            "Alice".into(),
        );
        assert!(user.following.contains("1"));
        assert!(user.followers.contains("1"));
        assert_eq!(user.counters.following_count, 1);
        assert_eq!(user.counters.follower_count, 1);
        assert_eq!(user.counters.post_count, 0);
    }

    #[test]
    fn test_counters_match_set_sizes() {
        let user = UserRecord::new(
            "1".into(),
            "alice".into(),
            "alice@example.com".into(),
            verifier(),
            "Alice".into(),
        );
        assert_eq!(user.counters.following_count as usize, user.following.len());
        assert_eq!(user.counters.follower_count as usize, user.followers.len());
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let user = UserRecord::new(
            "1".into(),
            "alice".into(),
            "alice@example.com".into(),
            verifier(),
            "Alice".into(),
        );
        let json = serde_json::to_string(&user).unwrap();
        let back: UserRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.handle, "alice");
        assert!(back.following.contains("1"));
        assert!(back.settings.email_notifications);
    }

    #[test]
    fn test_public_profile_hides_credentials() {
        let user = UserRecord::new(
            "1".into(),
            "alice".into(),
            "alice@example.com".into(),
            verifier(),
            "Alice".into(),
        );
        let json = serde_json::to_value(user.public_profile()).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("email").is_none());
    }
}
