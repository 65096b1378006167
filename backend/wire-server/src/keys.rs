//! KV key layout
//!
//! Every key the service writes is built here so the layout stays in one
//! place. Coordinators own their blobs; snapshot keys are refreshed by the
//! owning coordinator and only read elsewhere.

/// Authoritative user blob, owned by the user coordinator.
pub fn user(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Recency-ordered liked-post ids, owned by the user coordinator.
pub fn user_likes(user_id: &str) -> String {
    format!("user:{}:likes", user_id)
}

/// Authoritative post blob, owned by the post coordinator.
pub fn post_record(post_id: &str) -> String {
    format!("post-record:{}", post_id)
}

/// Denormalized post snapshot for cheap reads.
pub fn post_snapshot(post_id: &str) -> String {
    format!("post:{}", post_id)
}

pub const POST_SNAPSHOT_PREFIX: &str = "post:";

/// Cached public profile, 1 h TTL.
pub fn profile(handle: &str) -> String {
    format!("profile:{}", handle)
}

/// Handle reservation: handle → user id.
pub fn handle(handle: &str) -> String {
    format!("handle:{}", handle)
}

/// Email reservation: email → user id.
pub fn email(email: &str) -> String {
    format!("email:{}", email)
}

/// Feed blob, owned by the feed coordinator.
pub fn feed(user_id: &str) -> String {
    format!("feed:{}", user_id)
}

/// Authored-post index (newest first).
pub fn user_posts(user_id: &str) -> String {
    format!("user-posts:{}", user_id)
}

/// Reply ids under a parent post.
pub fn replies(post_id: &str) -> String {
    format!("replies:{}", post_id)
}

pub fn word(token: &str, post_id: &str) -> String {
    format!("word:{}:{}", token, post_id)
}

pub fn word_prefix(token: &str) -> String {
    format!("word:{}:", token)
}

/// Reverse map post → indexed tokens, for deletion.
pub fn search_tokens(post_id: &str) -> String {
    format!("idx:{}", post_id)
}

pub fn handle_prefix(prefix: &str) -> String {
    format!("handle-prefix:{}", prefix)
}

pub fn name_prefix(prefix: &str) -> String {
    format!("name-prefix:{}", prefix)
}

pub const EXPLORE_RANKED: &str = "explore:ranked";

/// Cached ban verdict, 60 s TTL.
pub fn ban_status(user_id: &str) -> String {
    format!("ban-status:{}", user_id)
}

/// Sliding-window rate-limit counter.
pub fn rate_limit(bucket: &str, key: &str) -> String {
    format!("rl:{}:{}", bucket, key)
}

/// Password-reset token, 15 min TTL, single use.
pub fn reset(user_id: &str) -> String {
    format!("reset:{}", user_id)
}

pub fn notification(user_id: &str, notification_id: &str) -> String {
    format!("notifications:{}:{}", user_id, notification_id)
}

pub fn notification_list(user_id: &str) -> String {
    format!("notification_list:{}", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(user("42"), "user:42");
        assert_eq!(user_likes("42"), "user:42:likes");
        assert_eq!(post_record("7"), "post-record:7");
        assert_eq!(post_snapshot("7"), "post:7");
        assert_eq!(profile("alice"), "profile:alice");
        assert_eq!(word("rust", "7"), "word:rust:7");
        assert_eq!(word_prefix("rust"), "word:rust:");
        assert_eq!(search_tokens("7"), "idx:7");
        assert_eq!(rate_limit("login", "1.2.3.4"), "rl:login:1.2.3.4");
        assert_eq!(notification("42", "9"), "notifications:42:9");
    }

    #[test]
    fn test_prefix_keys_cannot_collide_with_reservations() {
        // `handle:{h}` is the signup reservation; the search prefixes use
        // their own namespace.
        assert_ne!(handle("abc"), handle_prefix("abc"));
    }
}
