//! Auth boundary scenarios: the signup race, ban enforcement on the
//! request path, and fail-closed behavior when the trust store is down.

use async_trait::async_trait;
use durable_queue::{BackoffPolicy, MemoryQueue};
use kv_store::{KvError, KvResult, KvStore, MemoryKv};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wire_server::auth::SignupRequest;
use wire_server::config::test_config;
use wire_server::objects::MemoryObjectStore;
use wire_server::state::AppState;

fn state_with(kv: Arc<dyn KvStore>) -> AppState {
    AppState::new(
        test_config(),
        kv,
        Arc::new(MemoryQueue::new(BackoffPolicy::default())),
        Arc::new(MemoryObjectStore::new()),
    )
}

fn signup_request(handle: &str, email: &str) -> SignupRequest {
    SignupRequest {
        handle: handle.to_string(),
        email: email.to_string(),
        password: "Password1".to_string(),
        display_name: None,
    }
}

/// KV wrapper that can be switched into a failing mode.
struct FlakyKv {
    inner: MemoryKv,
    failing: AtomicBool,
}

impl FlakyKv {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryKv::new(),
            failing: AtomicBool::new(false),
        })
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> KvResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(KvError::Unreachable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FlakyKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        self.check()?;
        self.inner.set_ex(key, value, ttl_secs).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<bool> {
        self.check()?;
        self.inner.set_nx(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> KvResult<u64> {
        self.check()?;
        self.inner.incr_window(key, window_secs).await
    }

    async fn list_prefix(&self, prefix: &str, limit: usize) -> KvResult<Vec<(String, String)>> {
        self.check()?;
        self.inner.list_prefix(prefix, limit).await
    }

    async fn ping(&self) -> KvResult<()> {
        self.check()
    }
}

#[tokio::test]
async fn test_concurrent_signup_race_single_winner() {
    let state = state_with(Arc::new(MemoryKv::new()));

    // Two concurrent signups for the same handle from different IPs.
    let (first, second) = tokio::join!(
        state
            .auth
            .signup(signup_request("alice", "one@example.com"), "1.1.1.1"),
        state
            .auth
            .signup(signup_request("alice", "two@example.com"), "1.1.1.2"),
    );

    let outcomes = [first, second];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one signup may win the handle");

    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    let err = loser.as_ref().unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert!(err.to_string().to_lowercase().contains("handle"));

    // No orphaned state: the losing email reservation is gone, and exactly
    // one user record exists.
    let user_id = state.kv.get("handle:alice").await.unwrap().unwrap();
    assert!(state.kv.get(&format!("user:{}", user_id)).await.unwrap().is_some());

    let winner_id = outcomes
        .iter()
        .find_map(|r| r.as_ref().ok())
        .map(|resp| resp.user.id.clone())
        .unwrap();
    assert_eq!(winner_id, user_id);

    let emails = [
        state.kv.get("email:one@example.com").await.unwrap(),
        state.kv.get("email:two@example.com").await.unwrap(),
    ];
    assert_eq!(emails.iter().filter(|e| e.is_some()).count(), 1);
}

#[tokio::test]
async fn test_banned_user_fails_request_path_within_cache_window() {
    let state = state_with(Arc::new(MemoryKv::new()));

    let response = state
        .auth
        .signup(signup_request("alice", "alice@example.com"), "1.1.1.1")
        .await
        .unwrap();
    let user_id = response.user.id;

    state.auth.check_ban(&user_id).await.unwrap();
    state.users.ban("alice", "spam").await.unwrap();

    // Banning invalidates the cached verdict, so the very next check is
    // already a 403.
    let err = state.auth.check_ban(&user_id).await.unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_ban_check_fails_closed_when_store_unreachable() {
    let kv = FlakyKv::new();
    let state = state_with(kv.clone());

    let response = state
        .auth
        .signup(signup_request("alice", "alice@example.com"), "1.1.1.1")
        .await
        .unwrap();

    kv.fail(true);
    let err = state.auth.check_ban(&response.user.id).await.unwrap_err();
    assert_eq!(err.status_code(), 503, "trust checks must fail closed");

    kv.fail(false);
    state.auth.check_ban(&response.user.id).await.unwrap();
}

#[tokio::test]
async fn test_token_round_trip_through_state() {
    let state = state_with(Arc::new(MemoryKv::new()));

    let response = state
        .auth
        .signup(signup_request("alice", "alice@example.com"), "1.1.1.1")
        .await
        .unwrap();

    let claims = state.auth.verify_token(&response.token).unwrap();
    assert_eq!(claims.sub, response.user.id);
    assert_eq!(claims.handle, "alice");
    assert_eq!(claims.email, "alice@example.com");

    let refreshed = state.auth.refresh(&claims.sub).await.unwrap();
    let refreshed_claims = state.auth.verify_token(&refreshed.token).unwrap();
    assert_eq!(refreshed_claims.sub, claims.sub);
}
