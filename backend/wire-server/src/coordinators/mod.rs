//! Per-entity coordinators
//!
//! Each entity (user, post, feed) has a single-writer owner: all
//! operations on one entity serialize through that entity's lock, and
//! every operation is load-at-start / save-before-return around its
//! suspension points. Work on different entities runs in parallel.
//! Coordinators never take another coordinator's lock; cross-entity
//! workflows are choreographed by the service layer as sequential calls.

pub mod feed;
pub mod post;
pub mod user;

pub use feed::{FeedCoord, FeedPage};
pub use post::PostCoord;
pub use user::{ProfileUpdate, SettingsUpdate, UserCoord};

use dashmap::DashMap;
use error_types::{AppError, AppResult};
use kv_store::{KvError, KvStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Deadline applied to every coordinator operation.
pub const COORDINATOR_DEADLINE: Duration = Duration::from_secs(5);

pub(crate) fn kv_err(err: KvError) -> AppError {
    match err {
        KvError::Unreachable(msg) => AppError::dependency(msg),
        KvError::Operation(msg) => AppError::internal(msg),
    }
}

pub(crate) async fn with_deadline<T, F>(op: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(COORDINATOR_DEADLINE, op)
        .await
        .map_err(|_| AppError::dependency("coordinator deadline exceeded"))?
}

/// Registry handing out coordinator handles. The per-entity locks live
/// here so two handles to the same entity share one writer slot.
pub struct Coordinators {
    kv: Arc<dyn KvStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Coordinators {
    pub fn new(kv: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self {
            kv,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, slot: String) -> Arc<Mutex<()>> {
        self.locks
            .entry(slot)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn user(&self, user_id: &str) -> UserCoord {
        UserCoord::new(
            Arc::clone(&self.kv),
            self.lock_for(format!("user:{}", user_id)),
            user_id.to_string(),
        )
    }

    pub fn post(&self, post_id: &str) -> PostCoord {
        PostCoord::new(
            Arc::clone(&self.kv),
            self.lock_for(format!("post:{}", post_id)),
            post_id.to_string(),
        )
    }

    pub fn feed(&self, user_id: &str) -> FeedCoord {
        FeedCoord::new(
            Arc::clone(&self.kv),
            self.lock_for(format!("feed:{}", user_id)),
            user_id.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::MemoryKv;

    #[tokio::test]
    async fn test_same_entity_shares_a_lock() {
        let coordinators = Coordinators::new(Arc::new(MemoryKv::new()));
        let a = coordinators.lock_for("user:1".to_string());
        let b = coordinators.lock_for("user:1".to_string());
        assert!(Arc::ptr_eq(&a, &b));

        let c = coordinators.lock_for("user:2".to_string());
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_results_through() {
        let ok: AppResult<u32> = with_deadline(async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: AppResult<u32> =
            with_deadline(async { Err(AppError::not_found("missing")) }).await;
        assert_eq!(err.unwrap_err().status_code(), 404);
    }
}
