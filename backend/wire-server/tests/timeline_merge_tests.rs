//! Home-timeline merge and cursor-stability scenarios.

use durable_queue::{BackoffPolicy, DurableQueue, MemoryQueue};
use kv_store::{KvStore, MemoryKv};
use std::collections::HashSet;
use std::sync::Arc;
use wire_server::config::test_config;
use wire_server::objects::MemoryObjectStore;
use wire_server::services::posts::CreatePostInput;
use wire_server::services::FanoutWorker;
use wire_server::state::AppState;

struct Fixture {
    kv: Arc<MemoryKv>,
    state: AppState,
    worker: FanoutWorker,
}

fn fixture() -> Fixture {
    let kv = Arc::new(MemoryKv::new());
    let state = AppState::new(
        test_config(),
        kv.clone(),
        Arc::new(MemoryQueue::new(BackoffPolicy {
            base_secs: 0,
            ceiling_secs: 0,
        })),
        Arc::new(MemoryObjectStore::new()),
    );
    let worker = FanoutWorker::new(
        Arc::clone(&state.kv),
        Arc::clone(&state.coordinators),
        state.connections.clone(),
    );
    Fixture { kv, state, worker }
}

async fn drain_queue(fixture: &Fixture) {
    while let Some(envelope) = fixture.state.queue.consume().await.unwrap() {
        fixture.worker.handle(envelope.payload.clone()).await.unwrap();
        fixture.state.queue.ack(&envelope).await.unwrap();
    }
}

async fn signup(fixture: &Fixture, handle: &str) -> String {
    fixture
        .state
        .auth
        .signup(
            wire_server::auth::SignupRequest {
                handle: handle.to_string(),
                email: format!("{}@example.com", handle),
                password: "Password1".to_string(),
                display_name: None,
            },
            &format!("ip-{}", handle),
        )
        .await
        .unwrap()
        .user
        .id
}

async fn post(fixture: &Fixture, author: &str, content: &str) -> String {
    let view = fixture
        .state
        .posts
        .create_post(
            author,
            CreatePostInput {
                content: content.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    view.post.id
}

#[tokio::test]
async fn test_round_robin_merge_f_f_x() {
    let fixture = fixture();

    let reader = signup(&fixture, "reader").await;
    let friend = signup(&fixture, "friend").await;
    let stranger = signup(&fixture, "stranger").await;
    fixture.state.users.follow(&reader, "friend").await.unwrap();

    // Five followed posts; after the reverse, followed_ids[0] is the
    // newest (the feed serves newest first).
    let mut followed_ids = Vec::new();
    for i in 1..=5 {
        followed_ids.push(post(&fixture, &friend, &format!("followed {}", i)).await);
    }
    followed_ids.reverse();

    let q1 = post(&fixture, &stranger, "explore one").await;
    let q2 = post(&fixture, &stranger, "explore two").await;
    drain_queue(&fixture).await;

    // Hand-rank the explore cache: q1 before q2.
    let candidates = serde_json::json!([
        {"post_id": q1, "author_id": stranger, "score": 2.0, "created_at_ms": 0},
        {"post_id": q2, "author_id": stranger, "score": 1.0, "created_at_ms": 0},
    ]);
    fixture
        .kv
        .set("explore:ranked", &candidates.to_string())
        .await
        .unwrap();

    let page = fixture.state.timeline.home(&reader, 6, None).await.unwrap();
    let ids: Vec<&str> = page.posts.iter().map(|p| p.post.id.as_str()).collect();

    assert_eq!(
        ids,
        vec![
            followed_ids[0].as_str(),
            followed_ids[1].as_str(),
            q1.as_str(),
            followed_ids[2].as_str(),
            followed_ids[3].as_str(),
            q2.as_str(),
        ],
        "expected the strict F,F,X,F,F,X interleave"
    );
}

#[tokio::test]
async fn test_cursor_paging_yields_no_duplicates() {
    let fixture = fixture();

    let reader = signup(&fixture, "reader").await;
    let friend = signup(&fixture, "friend").await;
    fixture.state.users.follow(&reader, "friend").await.unwrap();

    for i in 0..12 {
        post(&fixture, &friend, &format!("post number {}", i)).await;
    }
    drain_queue(&fixture).await;

    let mut seen: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut total = 0;

    loop {
        let page = fixture
            .state
            .timeline
            .chronological(&reader, 5, cursor.as_deref())
            .await
            .unwrap();
        for view in &page.posts {
            assert!(
                seen.insert(view.post.id.clone()),
                "post {} served twice across pages",
                view.post.id
            );
            total += 1;
        }
        if page.posts.is_empty() || page.cursor.is_none() {
            break;
        }
        cursor = page.cursor;
        if !page.has_more {
            // One more fetch proves the tail is empty, then stop.
            let tail = fixture
                .state
                .timeline
                .chronological(&reader, 5, cursor.as_deref())
                .await
                .unwrap();
            assert!(tail.posts.is_empty());
            break;
        }
    }

    assert_eq!(total, 12);
}

#[tokio::test]
async fn test_filter_churn_between_pages_skips_nothing() {
    let fixture = fixture();

    let reader = signup(&fixture, "reader").await;
    let friend = signup(&fixture, "friend").await;
    let other = signup(&fixture, "other").await;
    fixture.state.users.follow(&reader, "friend").await.unwrap();
    fixture.state.users.follow(&reader, "other").await.unwrap();

    let mut expected_other: Vec<String> = Vec::new();
    for i in 0..4 {
        post(&fixture, &friend, &format!("friend {}", i)).await;
        expected_other.push(post(&fixture, &other, &format!("other {}", i)).await);
    }
    drain_queue(&fixture).await;

    let first = fixture
        .state
        .timeline
        .chronological(&reader, 3, None)
        .await
        .unwrap();

    // Block `friend` between pages: the cursor is timestamp-based, so the
    // second page must still surface every remaining `other` post.
    fixture.state.users.block(&reader, "friend").await.unwrap();

    let mut remaining: HashSet<String> = expected_other.into_iter().collect();
    for view in &first.posts {
        remaining.remove(&view.post.id);
    }

    let mut cursor = first.cursor;
    loop {
        let page = fixture
            .state
            .timeline
            .chronological(&reader, 3, cursor.as_deref())
            .await
            .unwrap();
        if page.posts.is_empty() {
            break;
        }
        for view in &page.posts {
            assert_eq!(view.post.author_id, other, "blocked author leaked through");
            remaining.remove(&view.post.id);
        }
        cursor = page.cursor;
    }

    assert!(
        remaining.is_empty(),
        "cursor paging skipped posts: {:?}",
        remaining
    );
}

#[tokio::test]
async fn test_explore_backfills_when_followed_runs_dry() {
    let fixture = fixture();

    let reader = signup(&fixture, "reader").await;
    let stranger = signup(&fixture, "stranger").await;
    let q1 = post(&fixture, &stranger, "novel content").await;
    drain_queue(&fixture).await;

    let candidates = serde_json::json!([
        {"post_id": q1, "author_id": stranger, "score": 1.0, "created_at_ms": 0},
    ]);
    fixture
        .kv
        .set("explore:ranked", &candidates.to_string())
        .await
        .unwrap();

    let page = fixture.state.timeline.home(&reader, 6, None).await.unwrap();
    assert_eq!(page.posts.len(), 1);
    assert_eq!(page.posts[0].post.id, q1);
    assert!(!page.has_more);
}
