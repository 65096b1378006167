//! End-to-end pipeline scenarios over the in-memory store and queue:
//! post creation → durable queue → fan-out → feeds and live connections.

use durable_queue::{BackoffPolicy, DurableQueue, MemoryQueue};
use kv_store::MemoryKv;
use std::sync::Arc;
use wire_server::config::test_config;
use wire_server::models::FeedSource;
use wire_server::objects::MemoryObjectStore;
use wire_server::services::posts::CreatePostInput;
use wire_server::services::FanoutWorker;
use wire_server::state::AppState;

fn state() -> AppState {
    AppState::new(
        test_config(),
        Arc::new(MemoryKv::new()),
        Arc::new(MemoryQueue::new(BackoffPolicy {
            base_secs: 0,
            ceiling_secs: 0,
        })),
        Arc::new(MemoryObjectStore::new()),
    )
}

fn worker_for(state: &AppState) -> FanoutWorker {
    FanoutWorker::new(
        Arc::clone(&state.kv),
        Arc::clone(&state.coordinators),
        state.connections.clone(),
    )
}

/// Deliver every queued message once; idempotence tests call it twice.
async fn drain_queue(state: &AppState, worker: &FanoutWorker) {
    while let Some(envelope) = state.queue.consume().await.unwrap() {
        worker.handle(envelope.payload.clone()).await.unwrap();
        state.queue.ack(&envelope).await.unwrap();
    }
}

async fn signup(state: &AppState, handle: &str) -> String {
    let response = state
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
        .unwrap();
    response.user.id
}

#[tokio::test]
async fn test_fanout_reaches_all_followers() {
    let state = state();
    let worker = worker_for(&state);

    let a = signup(&state, "author").await;
    let b = signup(&state, "bee").await;
    let c = signup(&state, "cee").await;
    state.users.follow(&b, "author").await.unwrap();
    state.users.follow(&c, "author").await.unwrap();

    let post = state
        .posts
        .create_post(
            &a,
            CreatePostInput {
                content: "hello followers".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    drain_queue(&state, &worker).await;

    // Author's own feed carries source=own.
    let own = state.coordinators.feed(&a).entries().await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].post_id, post.post.id);
    assert_eq!(own[0].source, FeedSource::Own);

    // Each follower got exactly one source=follow entry.
    for follower in [&b, &c] {
        let entries = state.coordinators.feed(follower).entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].post_id, post.post.id);
        assert_eq!(entries[0].source, FeedSource::Follow);
    }
}

#[tokio::test]
async fn test_fanout_replay_is_idempotent() {
    let state = state();
    let worker = worker_for(&state);

    let a = signup(&state, "author").await;
    let b = signup(&state, "bee").await;
    state.users.follow(&b, "author").await.unwrap();

    state
        .posts
        .create_post(
            &a,
            CreatePostInput {
                content: "delivered at least once".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Replay the same message three times.
    let envelope = state.queue.consume().await.unwrap().unwrap();
    for _ in 0..3 {
        worker.handle(envelope.payload.clone()).await.unwrap();
    }
    state.queue.ack(&envelope).await.unwrap();

    assert_eq!(state.coordinators.feed(&b).entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_soft_delete_clears_follower_feeds() {
    let state = state();
    let worker = worker_for(&state);

    let a = signup(&state, "author").await;
    let b = signup(&state, "bee").await;
    state.users.follow(&b, "author").await.unwrap();

    let post = state
        .posts
        .create_post(
            &a,
            CreatePostInput {
                content: "soon gone".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    drain_queue(&state, &worker).await;
    assert_eq!(state.coordinators.feed(&b).entries().await.unwrap().len(), 1);

    state.posts.delete_post(&a, &post.post.id).await.unwrap();
    drain_queue(&state, &worker).await;

    assert!(state.coordinators.feed(&a).entries().await.unwrap().is_empty());
    assert!(state.coordinators.feed(&b).entries().await.unwrap().is_empty());

    // The tombstone keeps the id but the read path reports missing.
    let err = state.posts.get_post(&post.post.id, None).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_block_cuts_feed_and_followers() {
    let state = state();
    let worker = worker_for(&state);

    let u1 = signup(&state, "blocker").await;
    let u2 = signup(&state, "blocked").await;
    state.users.follow(&u1, "blocked").await.unwrap();

    state
        .posts
        .create_post(
            &u2,
            CreatePostInput {
                content: "you will not see this for long".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    drain_queue(&state, &worker).await;

    let before = state.timeline.home(&u1, 20, None).await.unwrap();
    assert_eq!(before.posts.len(), 1);

    state.users.block(&u1, "blocked").await.unwrap();

    // Feed reads filter the blocked author even though the entry is still
    // materialized.
    let after = state.timeline.home(&u1, 20, None).await.unwrap();
    assert!(after.posts.iter().all(|p| p.post.author_id != u2));

    // And the blocker no longer appears in the target's followers.
    let blocked_record = state.coordinators.user(&u2).get().await.unwrap();
    assert!(!blocked_record.followers.contains(&u1));
    let blocker_record = state.coordinators.user(&u1).get().await.unwrap();
    assert!(!blocker_record.following.contains(&u2));
}

#[tokio::test]
async fn test_like_idempotence_end_to_end() {
    let state = state();

    let a = signup(&state, "author").await;
    let b = signup(&state, "liker").await;
    let post = state
        .posts
        .create_post(
            &a,
            CreatePostInput {
                content: "likable".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(state.posts.like(&b, &post.post.id).await.unwrap(), 1);
    assert_eq!(state.posts.like(&b, &post.post.id).await.unwrap(), 1);

    let record = state.coordinators.post(&post.post.id).get().await.unwrap();
    assert_eq!(record.likes.len(), 1);
    assert!(record.likes.contains(&b));

    assert_eq!(state.posts.unlike(&b, &post.post.id).await.unwrap(), 0);

    // Author was notified exactly once.
    let inbox = state.notifications.list(&a, 10).await.unwrap();
    assert_eq!(inbox.len(), 1);
}

#[tokio::test]
async fn test_live_push_on_fanout() {
    let state = state();
    let worker = worker_for(&state);

    let a = signup(&state, "author").await;
    let b = signup(&state, "watcher").await;
    state.users.follow(&b, "author").await.unwrap();

    let (_, mut rx) = state.connections.register(&b);
    // Drain the connected frame.
    let first = rx.try_recv().unwrap();
    match first {
        wire_server::websocket::manager::Outbound::Frame(frame) => {
            assert!(frame.contains("connected"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let post = state
        .posts
        .create_post(
            &a,
            CreatePostInput {
                content: "pushed live".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    drain_queue(&state, &worker).await;

    let frame = loop {
        match rx.try_recv().unwrap() {
            wire_server::websocket::manager::Outbound::Frame(frame) => break frame,
            wire_server::websocket::manager::Outbound::Close => panic!("unexpected close"),
        }
    };
    let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(json["type"], "new_post");
    assert_eq!(json["post"]["id"], post.post.id.as_str());
}

#[tokio::test]
async fn test_counters_stay_consistent_with_sets() {
    let state = state();

    let a = signup(&state, "author").await;
    let likers: Vec<String> = {
        let mut ids = Vec::new();
        for handle in ["uno", "dos", "tres"] {
            ids.push(signup(&state, handle).await);
        }
        ids
    };

    let post = state
        .posts
        .create_post(
            &a,
            CreatePostInput {
                content: "count me".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for liker in &likers {
        state.posts.like(liker, &post.post.id).await.unwrap();
    }
    state.posts.unlike(&likers[0], &post.post.id).await.unwrap();

    let record = state.coordinators.post(&post.post.id).get().await.unwrap();
    assert_eq!(record.counters.like_count as usize, record.likes.len());
    assert_eq!(record.counters.like_count, 2);

    for user_id in likers.iter().chain(std::iter::once(&a)) {
        let user = state.coordinators.user(user_id).get().await.unwrap();
        assert_eq!(user.counters.following_count as usize, user.following.len());
        assert_eq!(user.counters.follower_count as usize, user.followers.len());
        assert!(user.following.contains(user_id));
        assert!(user.followers.contains(user_id));
    }
}
