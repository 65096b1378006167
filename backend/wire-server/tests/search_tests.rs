//! Search index scenarios: AND semantics across terms, index cleanup on
//! delete, and people search over handle/name prefixes.

use durable_queue::{BackoffPolicy, MemoryQueue};
use kv_store::{KvStore, MemoryKv};
use std::sync::Arc;
use wire_server::config::test_config;
use wire_server::objects::MemoryObjectStore;
use wire_server::services::posts::CreatePostInput;
use wire_server::state::AppState;

struct Fixture {
    kv: Arc<MemoryKv>,
    state: AppState,
}

fn fixture() -> Fixture {
    let kv = Arc::new(MemoryKv::new());
    let state = AppState::new(
        test_config(),
        kv.clone(),
        Arc::new(MemoryQueue::new(BackoffPolicy::default())),
        Arc::new(MemoryObjectStore::new()),
    );
    Fixture { kv, state }
}

async fn signup(fixture: &Fixture, handle: &str, display_name: &str) -> String {
    fixture
        .state
        .auth
        .signup(
            wire_server::auth::SignupRequest {
                handle: handle.to_string(),
                email: format!("{}@example.com", handle),
                password: "Password1".to_string(),
                display_name: Some(display_name.to_string()),
            },
            &format!("ip-{}", handle),
        )
        .await
        .unwrap()
        .user
        .id
}

async fn post(fixture: &Fixture, author: &str, content: &str) -> String {
    fixture
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
        .unwrap()
        .post
        .id
}

#[tokio::test]
async fn test_post_search_requires_all_terms() {
    let fixture = fixture();
    let author = signup(&fixture, "author", "Author").await;

    let p1 = post(&fixture, &author, "hello world programming").await;
    let _p2 = post(&fixture, &author, "hello typescript").await;
    let _p3 = post(&fixture, &author, "rust world").await;

    let hits = fixture
        .state
        .search
        .search_post_ids("hello world")
        .await
        .unwrap();
    assert_eq!(hits, vec![p1]);
}

#[tokio::test]
async fn test_deleted_post_leaves_no_index_keys() {
    let fixture = fixture();
    let author = signup(&fixture, "author", "Author").await;
    let post_id = post(&fixture, &author, "uniquely searchable phrase").await;

    assert_eq!(
        fixture
            .state
            .search
            .search_post_ids("uniquely searchable")
            .await
            .unwrap(),
        vec![post_id.clone()]
    );

    fixture
        .state
        .posts
        .delete_post(&author, &post_id)
        .await
        .unwrap();

    assert!(fixture
        .state
        .search
        .search_post_ids("uniquely searchable")
        .await
        .unwrap()
        .is_empty());

    // The invariant is stronger than an empty result: no word or reverse
    // keys survive.
    let word_keys = fixture.kv.list_prefix("word:", 1000).await.unwrap();
    assert!(
        word_keys.iter().all(|(k, _)| !k.ends_with(&post_id)),
        "stale word keys remain: {:?}",
        word_keys
    );
    assert!(fixture
        .kv
        .get(&format!("idx:{}", post_id))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_hashtag_and_mention_tokens_are_searchable() {
    let fixture = fixture();
    let author = signup(&fixture, "author", "Author").await;
    let tagged = post(&fixture, &author, "shipping today #rustlang with @author").await;

    assert_eq!(
        fixture.state.search.search_post_ids("#rustlang").await.unwrap(),
        vec![tagged.clone()]
    );
    assert_eq!(
        fixture.state.search.search_post_ids("@author").await.unwrap(),
        vec![tagged]
    );
}

#[tokio::test]
async fn test_people_search_unions_handle_and_display_name() {
    let fixture = fixture();
    let alice = signup(&fixture, "alice", "Wonder Woman").await;
    let alina = signup(&fixture, "alina", "Builder").await;
    let _bob = signup(&fixture, "bob", "Bob").await;

    let by_handle = fixture.state.search.search_user_ids("ali").await.unwrap();
    assert_eq!(by_handle.len(), 2);
    assert!(by_handle.contains(&alice));
    assert!(by_handle.contains(&alina));

    let by_name = fixture.state.search.search_user_ids("wonder").await.unwrap();
    assert_eq!(by_name, vec![alice]);

    assert!(fixture
        .state
        .search
        .search_user_ids("zz")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_display_name_rename_moves_search_prefixes() {
    let fixture = fixture();
    let alice = signup(&fixture, "alice", "Wonder").await;

    fixture
        .state
        .users
        .update_profile(
            &alice,
            wire_server::coordinators::ProfileUpdate {
                display_name: Some("Builder".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(fixture
        .state
        .search
        .search_user_ids("wonder")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        fixture.state.search.search_user_ids("builder").await.unwrap(),
        vec![alice.clone()]
    );
    // The handle prefix is untouched by renames.
    assert_eq!(
        fixture.state.search.search_user_ids("alice").await.unwrap(),
        vec![alice]
    );
}
