//! Shared application state

use crate::auth::AuthService;
use crate::config::Config;
use crate::coordinators::Coordinators;
use crate::objects::ObjectStore;
use crate::services::{
    MediaService, NotificationService, PostService, RankingService, SearchIndex, TimelineService,
    UserService,
};
use crate::websocket::ConnectionManager;
use durable_queue::DurableQueue;
use kv_store::KvStore;
use snowflake_id::SnowflakeGenerator;
use std::sync::Arc;

/// Everything the handlers need, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub kv: Arc<dyn KvStore>,
    pub queue: Arc<dyn DurableQueue>,
    pub coordinators: Arc<Coordinators>,
    pub connections: ConnectionManager,
    pub ids: Arc<SnowflakeGenerator>,
    pub auth: AuthService,
    pub users: UserService,
    pub posts: PostService,
    pub timeline: TimelineService,
    pub search: SearchIndex,
    pub ranking: RankingService,
    pub notifications: NotificationService,
    pub media: MediaService,
}

impl AppState {
    pub fn new(
        config: Config,
        kv: Arc<dyn KvStore>,
        queue: Arc<dyn DurableQueue>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let ids = Arc::new(
            SnowflakeGenerator::new(config.limits.snowflake_worker_id)
                .expect("snowflake worker id out of range"),
        );
        let coordinators = Coordinators::new(Arc::clone(&kv));
        let connections = ConnectionManager::new();
        let search = SearchIndex::new(Arc::clone(&kv));
        let ranking = RankingService::new(Arc::clone(&kv));
        let notifications =
            NotificationService::new(Arc::clone(&kv), connections.clone(), Arc::clone(&ids));

        let auth = AuthService::new(
            Arc::clone(&kv),
            Arc::clone(&coordinators),
            search.clone(),
            Arc::clone(&ids),
            config.auth.clone(),
        );
        let users = UserService::new(
            Arc::clone(&kv),
            Arc::clone(&coordinators),
            search.clone(),
            notifications.clone(),
        );
        let posts = PostService::new(
            Arc::clone(&kv),
            Arc::clone(&coordinators),
            Arc::clone(&queue),
            search.clone(),
            notifications.clone(),
            Arc::clone(&ids),
            config.limits.max_post_length,
        );
        let timeline = TimelineService::new(
            Arc::clone(&kv),
            Arc::clone(&coordinators),
            ranking.clone(),
        );
        let media = MediaService::new(objects, Arc::clone(&ids));

        Self {
            config,
            kv,
            queue,
            coordinators,
            connections,
            ids,
            auth,
            users,
            posts,
            timeline,
            search,
            ranking,
            notifications,
            media,
        }
    }
}
