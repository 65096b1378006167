pub mod auth;
pub mod feed;
pub mod media;
pub mod moderation;
pub mod notifications;
pub mod posts;
pub mod search;
pub mod users;
pub mod ws;

use actix_web::web;
use serde::Deserialize;

/// Shared pagination query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

/// Register the full API surface.
pub fn configure(cfg: &mut web::ServiceConfig) {
    auth::register_routes(cfg);
    users::register_routes(cfg);
    posts::register_routes(cfg);
    feed::register_routes(cfg);
    notifications::register_routes(cfg);
    search::register_routes(cfg);
    media::register_routes(cfg);
    moderation::register_routes(cfg);
    ws::register_routes(cfg);
}
