//! Search endpoints

use crate::middleware::MaybeAuthUser;
use crate::models::PostView;
use crate::services::ranking::RankingService;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use error_types::{ApiResponse, AppError};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub limit: Option<usize>,
}

fn default_kind() -> String {
    "top".to_string()
}

/// GET /api/search?q=&type={top|people}
pub async fn search(
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    let limit = state.config.page_limit(query.limit);

    match query.kind.as_str() {
        "people" => {
            let user_ids = state.search.search_user_ids(&query.q).await?;
            let mut profiles = state.users.profiles_for_ids(&user_ids).await?;
            profiles.truncate(limit);
            Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"users": profiles}))))
        }
        "top" => {
            let post_ids = state.search.search_post_ids(&query.q).await?;

            // Rank by time-decayed engagement with a term-frequency boost.
            let mut scored: Vec<(f64, PostView)> = Vec::with_capacity(post_ids.len());
            for post_id in &post_ids {
                let Ok(view) = state.posts.get_post(post_id, None).await else {
                    continue;
                };
                let hn = RankingService::score_snapshot(&view.post);
                let tf = RankingService::term_frequency(&view.post.content, &query.q);
                scored.push((RankingService::search_rank(hn, tf), view));
            }
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut posts: Vec<PostView> =
                scored.into_iter().take(limit).map(|(_, view)| view).collect();
            state
                .posts
                .attach_viewer_edges(viewer.user_id(), &mut posts)
                .await?;
            Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"posts": posts}))))
        }
        other => Err(AppError::validation(format!(
            "Unknown search type: {}",
            other
        ))),
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api/search").route("", web::get().to(search)));
}
