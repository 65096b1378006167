//! Post endpoints

use crate::middleware::{AuthUser, MaybeAuthUser};
use crate::services::posts::CreatePostInput;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use error_types::{ApiResponse, AppError};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CreatePostPayload {
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub reply_to_id: Option<String>,
    pub quote_of_id: Option<String>,
}

/// POST /api/posts — create a post, reply, or quote.
pub async fn create_post(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<CreatePostPayload>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let view = state
        .posts
        .create_post(
            &user.user_id,
            CreatePostInput {
                content: payload.content,
                media_urls: payload.media_urls,
                reply_to_id: payload.reply_to_id,
                quote_of_id: payload.quote_of_id,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(view)))
}

/// GET /api/posts/{id}
pub async fn get_post(
    state: web::Data<AppState>,
    path: web::Path<String>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    let view = state
        .posts
        .get_post(&path.into_inner(), viewer.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(view)))
}

/// GET /api/posts/{id}/thread — ancestors plus direct replies.
pub async fn thread(
    state: web::Data<AppState>,
    path: web::Path<String>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    let thread = state
        .posts
        .thread(&path.into_inner(), viewer.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "ancestors": thread.ancestors,
        "post": thread.post,
        "replies": thread.replies,
    }))))
}

/// DELETE /api/posts/{id} — owner-only soft delete.
pub async fn delete_post(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    state
        .posts
        .delete_post(&user.user_id, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"deleted": true}))))
}

/// POST /api/posts/{id}/like
pub async fn like(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let like_count = state.posts.like(&user.user_id, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"like_count": like_count}))))
}

/// DELETE /api/posts/{id}/like
pub async fn unlike(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let like_count = state
        .posts
        .unlike(&user.user_id, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"like_count": like_count}))))
}

/// POST /api/posts/{id}/repost
pub async fn repost(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let view = state.posts.repost(&user.user_id, &path.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(view)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/posts")
            .route("", web::post().to(create_post))
            .route("/{id}", web::get().to(get_post))
            .route("/{id}", web::delete().to(delete_post))
            .route("/{id}/thread", web::get().to(thread))
            .route("/{id}/like", web::post().to(like))
            .route("/{id}/like", web::delete().to(unlike))
            .route("/{id}/repost", web::post().to(repost)),
    );
}
