//! User and relationship endpoints

use super::PageQuery;
use crate::coordinators::{ProfileUpdate, SettingsUpdate};
use crate::middleware::{AuthUser, MaybeAuthUser};
use crate::services::posts::AuthorListing;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use error_types::{ApiResponse, AppError};
use serde_json::json;

/// GET /api/users/{handle}
pub async fn get_profile(
    state: web::Data<AppState>,
    path: web::Path<String>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    let profile = state
        .users
        .public_profile(&path.into_inner(), viewer.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(profile)))
}

/// PUT /api/users/me
pub async fn update_me(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<ProfileUpdate>,
) -> Result<HttpResponse, AppError> {
    let profile = state
        .users
        .update_profile(&user.user_id, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(profile)))
}

/// GET /api/users/me/settings
pub async fn get_settings(
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let settings = state.users.settings(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(settings)))
}

/// PUT /api/users/me/settings
pub async fn update_settings(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<SettingsUpdate>,
) -> Result<HttpResponse, AppError> {
    let settings = state
        .users
        .update_settings(&user.user_id, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(settings)))
}

/// GET /api/users/me/blocked
pub async fn blocked_list(
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let blocked = state.users.blocked_profiles(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(blocked)))
}

/// POST /api/users/{handle}/follow
pub async fn follow(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    state.users.follow(&user.user_id, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"following": true}))))
}

/// DELETE /api/users/{handle}/follow
pub async fn unfollow(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    state
        .users
        .unfollow(&user.user_id, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"following": false}))))
}

/// POST /api/users/{handle}/block
pub async fn block(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    state.users.block(&user.user_id, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"blocked": true}))))
}

/// DELETE /api/users/{handle}/block
pub async fn unblock(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    state
        .users
        .unblock(&user.user_id, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"blocked": false}))))
}

/// GET /api/users/{handle}/followers
pub async fn followers(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = state.config.page_limit(query.limit);
    let page = state
        .users
        .followers(&path.into_inner(), limit, query.cursor.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "users": page.users,
        "cursor": page.cursor,
        "has_more": page.has_more,
    }))))
}

/// GET /api/users/{handle}/following
pub async fn following(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = state.config.page_limit(query.limit);
    let page = state
        .users
        .following(&path.into_inner(), limit, query.cursor.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "users": page.users,
        "cursor": page.cursor,
        "has_more": page.has_more,
    }))))
}

async fn author_listing(
    state: &AppState,
    handle: &str,
    listing: AuthorListing,
    query: &PageQuery,
    viewer: Option<&str>,
) -> Result<HttpResponse, AppError> {
    let author_id = state.users.resolve_handle(handle).await?;
    let limit = state.config.page_limit(query.limit);
    let mut page = state
        .posts
        .author_posts(&author_id, listing, limit, query.cursor.as_deref())
        .await?;
    state.posts.attach_viewer_edges(viewer, &mut page.posts).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "posts": page.posts,
        "cursor": page.cursor,
        "has_more": page.has_more,
    }))))
}

/// GET /api/users/{handle}/posts
pub async fn user_posts(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    author_listing(
        &state,
        &path.into_inner(),
        AuthorListing::Posts,
        &query,
        viewer.user_id(),
    )
    .await
}

/// GET /api/users/{handle}/replies
pub async fn user_replies(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    author_listing(
        &state,
        &path.into_inner(),
        AuthorListing::Replies,
        &query,
        viewer.user_id(),
    )
    .await
}

/// GET /api/users/{handle}/media
pub async fn user_media(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    author_listing(
        &state,
        &path.into_inner(),
        AuthorListing::Media,
        &query,
        viewer.user_id(),
    )
    .await
}

/// GET /api/users/{handle}/likes
pub async fn user_likes(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
    viewer: MaybeAuthUser,
) -> Result<HttpResponse, AppError> {
    let user_id = state.users.resolve_handle(&path.into_inner()).await?;
    let limit = state.config.page_limit(query.limit);
    let mut posts = state.posts.liked_posts(&user_id, limit).await?;
    state
        .posts
        .attach_viewer_edges(viewer.user_id(), &mut posts)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"posts": posts}))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/users")
            .route("/me", web::put().to(update_me))
            .route("/me/settings", web::get().to(get_settings))
            .route("/me/settings", web::put().to(update_settings))
            .route("/me/blocked", web::get().to(blocked_list))
            .route("/{handle}", web::get().to(get_profile))
            .route("/{handle}/follow", web::post().to(follow))
            .route("/{handle}/follow", web::delete().to(unfollow))
            .route("/{handle}/block", web::post().to(block))
            .route("/{handle}/block", web::delete().to(unblock))
            .route("/{handle}/followers", web::get().to(followers))
            .route("/{handle}/following", web::get().to(following))
            .route("/{handle}/posts", web::get().to(user_posts))
            .route("/{handle}/replies", web::get().to(user_replies))
            .route("/{handle}/media", web::get().to(user_media))
            .route("/{handle}/likes", web::get().to(user_likes)),
    );
}
