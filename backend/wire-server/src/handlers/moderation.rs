//! Moderation endpoints (admin-only)

use crate::middleware::{require_admin, AuthUser};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use error_types::{ApiResponse, AppError};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ReasonPayload {
    pub reason: String,
}

/// POST /api/moderation/users/{handle}/ban
pub async fn ban_user(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
    payload: web::Json<ReasonPayload>,
) -> Result<HttpResponse, AppError> {
    require_admin(&state, &user).await?;
    state.users.ban(&path.into_inner(), &payload.reason).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"banned": true}))))
}

/// POST /api/moderation/users/{handle}/unban
pub async fn unban_user(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    require_admin(&state, &user).await?;
    state.users.unban(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"banned": false}))))
}

/// POST /api/moderation/posts/{id}/takedown
pub async fn takedown_post(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
    payload: web::Json<ReasonPayload>,
) -> Result<HttpResponse, AppError> {
    require_admin(&state, &user).await?;
    state
        .posts
        .takedown(&user.user_id, &path.into_inner(), &payload.reason)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"taken_down": true}))))
}

/// POST /api/moderation/posts/{id}/untakedown
pub async fn untakedown_post(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    require_admin(&state, &user).await?;
    state.posts.untakedown(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"taken_down": false}))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/moderation")
            .route("/users/{handle}/ban", web::post().to(ban_user))
            .route("/users/{handle}/unban", web::post().to(unban_user))
            .route("/posts/{id}/takedown", web::post().to(takedown_post))
            .route("/posts/{id}/untakedown", web::post().to(untakedown_post)),
    );
}
