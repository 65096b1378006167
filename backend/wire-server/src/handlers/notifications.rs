//! Notification endpoints

use super::PageQuery;
use crate::middleware::AuthUser;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use error_types::{ApiResponse, AppError};
use serde_json::json;

/// GET /api/notifications
pub async fn list(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = state.config.page_limit(query.limit);
    let notifications = state.notifications.list(&user.user_id, limit).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "notifications": notifications
    }))))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let count = state.notifications.unread_count(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"unread_count": count}))))
}

/// PUT /api/notifications/{id}/read
pub async fn mark_read(
    state: web::Data<AppState>,
    path: web::Path<String>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    state
        .notifications
        .mark_read(&user.user_id, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"read": true}))))
}

/// PUT /api/notifications/read-all
pub async fn mark_all_read(
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let updated = state.notifications.mark_all_read(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"marked_read": updated}))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/notifications")
            .route("", web::get().to(list))
            .route("/unread-count", web::get().to(unread_count))
            .route("/read-all", web::put().to(mark_all_read))
            .route("/{id}/read", web::put().to(mark_read)),
    );
}
