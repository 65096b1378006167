//! Timeline endpoints

use super::PageQuery;
use crate::middleware::AuthUser;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use error_types::{ApiResponse, AppError};

/// GET /api/feed/home — hybrid followed + explore timeline.
pub async fn home(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = state.config.page_limit(query.limit);
    let page = state
        .timeline
        .home(&user.user_id, limit, query.cursor.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(page)))
}

/// GET /api/feed/chronological — followed feed only.
pub async fn chronological(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = state.config.page_limit(query.limit);
    let page = state
        .timeline
        .chronological(&user.user_id, limit, query.cursor.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(page)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/feed")
            .route("/home", web::get().to(home))
            .route("/chronological", web::get().to(chronological)),
    );
}
