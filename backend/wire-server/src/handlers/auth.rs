//! Authentication endpoints

use crate::auth::{LoginRequest, SignupRequest};
use crate::middleware::AuthUser;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use error_types::{ApiResponse, AppError};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ResetRequestPayload {
    pub handle: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirmPayload {
    pub handle: String,
    pub token: String,
    pub new_password: String,
}

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

/// POST /api/auth/signup
pub async fn signup(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, AppError> {
    let response = state
        .auth
        .signup(payload.into_inner(), &client_ip(&req))
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(response)))
}

/// POST /api/auth/login
pub async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let response = state
        .auth
        .login(payload.into_inner(), &client_ip(&req))
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(response)))
}

/// POST /api/auth/refresh
pub async fn refresh(
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let response = state.auth.refresh(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(response)))
}

/// POST /api/auth/logout — tokens are client-local; nothing to revoke.
pub async fn logout(_user: AuthUser) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"logged_out": true}))))
}

/// GET /api/auth/me
pub async fn me(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse, AppError> {
    let record = state.users.me(&user.user_id).await?;
    let body = json!({
        "user": record.public_profile(),
        "email": record.email,
        "settings": record.settings,
        "is_admin": record.profile.is_admin,
        "last_login": record.last_login,
    });
    Ok(HttpResponse::Ok().json(ApiResponse::ok(body)))
}

/// POST /api/auth/reset/request — uniform response either way.
pub async fn reset_request(
    state: web::Data<AppState>,
    payload: web::Json<ResetRequestPayload>,
) -> Result<HttpResponse, AppError> {
    state
        .auth
        .request_password_reset(&payload.handle, &payload.email)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "message": "If the account exists, a reset token has been issued"
    }))))
}

/// POST /api/auth/reset/confirm
pub async fn reset_confirm(
    state: web::Data<AppState>,
    payload: web::Json<ResetConfirmPayload>,
) -> Result<HttpResponse, AppError> {
    state
        .auth
        .confirm_password_reset(&payload.handle, &payload.token, &payload.new_password)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({"reset": true}))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/signup", web::post().to(signup))
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh))
            .route("/logout", web::post().to(logout))
            .route("/me", web::get().to(me))
            .route("/reset/request", web::post().to(reset_request))
            .route("/reset/confirm", web::post().to(reset_confirm)),
    );
}
