//! Media endpoints
//!
//! Multipart uploads are validated (MIME whitelist, magic bytes, size
//! caps) before they reach the object store. Blobs are immutable and
//! served straight back with long-lived caching headers.

use crate::coordinators::ProfileUpdate;
use crate::middleware::AuthUser;
use crate::services::media::MAX_VIDEO_BYTES;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use error_types::{ApiResponse, AppError};
use futures::TryStreamExt;
use serde_json::json;

/// Pull the first file field out of a multipart body, bounded.
async fn read_upload(mut payload: Multipart) -> Result<(String, Vec<u8>), AppError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::validation(format!("Malformed multipart body: {}", e)))?
    {
        let Some(content_type) = field.content_type().map(|mime| mime.to_string()) else {
            continue;
        };

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::validation(format!("Upload stream error: {}", e)))?
        {
            if bytes.len() + chunk.len() > MAX_VIDEO_BYTES {
                return Err(AppError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok((content_type, bytes));
    }
    Err(AppError::validation("No file field in upload"))
}

/// POST /api/media/upload
pub async fn upload(
    state: web::Data<AppState>,
    _user: AuthUser,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let (content_type, bytes) = read_upload(payload).await?;
    let stored = state.media.store_upload(&content_type, bytes).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(json!({
        "key": stored.key,
        "url": stored.url,
        "content_type": stored.content_type,
    }))))
}

/// PUT /api/media/users/me/avatar
pub async fn set_avatar(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let (content_type, bytes) = read_upload(payload).await?;
    let stored = state.media.store_upload(&content_type, bytes).await?;
    let profile = state
        .users
        .update_profile(
            &user.user_id,
            ProfileUpdate {
                avatar_url: Some(stored.url.clone()),
                ..ProfileUpdate::default()
            },
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "url": stored.url,
        "user": profile,
    }))))
}

/// PUT /api/media/users/me/banner
pub async fn set_banner(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let (content_type, bytes) = read_upload(payload).await?;
    let stored = state.media.store_upload(&content_type, bytes).await?;
    let profile = state
        .users
        .update_profile(
            &user.user_id,
            ProfileUpdate {
                banner_url: Some(stored.url.clone()),
                ..ProfileUpdate::default()
            },
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "url": stored.url,
        "user": profile,
    }))))
}

/// GET /media/{filename} — serve a stored blob.
pub async fn serve(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let key = format!("media/{}", path.into_inner());
    let object = state.media.serve(&key).await?;
    Ok(HttpResponse::Ok()
        .content_type(object.content_type)
        .insert_header(("Cache-Control", "public, max-age=31536000, immutable"))
        .body(object.bytes))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/media")
            .route("/upload", web::post().to(upload))
            .route("/users/me/avatar", web::put().to(set_avatar))
            .route("/users/me/banner", web::put().to(set_banner)),
    );
    cfg.route("/media/{filename}", web::get().to(serve));
}
