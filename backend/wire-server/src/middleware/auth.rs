//! Bearer authentication extractors
//!
//! `AuthUser` guards protected routes: token verification plus the cached
//! ban check on every request. `MaybeAuthUser` serves optional-auth
//! routes — absent credentials yield `None`, presented-but-invalid
//! credentials are still rejected.

use crate::state::AppState;
use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use error_types::AppError;
use futures::future::LocalBoxFuture;

/// Authenticated caller, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub handle: String,
    pub email: String,
}

/// Optional authentication for public endpoints.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn user_id(&self) -> Option<&str> {
        self.0.as_ref().map(|user| user.user_id.as_str())
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

async fn authenticate(req: HttpRequest) -> Result<AuthUser, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::internal("application state not configured"))?;

    let token =
        bearer_token(&req).ok_or_else(|| AppError::unauthorized("Missing authentication token"))?;
    let claims = state.auth.verify_token(&token)?;
    state.auth.check_ban(&claims.sub).await?;

    Ok(AuthUser {
        user_id: claims.sub,
        handle: claims.handle,
        email: claims.email,
    })
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move { authenticate(req).await.map_err(Into::into) })
    }
}

impl FromRequest for MaybeAuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            if bearer_token(&req).is_none() {
                return Ok(MaybeAuthUser(None));
            }
            authenticate(req)
                .await
                .map(|user| MaybeAuthUser(Some(user)))
                .map_err(Into::into)
        })
    }
}

/// Admin gate layered on top of `AuthUser` at the handler level.
pub async fn require_admin(state: &AppState, user: &AuthUser) -> Result<(), AppError> {
    if !state.coordinators.user(&user.user_id).is_admin().await? {
        return Err(AppError::forbidden("Admin privileges required"));
    }
    Ok(())
}
