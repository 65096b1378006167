//! Authentication and trust workflows
//!
//! Signup reserves handle and email atomically via set-if-absent keys and
//! rolls back on partial failure, so no orphaned records survive a lost
//! race. Login is rate-limited per IP and per account; the ban verdict is
//! cached for 60 seconds and fails closed when the store is unreachable.

use crate::auth::password::{constant_time_eq, hash_password, verify_password};
use crate::auth::tokens::{self, Claims};
use crate::auth::validators;
use crate::config::AuthConfig;
use crate::coordinators::{kv_err, Coordinators};
use crate::keys;
use crate::models::{PublicProfile, UserRecord};
use crate::services::search::SearchIndex;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use snowflake_id::SnowflakeGenerator;
use std::sync::Arc;
use tracing::{info, warn};

const SIGNUPS_PER_IP_PER_HOUR: u64 = 10;
const LOGINS_PER_IP_PER_MINUTE: u64 = 5;
const LOCKOUT_THRESHOLD: u64 = 5;
const LOCKOUT_WINDOW_SECS: u64 = 15 * 60;
const BAN_CACHE_TTL_SECS: u64 = 60;
const RESET_TOKEN_TTL_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub handle: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub handle: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicProfile,
}

#[derive(Clone)]
pub struct AuthService {
    kv: Arc<dyn KvStore>,
    coordinators: Arc<Coordinators>,
    search: SearchIndex,
    ids: Arc<SnowflakeGenerator>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        coordinators: Arc<Coordinators>,
        search: SearchIndex,
        ids: Arc<SnowflakeGenerator>,
        config: AuthConfig,
    ) -> Self {
        Self {
            kv,
            coordinators,
            search,
            ids,
            config,
        }
    }

    pub async fn signup(&self, request: SignupRequest, ip: &str) -> AppResult<AuthResponse> {
        self.rate_limit("signup", ip, SIGNUPS_PER_IP_PER_HOUR, 3_600)
            .await?;

        let handle = request.handle.trim().to_lowercase();
        let email = request.email.trim().to_lowercase();
        if !validators::validate_handle(&handle) {
            return Err(AppError::validation(
                "Handle must be 3-15 lowercase letters, digits, or underscores",
            ));
        }
        if !validators::validate_email(&email) {
            return Err(AppError::validation("Invalid email address"));
        }
        if !validators::validate_password(&request.password) {
            return Err(AppError::validation(
                "Password must be 8-128 characters with upper, lower, and digit",
            ));
        }

        let user_id = self.mint_id()?;

        // Check-and-set through the reservation keys; the loser of a race
        // sees the conflict here, never a duplicate record.
        let handle_reserved = self
            .kv
            .set_nx(&keys::handle(&handle), &user_id, None)
            .await
            .map_err(kv_err)?;
        if !handle_reserved {
            return Err(AppError::conflict("Handle already taken"));
        }

        let email_reserved = match self.kv.set_nx(&keys::email(&email), &user_id, None).await {
            Ok(reserved) => reserved,
            Err(e) => {
                self.rollback_reservations(&handle, None).await;
                return Err(kv_err(e));
            }
        };
        if !email_reserved {
            self.rollback_reservations(&handle, None).await;
            return Err(AppError::conflict("Email already registered"));
        }

        let display_name = request
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| handle.clone());
        let record = UserRecord::new(
            user_id.clone(),
            handle.clone(),
            email.clone(),
            hash_password(&request.password),
            display_name,
        );

        if let Err(e) = self.coordinators.user(&user_id).initialize(&record).await {
            self.rollback_reservations(&handle, Some(&email)).await;
            return Err(e);
        }

        self.search
            .index_user(&user_id, &handle, &record.profile.display_name)
            .await?;

        let token = self.mint_token(&record)?;
        info!(user_id = %user_id, handle = %handle, "user signed up");
        Ok(AuthResponse {
            token,
            user: record.public_profile(),
        })
    }

    pub async fn login(&self, request: LoginRequest, ip: &str) -> AppResult<AuthResponse> {
        self.rate_limit("login", ip, LOGINS_PER_IP_PER_MINUTE, 60)
            .await?;

        let user_id = self.resolve_credentials(&request).await?;
        let Some(user_id) = user_id else {
            return Err(AppError::unauthorized("Invalid credentials"));
        };

        // Account lockout rides the same window counter the failures feed.
        let lockout_key = keys::rate_limit("lockout", &user_id);
        if let Some(count) = self.window_count(&lockout_key).await? {
            if count >= LOCKOUT_THRESHOLD {
                warn!(user_id = %user_id, "login rejected by account lockout");
                return Err(AppError::RateLimited);
            }
        }

        let coordinator = self.coordinators.user(&user_id);
        let record = coordinator.get().await?;
        if !verify_password(&request.password, &record.password) {
            self.kv
                .incr_window(&lockout_key, LOCKOUT_WINDOW_SECS)
                .await
                .map_err(kv_err)?;
            return Err(AppError::unauthorized("Invalid credentials"));
        }
        if record.profile.is_banned {
            return Err(AppError::forbidden("Account suspended"));
        }

        coordinator.touch_last_login().await?;
        let token = self.mint_token(&record)?;
        info!(user_id = %user_id, "user logged in");
        Ok(AuthResponse {
            token,
            user: record.public_profile(),
        })
    }

    /// Exchange a valid bearer for a fresh one.
    pub async fn refresh(&self, user_id: &str) -> AppResult<AuthResponse> {
        self.check_ban(user_id).await?;
        let record = self.coordinators.user(user_id).get().await?;
        let token = self.mint_token(&record)?;
        Ok(AuthResponse {
            token,
            user: record.public_profile(),
        })
    }

    pub fn verify_token(&self, token: &str) -> AppResult<Claims> {
        tokens::verify(&self.config.jwt_secret, token)
    }

    /// Ban check with a 60 s cached verdict. An unreachable store denies
    /// (fail closed): trust decisions never default to open.
    pub async fn check_ban(&self, user_id: &str) -> AppResult<()> {
        let cache_key = keys::ban_status(user_id);
        let cached = self
            .kv
            .get(&cache_key)
            .await
            .map_err(|e| AppError::trust_dependency(e.to_string()))?;

        let verdict = match cached {
            Some(verdict) => verdict,
            None => {
                let banned = self
                    .coordinators
                    .user(user_id)
                    .is_banned()
                    .await
                    .map_err(|e| match e.status_code() {
                        404 => e,
                        _ => AppError::trust_dependency(e.to_string()),
                    })?;
                let verdict = if banned { "banned" } else { "active" };
                self.kv
                    .set_ex(&cache_key, verdict, BAN_CACHE_TTL_SECS)
                    .await
                    .map_err(|e| AppError::trust_dependency(e.to_string()))?;
                verdict.to_string()
            }
        };

        if verdict == "banned" {
            return Err(AppError::forbidden("Account suspended"));
        }
        Ok(())
    }

    /// Issue a reset token. The response is uniform whether or not the
    /// handle/email pair matches an account.
    pub async fn request_password_reset(&self, handle: &str, email: &str) -> AppResult<()> {
        let handle = handle.trim().to_lowercase();
        let email = email.trim().to_lowercase();

        let Some(user_id) = self.kv.get(&keys::handle(&handle)).await.map_err(kv_err)? else {
            return Ok(());
        };
        let Ok(record) = self.coordinators.user(&user_id).get().await else {
            return Ok(());
        };
        if record.email != email {
            return Ok(());
        }

        let mut token_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        self.kv
            .set_ex(&keys::reset(&user_id), &token, RESET_TOKEN_TTL_SECS)
            .await
            .map_err(kv_err)?;

        // Delivery (email) is an external concern; the token only exists
        // in the reset key.
        info!(user_id = %user_id, "password reset token issued");
        Ok(())
    }

    /// Apply a reset token. Single-use: the key is deleted on success.
    pub async fn confirm_password_reset(
        &self,
        handle: &str,
        token: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let handle = handle.trim().to_lowercase();
        let user_id = self
            .kv
            .get(&keys::handle(&handle))
            .await
            .map_err(kv_err)?
            .ok_or_else(|| AppError::validation("Invalid or expired reset token"))?;

        let stored = self
            .kv
            .get(&keys::reset(&user_id))
            .await
            .map_err(kv_err)?
            .ok_or_else(|| AppError::validation("Invalid or expired reset token"))?;
        if !constant_time_eq(stored.as_bytes(), token.as_bytes()) {
            return Err(AppError::validation("Invalid or expired reset token"));
        }

        if !validators::validate_password(new_password) {
            return Err(AppError::validation(
                "Password must be 8-128 characters with upper, lower, and digit",
            ));
        }

        self.kv.delete(&keys::reset(&user_id)).await.map_err(kv_err)?;
        self.coordinators
            .user(&user_id)
            .set_password(hash_password(new_password))
            .await?;

        info!(user_id = %user_id, "password reset applied");
        Ok(())
    }

    async fn resolve_credentials(&self, request: &LoginRequest) -> AppResult<Option<String>> {
        if let Some(handle) = &request.handle {
            return self
                .kv
                .get(&keys::handle(&handle.trim().to_lowercase()))
                .await
                .map_err(kv_err);
        }
        if let Some(email) = &request.email {
            return self
                .kv
                .get(&keys::email(&email.trim().to_lowercase()))
                .await
                .map_err(kv_err);
        }
        Ok(None)
    }

    async fn rate_limit(&self, bucket: &str, key: &str, max: u64, window_secs: u64) -> AppResult<()> {
        let count = self
            .kv
            .incr_window(&keys::rate_limit(bucket, key), window_secs)
            .await
            .map_err(kv_err)?;
        if count > max {
            warn!(bucket = %bucket, key = %key, count, "rate limit exceeded");
            return Err(AppError::RateLimited);
        }
        Ok(())
    }

    async fn window_count(&self, key: &str) -> AppResult<Option<u64>> {
        Ok(self
            .kv
            .get(key)
            .await
            .map_err(kv_err)?
            .and_then(|v| v.parse().ok()))
    }

    async fn rollback_reservations(&self, handle: &str, email: Option<&str>) {
        if let Err(e) = self.kv.delete(&keys::handle(handle)).await {
            warn!(handle = %handle, "handle reservation rollback failed: {}", e);
        }
        if let Some(email) = email {
            if let Err(e) = self.kv.delete(&keys::email(email)).await {
                warn!("email reservation rollback failed: {}", e);
            }
        }
    }

    fn mint_token(&self, record: &UserRecord) -> AppResult<String> {
        tokens::mint(
            &self.config.jwt_secret,
            self.config.jwt_expiry_hours,
            &record.id,
            &record.email,
            &record.handle,
        )
    }

    fn mint_id(&self) -> AppResult<String> {
        self.ids
            .generate()
            .map_err(|e| AppError::internal(format!("id generation failed: {}", e)))
    }
}
