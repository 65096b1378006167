use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub bind_addr: String,
    pub log_level: String,
    /// Handle promoted to admin on startup, if the account exists.
    pub initial_admin_handle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub redis_url: String,
    /// "redis" in production; "memory" runs the in-process store and queue.
    pub backend: String,
    pub queue_stream: String,
    pub queue_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_post_length: usize,
    pub feed_page_size: usize,
    pub max_page_limit: usize,
    pub snowflake_worker_id: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                bind_addr: std::env::var("BIND_ADDR")
                    .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                initial_admin_handle: std::env::var("INITIAL_ADMIN_HANDLE").ok(),
            },
            store: StoreConfig {
                redis_url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                backend: std::env::var("STORE_BACKEND").unwrap_or_else(|_| "redis".to_string()),
                queue_stream: std::env::var("QUEUE_STREAM")
                    .unwrap_or_else(|_| "wire:post-events".to_string()),
                queue_group: std::env::var("QUEUE_GROUP")
                    .unwrap_or_else(|_| "fanout-workers".to_string()),
            },
            auth: AuthConfig {
                jwt_secret: std::env::var("JWT_SECRET")?,
                jwt_expiry_hours: std::env::var("JWT_EXPIRY_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()?,
            },
            limits: LimitsConfig {
                max_post_length: std::env::var("MAX_POST_LENGTH")
                    .unwrap_or_else(|_| "280".to_string())
                    .parse()?,
                feed_page_size: std::env::var("FEED_PAGE_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
                max_page_limit: std::env::var("MAX_PAGE_LIMIT")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()?,
                snowflake_worker_id: std::env::var("SNOWFLAKE_WORKER_ID")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()?,
            },
        })
    }

    /// Clamp a client-supplied page size to the configured bounds.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.limits.feed_page_size)
            .clamp(1, self.limits.max_page_limit)
    }
}

/// Fixed configuration for tests; never read in production paths.
pub fn test_config() -> Config {
    Config {
        app: AppConfig {
            env: "test".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            log_level: "debug".to_string(),
            initial_admin_handle: None,
        },
        store: StoreConfig {
            redis_url: "redis://localhost:6379".to_string(),
            backend: "memory".to_string(),
            queue_stream: "wire:post-events".to_string(),
            queue_group: "fanout-workers".to_string(),
        },
        auth: AuthConfig {
            jwt_secret: "test-secret-do-not-use".to_string(),
            jwt_expiry_hours: 24,
        },
        limits: LimitsConfig {
            max_post_length: 280,
            feed_page_size: 20,
            max_page_limit: 50,
            snowflake_worker_id: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_limit_clamps() {
        let config = test_config();
        assert_eq!(config.page_limit(None), 20);
        assert_eq!(config.page_limit(Some(10)), 10);
        assert_eq!(config.page_limit(Some(500)), 50);
        assert_eq!(config.page_limit(Some(0)), 1);
    }
}
