pub mod auth;
pub mod config;
pub mod coordinators;
pub mod handlers;
pub mod jobs;
pub mod keys;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod objects;
pub mod services;
pub mod state;
pub mod utils;
pub mod websocket;

pub use config::Config;
pub use state::AppState;
