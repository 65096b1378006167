//! Background jobs
//!
//! Interval-driven loops spawned at startup: the explore-cache rebuild,
//! the stale-connection sweep, and a KV keepalive ping.

use crate::metrics;
use crate::state::AppState;
use crate::websocket::manager::{STALE_AFTER, SWEEP_INTERVAL};
use std::time::Duration;
use tracing::{debug, error, info};

const RANKING_REBUILD_INTERVAL: Duration = Duration::from_secs(15 * 60);
const KV_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub fn spawn_background_jobs(state: &AppState) {
    spawn_ranking_rebuild(state.clone());
    spawn_connection_sweep(state.clone());
    spawn_kv_keepalive(state.clone());
}

fn spawn_ranking_rebuild(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RANKING_REBUILD_INTERVAL);
        loop {
            ticker.tick().await;
            match state.ranking.build_explore_cache().await {
                Ok(count) => debug!(candidates = count, "explore cache rebuild complete"),
                Err(e) => error!("explore cache rebuild failed: {}", e),
            }
        }
    });
    info!(
        interval_secs = RANKING_REBUILD_INTERVAL.as_secs(),
        "ranking rebuild job scheduled"
    );
}

fn spawn_connection_sweep(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        // The first tick fires immediately; skip it so fresh connections
        // are not measured against an empty heartbeat history.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = state.connections.sweep_stale(STALE_AFTER);
            if swept > 0 {
                metrics::observe_swept_connections(swept);
                debug!(swept, "stale websocket connections closed");
            }
        }
    });
    info!(
        interval_secs = SWEEP_INTERVAL.as_secs(),
        stale_after_secs = STALE_AFTER.as_secs(),
        "connection sweep job scheduled"
    );
}

fn spawn_kv_keepalive(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KV_KEEPALIVE_INTERVAL);
        let mut consecutive_failures = 0u32;
        loop {
            ticker.tick().await;
            match state.kv.ping().await {
                Ok(()) => {
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= 3 {
                        error!(
                            consecutive_failures,
                            "kv keepalive ping failing: {}", e
                        );
                    }
                }
            }
        }
    });
}
