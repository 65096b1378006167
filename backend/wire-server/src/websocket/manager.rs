//! WebSocket connection registry
//!
//! One logical connection owner per user: all live connections for a user
//! hang off that user's entry, each with its own outbound channel and
//! heartbeat bookkeeping. Broadcast is best-effort; a failed send drops
//! the connection. A periodic sweep closes connections whose last ping is
//! stale.

use super::messages::ServerMessage;
use crate::models::{Notification, PostSnapshot};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sweep cadence and the staleness bound it enforces.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Outbound events for one connection. `Close` tells the session actor to
/// finish the protocol-level close.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(String),
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

struct ConnectionHandle {
    sender: OutboundSender,
    connected_at: Instant,
    last_ping: Instant,
}

/// Registry of live connections per user.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: std::sync::Arc<DashMap<String, HashMap<String, ConnectionHandle>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and emit the `connected` frame on it.
    /// Returns the connection id and the receiving half for the session.
    pub fn register(&self, user_id: &str) -> (String, OutboundReceiver) {
        let connection_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let now = Instant::now();
        let handle = ConnectionHandle {
            sender: tx,
            connected_at: now,
            last_ping: now,
        };
        if let Ok(frame) = ServerMessage::connected(&connection_id).to_json() {
            let _ = handle.sender.send(Outbound::Frame(frame));
        }

        self.connections
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.clone(), handle);

        debug!(user_id = %user_id, connection_id = %connection_id, "websocket connected");
        (connection_id, rx)
    }

    pub fn unregister(&self, user_id: &str, connection_id: &str) {
        if let Some(mut entry) = self.connections.get_mut(user_id) {
            entry.remove(connection_id);
            if entry.is_empty() {
                drop(entry);
                self.connections
                    .remove_if(user_id, |_, handles| handles.is_empty());
            }
        }
    }

    /// Record a heartbeat and hand back the pong frame to send.
    pub fn touch(&self, user_id: &str, connection_id: &str) -> Option<ServerMessage> {
        let mut entry = self.connections.get_mut(user_id)?;
        let handle = entry.get_mut(connection_id)?;
        handle.last_ping = Instant::now();
        Some(ServerMessage::pong())
    }

    /// Push a post to every live connection of one user.
    pub fn broadcast_post(&self, user_id: &str, post: &PostSnapshot) {
        self.broadcast(user_id, ServerMessage::new_post(post.clone()));
    }

    pub fn broadcast_notification(&self, user_id: &str, notification: &Notification) {
        self.broadcast(user_id, ServerMessage::notification(notification.clone()));
    }

    fn broadcast(&self, user_id: &str, message: ServerMessage) {
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to encode websocket frame: {}", e);
                return;
            }
        };

        let Some(mut entry) = self.connections.get_mut(user_id) else {
            return;
        };
        // A send failure means the session is gone; drop the handle.
        entry.retain(|connection_id, handle| {
            let delivered = handle.sender.send(Outbound::Frame(frame.clone())).is_ok();
            if !delivered {
                debug!(user_id = %user_id, connection_id = %connection_id, "dropping dead connection");
            }
            delivered
        });
    }

    /// Close and remove every connection whose last ping is older than
    /// `max_age`. Returns how many were dropped.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut dropped = 0;

        for mut entry in self.connections.iter_mut() {
            let user_id = entry.key().clone();
            entry.retain(|connection_id, handle| {
                let stale = now.duration_since(handle.last_ping) > max_age;
                if stale {
                    let _ = handle.sender.send(Outbound::Close);
                    debug!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        age_secs = now.duration_since(handle.connected_at).as_secs(),
                        "closing stale websocket"
                    );
                    dropped += 1;
                }
                !stale
            });
        }
        self.connections.retain(|_, handles| !handles.is_empty());
        dropped
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .get(user_id)
            .map(|handles| handles.len())
            .unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.iter().map(|entry| entry.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PostCounters;
    use chrono::Utc;

    fn snapshot(id: &str) -> PostSnapshot {
        PostSnapshot {
            id: id.to_string(),
            author_id: "u1".into(),
            author_handle: "alice".into(),
            author_display_name: "Alice".into(),
            author_avatar_url: String::new(),
            content: "hello".into(),
            media_urls: Vec::new(),
            reply_to_id: None,
            quote_of_id: None,
            repost_of_id: None,
            created_at: Utc::now(),
            counters: PostCounters::default(),
            is_deleted: false,
            is_taken_down: false,
        }
    }

    fn recv_frame(rx: &mut OutboundReceiver) -> serde_json::Value {
        match rx.try_recv().unwrap() {
            Outbound::Frame(frame) => serde_json::from_str(&frame).unwrap(),
            Outbound::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn test_register_emits_connected_frame() {
        let manager = ConnectionManager::new();
        let (connection_id, mut rx) = manager.register("u1");

        let frame = recv_frame(&mut rx);
        assert_eq!(frame["type"], "connected");
        assert_eq!(frame["connection_id"], connection_id.as_str());
        assert_eq!(manager.connection_count("u1"), 1);
    }

    #[tokio::test]
    async fn test_multiple_connections_per_user() {
        let manager = ConnectionManager::new();
        let (_, _rx1) = manager.register("u1");
        let (_, _rx2) = manager.register("u1");
        let (_, _rx3) = manager.register("u2");

        assert_eq!(manager.connection_count("u1"), 2);
        assert_eq!(manager.total_connections(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_post_reaches_all_user_connections() {
        let manager = ConnectionManager::new();
        let (_, mut rx1) = manager.register("u1");
        let (_, mut rx2) = manager.register("u1");
        let (_, mut rx3) = manager.register("u2");
        recv_frame(&mut rx1);
        recv_frame(&mut rx2);
        recv_frame(&mut rx3);

        manager.broadcast_post("u1", &snapshot("7"));

        for rx in [&mut rx1, &mut rx2] {
            let frame = recv_frame(rx);
            assert_eq!(frame["type"], "new_post");
            assert_eq!(frame["post"]["id"], "7");
        }
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_failure_drops_connection() {
        let manager = ConnectionManager::new();
        let (_, rx) = manager.register("u1");
        drop(rx);

        manager.broadcast_post("u1", &snapshot("7"));
        assert_eq!(manager.connection_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_touch_returns_pong() {
        let manager = ConnectionManager::new();
        let (connection_id, _rx) = manager.register("u1");

        let pong = manager.touch("u1", &connection_id).unwrap();
        assert!(matches!(pong, ServerMessage::Pong { .. }));
        assert!(manager.touch("u1", "unknown").is_none());
    }

    #[tokio::test]
    async fn test_sweep_closes_only_stale_connections() {
        let manager = ConnectionManager::new();
        let (stale_id, mut stale_rx) = manager.register("u1");
        let (fresh_id, _fresh_rx) = manager.register("u1");
        recv_frame(&mut stale_rx);

        // Nothing is stale yet.
        assert_eq!(manager.sweep_stale(Duration::from_secs(60)), 0);

        // With a zero staleness bound everything not touched this instant
        // goes away; keep the fresh one alive.
        manager.touch("u1", &fresh_id);
        std::thread::sleep(Duration::from_millis(20));
        manager.touch("u1", &fresh_id);
        let dropped = manager.sweep_stale(Duration::from_millis(10));
        assert_eq!(dropped, 1);
        assert_eq!(manager.connection_count("u1"), 1);

        // The stale session was told to close.
        let mut saw_close = false;
        while let Ok(event) = stale_rx.try_recv() {
            if matches!(event, Outbound::Close) {
                saw_close = true;
            }
        }
        assert!(saw_close, "stale connection {} missing close", stale_id);
    }

    #[tokio::test]
    async fn test_unregister_removes_user_entry() {
        let manager = ConnectionManager::new();
        let (connection_id, _rx) = manager.register("u1");
        manager.unregister("u1", &connection_id);
        assert_eq!(manager.connection_count("u1"), 0);
        assert_eq!(manager.total_connections(), 0);
    }
}
