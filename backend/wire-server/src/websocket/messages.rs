//! WebSocket frame types
//!
//! JSON text frames, discriminated by `type`.

use crate::models::{Notification, PostSnapshot};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        connection_id: String,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    NewPost {
        post: PostSnapshot,
        timestamp: i64,
    },
    Notification {
        notification: Notification,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn connected(connection_id: &str) -> Self {
        ServerMessage::Connected {
            connection_id: connection_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn new_post(post: PostSnapshot) -> Self {
        ServerMessage::NewPost {
            post,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn notification(notification: Notification) -> Self {
        ServerMessage::Notification {
            notification,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ping_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn test_unknown_client_frame_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_frames_carry_type_tags() {
        let json = serde_json::to_value(ServerMessage::connected("c1")).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["connection_id"], "c1");

        let json = serde_json::to_value(ServerMessage::pong()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json["timestamp"].is_i64());
    }
}
