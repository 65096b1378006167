//! Notification fan-in
//!
//! Creates notification records in the KV tier (30-day TTL, per-recipient
//! list capped at the newest 1 000) and pushes them to the recipient's
//! live connections. Self-actions never notify.

use crate::coordinators::kv_err;
use crate::keys;
use crate::models::{
    ActorSnapshot, Notification, NotificationKind, NOTIFICATION_LIST_CAP, NOTIFICATION_TTL_SECS,
};
use crate::websocket::ConnectionManager;
use chrono::Utc;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use snowflake_id::SnowflakeGenerator;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct NotificationService {
    kv: Arc<dyn KvStore>,
    connections: ConnectionManager,
    ids: Arc<SnowflakeGenerator>,
}

#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub actor_id: String,
    pub actor: ActorSnapshot,
    pub post_id: Option<String>,
    pub content_preview: Option<String>,
}

impl NotificationService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        connections: ConnectionManager,
        ids: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            kv,
            connections,
            ids,
        }
    }

    /// Store and push one notification. Acting on your own content is not
    /// notified.
    pub async fn notify(&self, request: NotifyRequest) -> AppResult<()> {
        if request.recipient_id == request.actor_id {
            return Ok(());
        }

        let id = self
            .ids
            .generate()
            .map_err(|e| AppError::internal(format!("id generation failed: {}", e)))?;
        let notification = Notification {
            id: id.clone(),
            user_id: request.recipient_id.clone(),
            kind: request.kind,
            actor_id: request.actor_id,
            actor: request.actor,
            post_id: request.post_id,
            content_preview: request.content_preview,
            created_at: Utc::now(),
            read: false,
        };

        let blob = serde_json::to_string(&notification)
            .map_err(|e| AppError::internal(format!("serialize notification: {}", e)))?;
        self.kv
            .set_ex(
                &keys::notification(&notification.user_id, &id),
                &blob,
                NOTIFICATION_TTL_SECS,
            )
            .await
            .map_err(kv_err)?;

        // Newest first; evicted ids lose their record too.
        let mut list = self.load_list(&notification.user_id).await?;
        list.insert(0, id);
        let evicted = list.split_off(list.len().min(NOTIFICATION_LIST_CAP));
        for old_id in evicted {
            self.kv
                .delete(&keys::notification(&notification.user_id, &old_id))
                .await
                .map_err(kv_err)?;
        }
        self.save_list(&notification.user_id, &list).await?;

        self.connections
            .broadcast_notification(&notification.user_id, &notification);
        debug!(
            recipient = %notification.user_id,
            kind = ?notification.kind,
            "notification delivered"
        );
        Ok(())
    }

    /// Newest-first page. Expired records are skipped and pruned from the
    /// list lazily.
    pub async fn list(&self, user_id: &str, limit: usize) -> AppResult<Vec<Notification>> {
        let ids = self.load_list(user_id).await?;
        let mut notifications = Vec::with_capacity(limit.min(ids.len()));
        let mut live_ids = Vec::with_capacity(ids.len());

        for id in &ids {
            match self.load_notification(user_id, id).await? {
                Some(notification) => {
                    live_ids.push(id.clone());
                    if notifications.len() < limit {
                        notifications.push(notification);
                    }
                }
                None => continue,
            }
        }

        if live_ids.len() != ids.len() {
            self.save_list(user_id, &live_ids).await?;
        }
        Ok(notifications)
    }

    pub async fn unread_count(&self, user_id: &str) -> AppResult<usize> {
        let ids = self.load_list(user_id).await?;
        let mut count = 0;
        for id in &ids {
            if let Some(notification) = self.load_notification(user_id, id).await? {
                if !notification.read {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    pub async fn mark_read(&self, user_id: &str, notification_id: &str) -> AppResult<()> {
        let mut notification = self
            .load_notification(user_id, notification_id)
            .await?
            .ok_or_else(|| AppError::not_found("Notification not found"))?;
        if !notification.read {
            notification.read = true;
            self.store(&notification).await?;
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, user_id: &str) -> AppResult<usize> {
        let ids = self.load_list(user_id).await?;
        let mut updated = 0;
        for id in &ids {
            if let Some(mut notification) = self.load_notification(user_id, id).await? {
                if !notification.read {
                    notification.read = true;
                    self.store(&notification).await?;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn store(&self, notification: &Notification) -> AppResult<()> {
        let blob = serde_json::to_string(notification)
            .map_err(|e| AppError::internal(format!("serialize notification: {}", e)))?;
        // Remaining TTL shrinks with age so a read never revives an entry
        // past its 30-day window.
        let age_secs = (Utc::now() - notification.created_at).num_seconds().max(0) as u64;
        let ttl = NOTIFICATION_TTL_SECS.saturating_sub(age_secs).max(1);
        self.kv
            .set_ex(
                &keys::notification(&notification.user_id, &notification.id),
                &blob,
                ttl,
            )
            .await
            .map_err(kv_err)
    }

    async fn load_notification(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> AppResult<Option<Notification>> {
        match self
            .kv
            .get(&keys::notification(user_id, notification_id))
            .await
            .map_err(kv_err)?
        {
            Some(blob) => serde_json::from_str(&blob)
                .map(Some)
                .map_err(|e| AppError::internal(format!("corrupt notification: {}", e))),
            None => Ok(None),
        }
    }

    async fn load_list(&self, user_id: &str) -> AppResult<Vec<String>> {
        match self
            .kv
            .get(&keys::notification_list(user_id))
            .await
            .map_err(kv_err)?
        {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| AppError::internal(format!("corrupt notification list: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn save_list(&self, user_id: &str, ids: &[String]) -> AppResult<()> {
        let blob = serde_json::to_string(ids)
            .map_err(|e| AppError::internal(format!("serialize notification list: {}", e)))?;
        self.kv
            .set(&keys::notification_list(user_id), &blob)
            .await
            .map_err(kv_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::MemoryKv;

    fn actor() -> ActorSnapshot {
        ActorSnapshot {
            handle: "alice".into(),
            display_name: "Alice".into(),
            avatar_url: String::new(),
        }
    }

    fn service() -> NotificationService {
        NotificationService::new(
            Arc::new(MemoryKv::new()),
            ConnectionManager::new(),
            Arc::new(SnowflakeGenerator::new(0).unwrap()),
        )
    }

    fn request(recipient: &str, kind: NotificationKind) -> NotifyRequest {
        NotifyRequest {
            recipient_id: recipient.to_string(),
            kind,
            actor_id: "u1".to_string(),
            actor: actor(),
            post_id: Some("7".to_string()),
            content_preview: Some("hello".to_string()),
        }
    }

    #[tokio::test]
    async fn test_notify_and_list_newest_first() {
        let service = service();
        service
            .notify(request("u2", NotificationKind::Like))
            .await
            .unwrap();
        service
            .notify(request("u2", NotificationKind::Reply))
            .await
            .unwrap();

        let list = service.list("u2", 10).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind, NotificationKind::Reply);
        assert_eq!(list[1].kind, NotificationKind::Like);
    }

    #[tokio::test]
    async fn test_self_action_not_notified() {
        let service = service();
        service
            .notify(request("u1", NotificationKind::Like))
            .await
            .unwrap();
        assert!(service.list("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unread_count_and_mark_read() {
        let service = service();
        service
            .notify(request("u2", NotificationKind::Like))
            .await
            .unwrap();
        service
            .notify(request("u2", NotificationKind::Follow))
            .await
            .unwrap();
        assert_eq!(service.unread_count("u2").await.unwrap(), 2);

        let first = &service.list("u2", 10).await.unwrap()[0];
        service.mark_read("u2", &first.id).await.unwrap();
        assert_eq!(service.unread_count("u2").await.unwrap(), 1);

        service.mark_all_read("u2").await.unwrap();
        assert_eq!(service.unread_count("u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_is_not_found() {
        let service = service();
        let err = service.mark_read("u2", "404").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_list_push_reaches_live_connection() {
        let kv = Arc::new(MemoryKv::new());
        let connections = ConnectionManager::new();
        let service = NotificationService::new(
            kv,
            connections.clone(),
            Arc::new(SnowflakeGenerator::new(0).unwrap()),
        );

        let (_, mut rx) = connections.register("u2");
        // Drain the connected frame.
        let _ = rx.try_recv();

        service
            .notify(request("u2", NotificationKind::Mention))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            crate::websocket::manager::Outbound::Frame(frame) => {
                let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
                assert_eq!(json["type"], "notification");
                assert_eq!(json["notification"]["type"], "mention");
            }
            other => panic!("unexpected outbound event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_cap_evicts_oldest_records() {
        let service = service();
        for _ in 0..(NOTIFICATION_LIST_CAP + 5) {
            service
                .notify(request("u2", NotificationKind::Like))
                .await
                .unwrap();
        }
        let list = service.list("u2", NOTIFICATION_LIST_CAP + 10).await.unwrap();
        assert_eq!(list.len(), NOTIFICATION_LIST_CAP);
    }
}
