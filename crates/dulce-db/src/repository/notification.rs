//! # Notification Repository
//!
//! Notifications, their delivery queue and attempt log, templates and
//! per-user preferences.
//!
//! ```text
//! create() ──► notifications (pending) + notification_queue entry + log "created"
//!                                   │
//!            worker: due(now) ◄─────┘  priority ASC, scheduled_at ASC
//!                │
//!                ├─ sent   → save() + mark_processed()
//!                └─ failed → save() + requeue(later) while can_retry
//!                                   else mark_processed()
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use dulce_core::notification::{
    Channel, Notification, NotificationDraft, NotificationLog, NotificationStatus,
    NotificationTemplate, NotificationType, QueueEntry, UserNotificationPreference,
    DEFAULT_MAX_RETRIES,
};

async fn insert_log(
    conn: &mut SqliteConnection,
    notification_id: &str,
    action: &str,
    details: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO notification_logs (id, notification_id, action, details, timestamp) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(notification_id)
    .bind(action)
    .bind(details)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        NotificationRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    /// Stores a pending notification and queues it for `scheduled_at`.
    pub async fn create(
        &self,
        draft: &NotificationDraft,
        scheduled_at: DateTime<Utc>,
    ) -> DbResult<Notification> {
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: draft.user_id.clone(),
            notification_type: draft.notification_type,
            channel: draft.channel,
            subject: draft.subject.clone(),
            message: draft.message.clone(),
            recipient_email: draft.recipient_email.clone(),
            recipient_phone: draft.recipient_phone.clone(),
            status: NotificationStatus::Pending,
            created_at: now,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            external_id: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            extra_data: draft.extra_data.to_string(),
        };

        let mut tx = begin_write(&self.pool).await?;
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, notification_type, channel, subject, message, recipient_email,
                recipient_phone, status, created_at, retry_count, max_retries, extra_data
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(notification.notification_type)
        .bind(notification.channel)
        .bind(&notification.subject)
        .bind(&notification.message)
        .bind(&notification.recipient_email)
        .bind(&notification.recipient_phone)
        .bind(notification.status)
        .bind(notification.created_at)
        .bind(notification.retry_count)
        .bind(notification.max_retries)
        .bind(&notification.extra_data)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO notification_queue (id, notification_id, priority, scheduled_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&notification.id)
        .bind(draft.priority.value())
        .bind(scheduled_at)
        .execute(&mut *tx)
        .await?;

        insert_log(&mut tx, &notification.id, "created", &format!("queued for {}", scheduled_at), now)
            .await?;
        tx.commit().await?;

        debug!(
            notification_id = %notification.id,
            kind = %notification.notification_type,
            channel = %notification.channel,
            "Notification queued"
        );
        Ok(notification)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Persists lifecycle fields after a send attempt or a read.
    pub async fn save(&self, notification: &Notification) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET status = ?, sent_at = ?, delivered_at = ?, read_at = ?, external_id = ?,
                error_message = ?, retry_count = ?
            WHERE id = ?
            "#,
        )
        .bind(notification.status)
        .bind(notification.sent_at)
        .bind(notification.delivered_at)
        .bind(notification.read_at)
        .bind(&notification.external_id)
        .bind(&notification.error_message)
        .bind(notification.retry_count)
        .bind(&notification.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn log(&self, notification_id: &str, action: &str, details: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_log(&mut conn, notification_id, action, details, Utc::now()).await
    }

    pub async fn logs(&self, notification_id: &str) -> DbResult<Vec<NotificationLog>> {
        let rows = sqlx::query_as::<_, NotificationLog>(
            "SELECT * FROM notification_logs WHERE notification_id = ? ORDER BY timestamp, rowid",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    /// Unprocessed entries scheduled at or before `now`, highest priority
    /// first, with their notifications.
    pub async fn due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<(QueueEntry, Notification)>> {
        let entries = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT * FROM notification_queue
            WHERE processed = 0 AND scheduled_at <= ?
            ORDER BY priority, scheduled_at, rowid
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut due = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.get(&entry.notification_id).await? {
                Some(notification) => due.push((entry, notification)),
                None => self.mark_processed(&entry.id, now).await?,
            }
        }
        Ok(due)
    }

    pub async fn mark_processed(&self, entry_id: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            "UPDATE notification_queue SET processed = 1, processed_at = ?, attempts = attempts + 1 WHERE id = ?",
        )
        .bind(now)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Puts an entry back for another attempt at `at`.
    pub async fn requeue(&self, entry_id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE notification_queue SET scheduled_at = ?, attempts = attempts + 1 WHERE id = ? AND processed = 0",
        )
        .bind(at)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("QueueEntry", entry_id));
        }
        Ok(())
    }

    pub async fn pending_count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification_queue WHERE processed = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Templates / Preferences
    // -------------------------------------------------------------------------

    pub async fn template(
        &self,
        kind: NotificationType,
        channel: Channel,
    ) -> DbResult<Option<NotificationTemplate>> {
        let row = sqlx::query_as::<_, NotificationTemplate>(
            "SELECT * FROM notification_templates WHERE notification_type = ? AND channel = ? AND is_active = 1",
        )
        .bind(kind)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Stored preferences, or the defaults when the user has none.
    pub async fn preferences(&self, user_id: &str) -> DbResult<UserNotificationPreference> {
        let row = sqlx::query_as::<_, UserNotificationPreference>(
            "SELECT * FROM user_notification_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_else(|| UserNotificationPreference::defaults_for(user_id)))
    }

    pub async fn upsert_preferences(&self, prefs: &UserNotificationPreference) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_notification_preferences (
                user_id, email_enabled, sms_enabled, whatsapp_enabled, push_enabled,
                order_notifications, shipping_notifications, promotional_notifications,
                support_notifications, stock_alert_notifications, phone_number, whatsapp_number
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                email_enabled = excluded.email_enabled,
                sms_enabled = excluded.sms_enabled,
                whatsapp_enabled = excluded.whatsapp_enabled,
                push_enabled = excluded.push_enabled,
                order_notifications = excluded.order_notifications,
                shipping_notifications = excluded.shipping_notifications,
                promotional_notifications = excluded.promotional_notifications,
                support_notifications = excluded.support_notifications,
                stock_alert_notifications = excluded.stock_alert_notifications,
                phone_number = excluded.phone_number,
                whatsapp_number = excluded.whatsapp_number
            "#,
        )
        .bind(&prefs.user_id)
        .bind(prefs.email_enabled)
        .bind(prefs.sms_enabled)
        .bind(prefs.whatsapp_enabled)
        .bind(prefs.push_enabled)
        .bind(prefs.order_notifications)
        .bind(prefs.shipping_notifications)
        .bind(prefs.promotional_notifications)
        .bind(prefs.support_notifications)
        .bind(prefs.stock_alert_notifications)
        .bind(&prefs.phone_number)
        .bind(&prefs.whatsapp_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inbox
    // -------------------------------------------------------------------------

    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> DbResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn unread_count(&self, user_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND status IN ('pending', 'sent', 'delivered')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Marks one of the user's notifications read. Idempotent.
    pub async fn mark_read(&self, id: &str, user_id: &str) -> DbResult<Notification> {
        let mut notification = self
            .get(id)
            .await?
            .filter(|n| n.user_id.as_deref() == Some(user_id))
            .ok_or_else(|| DbError::not_found("Notification", id))?;

        if notification.status != NotificationStatus::Read {
            notification.mark_read(Utc::now());
            self.save(&notification).await?;
        }
        Ok(notification)
    }

    pub async fn mark_all_read(&self, user_id: &str) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET status = 'read', read_at = ?
            WHERE user_id = ? AND status IN ('pending', 'sent', 'delivered')
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;
    use chrono::Duration;
    use dulce_core::notification::QueuePriority;
    use std::collections::HashMap;

    fn draft(user_id: Option<&str>, priority: QueuePriority) -> NotificationDraft {
        NotificationDraft {
            user_id: user_id.map(str::to_string),
            notification_type: NotificationType::OrderUpdate,
            channel: Channel::Email,
            subject: "Pedido actualizado".to_string(),
            message: "Tu pedido fue enviado".to_string(),
            recipient_email: Some("kati@example.cl".to_string()),
            recipient_phone: None,
            priority,
            extra_data: serde_json::json!({ "order_number": "DB-20240309-0001" }),
        }
    }

    #[tokio::test]
    async fn test_create_queues_and_logs() {
        let db = test_db().await;
        let n = db
            .notifications()
            .create(&draft(Some("u1"), QueuePriority::Normal), Utc::now())
            .await
            .unwrap();
        assert_eq!(n.status, NotificationStatus::Pending);
        assert_eq!(n.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(db.notifications().pending_count().await.unwrap(), 1);

        let logs = db.notifications().logs(&n.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "created");
    }

    #[tokio::test]
    async fn test_due_orders_by_priority_then_time() {
        let db = test_db().await;
        let repo = db.notifications();
        let now = Utc::now();

        let low = repo.create(&draft(None, QueuePriority::Low), now - Duration::minutes(5)).await.unwrap();
        let high = repo.create(&draft(None, QueuePriority::High), now - Duration::minutes(1)).await.unwrap();
        let later = repo.create(&draft(None, QueuePriority::High), now + Duration::hours(1)).await.unwrap();

        let due = repo.due(now, 10).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|(_, n)| n.id.as_str()).collect();
        assert_eq!(ids, vec![high.id.as_str(), low.id.as_str()]);
        assert!(!ids.contains(&later.id.as_str()));

        repo.mark_processed(&due[0].0.id, now).await.unwrap();
        repo.requeue(&due[1].0.id, now + Duration::minutes(5)).await.unwrap();
        assert!(repo.due(now, 10).await.unwrap().is_empty());
        assert!(repo.requeue(&due[0].0.id, now).await.is_err());
    }

    #[tokio::test]
    async fn test_save_lifecycle() {
        let db = test_db().await;
        let repo = db.notifications();
        let mut n = repo.create(&draft(Some("u1"), QueuePriority::Normal), Utc::now()).await.unwrap();

        n.mark_failed("smtp down");
        repo.save(&n).await.unwrap();
        let stored = repo.get(&n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.can_retry());

        n.mark_sent(Some("sim-1".to_string()), Utc::now());
        repo.save(&n).await.unwrap();
        let stored = repo.get(&n.id).await.unwrap().unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("sim-1"));
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_preferences_default_and_upsert() {
        let db = test_db().await;
        let repo = db.notifications();

        let prefs = repo.preferences("u1").await.unwrap();
        assert_eq!(prefs, UserNotificationPreference::defaults_for("u1"));

        let mut changed = prefs.clone();
        changed.sms_enabled = true;
        changed.phone_number = Some("+56911112222".to_string());
        repo.upsert_preferences(&changed).await.unwrap();
        changed.promotional_notifications = false;
        repo.upsert_preferences(&changed).await.unwrap();

        assert_eq!(repo.preferences("u1").await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_seeded_template_renders() {
        let db = test_db().await;
        let template = db
            .notifications()
            .template(NotificationType::OrderConfirmation, Channel::Sms)
            .await
            .unwrap()
            .unwrap();

        let context = HashMap::from([
            ("order_number".to_string(), "DB-20240309-0001".to_string()),
            ("message".to_string(), "Total $15.000".to_string()),
        ]);
        let (_, body) = template.render(&context);
        assert_eq!(body, "Dulce Bias: pedido DB-20240309-0001 recibido. Total $15.000");

        assert!(db
            .notifications()
            .template(NotificationType::Promotion, Channel::Push)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unread_and_mark_read() {
        let db = test_db().await;
        let repo = db.notifications();
        let a = repo.create(&draft(Some("u1"), QueuePriority::Normal), Utc::now()).await.unwrap();
        repo.create(&draft(Some("u1"), QueuePriority::Normal), Utc::now()).await.unwrap();
        repo.create(&draft(Some("u2"), QueuePriority::Normal), Utc::now()).await.unwrap();

        assert_eq!(repo.unread_count("u1").await.unwrap(), 2);

        let read = repo.mark_read(&a.id, "u1").await.unwrap();
        let first_read_at = read.read_at;
        let again = repo.mark_read(&a.id, "u1").await.unwrap();
        assert_eq!(again.read_at, first_read_at);
        assert!(repo.mark_read(&a.id, "u2").await.is_err());
        assert_eq!(repo.unread_count("u1").await.unwrap(), 1);

        assert_eq!(repo.mark_all_read("u1").await.unwrap(), 1);
        assert_eq!(repo.unread_count("u1").await.unwrap(), 0);
        assert_eq!(repo.unread_count("u2").await.unwrap(), 1);
        assert_eq!(repo.list_for_user("u1", 10).await.unwrap().len(), 2);
    }
}
