//! A user's own notifications and delivery preferences.

use tracing::info;

use dulce_core::notification::{Notification, UserNotificationPreference};
use dulce_core::validation::validate_phone;
use dulce_core::CoreError;
use dulce_db::Database;

use crate::error::ApiResult;

pub struct InboxService {
    db: Database,
}

impl InboxService {
    pub fn new(db: Database) -> Self {
        InboxService { db }
    }

    /// Newest first.
    pub async fn list(&self, user_id: &str, limit: i64) -> ApiResult<Vec<Notification>> {
        Ok(self
            .db
            .notifications()
            .list_for_user(user_id, limit.clamp(1, 100))
            .await?)
    }

    pub async fn unread_count(&self, user_id: &str) -> ApiResult<i64> {
        Ok(self.db.notifications().unread_count(user_id).await?)
    }

    pub async fn mark_read(&self, notification_id: &str, user_id: &str) -> ApiResult<Notification> {
        Ok(self
            .db
            .notifications()
            .mark_read(notification_id, user_id)
            .await?)
    }

    pub async fn mark_all_read(&self, user_id: &str) -> ApiResult<u64> {
        Ok(self.db.notifications().mark_all_read(user_id).await?)
    }

    pub async fn preferences(&self, user_id: &str) -> ApiResult<UserNotificationPreference> {
        Ok(self.db.notifications().preferences(user_id).await?)
    }

    /// Replaces the user's preferences. Blank phone numbers are cleared.
    pub async fn update_preferences(
        &self,
        user_id: &str,
        prefs: UserNotificationPreference,
    ) -> ApiResult<UserNotificationPreference> {
        let prefs = UserNotificationPreference {
            user_id: user_id.to_string(),
            phone_number: non_blank(prefs.phone_number),
            whatsapp_number: non_blank(prefs.whatsapp_number),
            ..prefs
        };
        for phone in [&prefs.phone_number, &prefs.whatsapp_number].into_iter().flatten() {
            validate_phone(phone).map_err(CoreError::from)?;
        }

        self.db.notifications().upsert_preferences(&prefs).await?;
        info!(user_id = %user_id, "Notification preferences updated");
        Ok(prefs)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_support::{placed_order, test_storefront};
    use dulce_core::notification::NotificationStatus;
    use dulce_core::order::{Actor, OrderStatus};

    #[tokio::test]
    async fn test_read_flow() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, Some("u1")).await;
        let staff = Actor::staff("kati");
        sf.orders()
            .change_status(&order.id, OrderStatus::Confirmed, None, None, &staff)
            .await
            .unwrap();
        sf.orders()
            .change_status(&order.id, OrderStatus::Processing, None, None, &staff)
            .await
            .unwrap();

        assert_eq!(sf.inbox().unread_count("u1").await.unwrap(), 2);
        let inbox = sf.inbox().list("u1", 10).await.unwrap();
        assert_eq!(inbox.len(), 2);

        let err = sf.inbox().mark_read(&inbox[0].id, "u2").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let read = sf.inbox().mark_read(&inbox[0].id, "u1").await.unwrap();
        assert_eq!(read.status, NotificationStatus::Read);
        assert!(read.read_at.is_some());
        assert_eq!(sf.inbox().unread_count("u1").await.unwrap(), 1);

        assert_eq!(sf.inbox().mark_all_read("u1").await.unwrap(), 1);
        assert_eq!(sf.inbox().unread_count("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_preferences_default_and_update() {
        let sf = test_storefront().await;
        let prefs = sf.inbox().preferences("u1").await.unwrap();
        assert!(prefs.email_enabled);
        assert!(!prefs.sms_enabled);

        let updated = sf
            .inbox()
            .update_preferences(
                "u1",
                UserNotificationPreference {
                    user_id: "someone-else".into(),
                    sms_enabled: true,
                    phone_number: Some(" +56 9 1234 5678 ".into()),
                    whatsapp_number: Some("   ".into()),
                    ..prefs.clone()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.user_id, "u1");
        assert_eq!(updated.whatsapp_number, None);
        assert_eq!(sf.inbox().preferences("u1").await.unwrap(), updated);

        let err = sf
            .inbox()
            .update_preferences(
                "u1",
                UserNotificationPreference {
                    phone_number: Some("12".into()),
                    ..prefs
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }
}
