//! Turns notification drafts into queued notifications.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use dulce_core::notification::{self, Channel, Notification, NotificationDraft};
use dulce_core::order::{Order, OrderStatus};
use dulce_core::support::SupportTicket;
use dulce_core::transfer::TransferStatus;
use dulce_db::{Database, LowStock};

use super::NotifyResult;
use crate::config::StorefrontConfig;

/// Enqueues event notifications. Never sends inline.
#[derive(Clone)]
pub struct Notifier {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl Notifier {
    pub fn new(db: Database, config: Arc<StorefrontConfig>) -> Self {
        Notifier { db, config }
    }

    /// Queues one draft, unless the user's preferences disallow it.
    ///
    /// Returns `None` for a draft that was dropped.
    pub async fn enqueue(&self, draft: NotificationDraft) -> NotifyResult<Option<Notification>> {
        let mut draft = draft;

        if let Some(user_id) = draft.user_id.as_deref() {
            let prefs = self.db.notifications().preferences(user_id).await?;
            if !prefs.allows(draft.notification_type, draft.channel) {
                debug!(
                    user_id = %user_id,
                    kind = %draft.notification_type.as_str(),
                    channel = %draft.channel,
                    "Notification disabled by user preferences"
                );
                return Ok(None);
            }
            if matches!(draft.channel, Channel::Sms | Channel::Whatsapp) {
                draft.recipient_phone = prefs.phone_for(draft.channel, draft.recipient_phone.as_deref());
            }
        }

        if let Some(template) = self
            .db
            .notifications()
            .template(draft.notification_type, draft.channel)
            .await?
        {
            let (subject, message) = template.render(&template_context(&draft));
            draft.subject = subject;
            draft.message = message;
        }

        let created = self.db.notifications().create(&draft, Utc::now()).await?;
        debug!(
            id = %created.id,
            kind = %created.notification_type.as_str(),
            channel = %created.channel,
            "Notification queued"
        );
        Ok(Some(created))
    }

    /// Queues every draft. Failures are logged and skipped so a business
    /// operation that already committed is never undone by a notification.
    ///
    /// Returns how many were queued.
    pub async fn dispatch(&self, drafts: Vec<NotificationDraft>) -> usize {
        let mut queued = 0;
        for draft in drafts {
            let kind = draft.notification_type;
            match self.enqueue(draft).await {
                Ok(Some(_)) => queued += 1,
                Ok(None) => {}
                Err(e) => error!(?e, kind = %kind.as_str(), "Failed to queue notification"),
            }
        }
        queued
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub async fn order_created(&self, order: &Order, item_count: usize) -> usize {
        self.dispatch(notification::order_created(order, item_count)).await
    }

    pub async fn order_status_changed(&self, order: &Order, previous: OrderStatus) -> usize {
        self.dispatch(vec![notification::order_status_changed(order, previous)])
            .await
    }

    pub async fn transfer_decided(&self, order: &Order, status: TransferStatus) -> usize {
        self.dispatch(notification::transfer_decided(order, status).into_iter().collect())
            .await
    }

    pub async fn ticket_created(&self, ticket: &SupportTicket, email: Option<&str>) -> usize {
        self.dispatch(vec![notification::ticket_created(ticket, email)])
            .await
    }

    pub async fn ticket_updated(
        &self,
        ticket: &SupportTicket,
        email: Option<&str>,
        reply: Option<&str>,
    ) -> usize {
        self.dispatch(vec![notification::ticket_updated(ticket, email, reply)])
            .await
    }

    /// Alerts every configured admin contact about each product.
    pub async fn stock_alerts(&self, products: &[LowStock]) -> usize {
        let settings = &self.config.notifications;
        if products.is_empty() {
            return 0;
        }
        if settings.admin_emails.is_empty() && settings.admin_phones.is_empty() {
            debug!(count = products.len(), "No admin contacts configured for stock alerts");
            return 0;
        }

        let drafts = products
            .iter()
            .flat_map(|p| {
                notification::stock_alert(
                    &p.product_id,
                    &p.product_name,
                    p.stock,
                    &settings.admin_emails,
                    &settings.admin_phones,
                )
            })
            .collect();
        let queued = self.dispatch(drafts).await;
        info!(products = products.len(), queued, "Stock alerts queued");
        queued
    }
}

/// `{subject}`, `{message}` and the scalar fields of the extra data.
fn template_context(draft: &NotificationDraft) -> HashMap<String, String> {
    let mut context = HashMap::from([
        ("subject".to_string(), draft.subject.clone()),
        ("message".to_string(), draft.message.clone()),
    ]);
    if let Some(extra) = draft.extra_data.as_object() {
        for (key, value) in extra {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            context.insert(key.clone(), text);
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{placed_order, test_storefront};
    use dulce_core::notification::{NotificationType, QueuePriority, UserNotificationPreference};

    #[tokio::test]
    async fn test_order_created_uses_template_and_phone() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, None).await;

        let queued = sf.notifier().order_created(&order, 1).await;
        assert_eq!(queued, 2);

        let due = sf.db().notifications().due(Utc::now(), 10).await.unwrap();
        let email = due
            .iter()
            .map(|(_, n)| n)
            .find(|n| n.channel == Channel::Email)
            .unwrap();
        assert!(email.message.contains("Gracias por preferir Galletas Kati"));
        assert!(email.message.contains(&order.order_number));
        assert_eq!(email.subject, format!("Confirmación de Pedido #{}", order.order_number));

        let sms = due.iter().map(|(_, n)| n).find(|n| n.channel == Channel::Sms).unwrap();
        assert_eq!(sms.recipient_phone.as_deref(), Some(order.phone.as_str()));
    }

    #[tokio::test]
    async fn test_preferences_drop_disabled_channels() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, Some("u1")).await;

        // Defaults: email on, sms off.
        assert_eq!(sf.notifier().order_created(&order, 1).await, 1);

        let mut prefs = UserNotificationPreference::defaults_for("u1");
        prefs.order_notifications = false;
        sf.db().notifications().upsert_preferences(&prefs).await.unwrap();
        assert_eq!(sf.notifier().order_created(&order, 1).await, 0);
    }

    #[tokio::test]
    async fn test_whatsapp_uses_preference_number() {
        let sf = test_storefront().await;
        let mut prefs = UserNotificationPreference::defaults_for("u1");
        prefs.whatsapp_enabled = true;
        prefs.whatsapp_number = Some("+56 9 8765 4321".into());
        sf.db().notifications().upsert_preferences(&prefs).await.unwrap();

        let queued = sf
            .notifier()
            .enqueue(NotificationDraft {
                user_id: Some("u1".into()),
                notification_type: NotificationType::Promotion,
                channel: Channel::Whatsapp,
                subject: "Promo".into(),
                message: "2x1 en galletas rellenas".into(),
                recipient_email: None,
                recipient_phone: None,
                priority: QueuePriority::Low,
                extra_data: serde_json::json!({}),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.recipient_phone.as_deref(), Some("+56 9 8765 4321"));
    }

    #[tokio::test]
    async fn test_stock_alerts_go_to_every_admin_contact() {
        let mut config = StorefrontConfig::default();
        config.notifications.admin_emails = vec!["kati@dulcebias.cl".into(), "bodega@dulcebias.cl".into()];
        config.notifications.admin_phones = vec!["+56911112222".into()];
        let sf = crate::test_support::test_storefront_with(config).await;

        let low = vec![LowStock {
            product_id: "p1".into(),
            product_name: "Coco Sin Gluten".into(),
            stock: 2,
        }];
        assert_eq!(sf.notifier().stock_alerts(&low).await, 3);

        let due = sf.db().notifications().due(Utc::now(), 10).await.unwrap();
        let whatsapp = due
            .iter()
            .map(|(_, n)| n)
            .find(|n| n.channel == Channel::Whatsapp)
            .unwrap();
        assert_eq!(whatsapp.notification_type, NotificationType::StockAlert);
        assert!(whatsapp.message.ends_with("Revisa el inventario."));
    }

    #[tokio::test]
    async fn test_stock_alerts_without_admins_queue_nothing() {
        let sf = test_storefront().await;
        let low = vec![LowStock {
            product_id: "p1".into(),
            product_name: "Coco Sin Gluten".into(),
            stock: 0,
        }];
        assert_eq!(sf.notifier().stock_alerts(&low).await, 0);
    }

    #[test]
    fn test_template_context_flattens_scalars() {
        let draft = NotificationDraft {
            user_id: None,
            notification_type: NotificationType::OrderUpdate,
            channel: Channel::Email,
            subject: "s".into(),
            message: "m".into(),
            recipient_email: None,
            recipient_phone: None,
            priority: QueuePriority::Normal,
            extra_data: serde_json::json!({
                "order_number": "DB-20240309-0001",
                "total": 15000,
                "nested": { "skip": true },
            }),
        };
        let ctx = template_context(&draft);
        assert_eq!(ctx["order_number"], "DB-20240309-0001");
        assert_eq!(ctx["total"], "15000");
        assert_eq!(ctx["message"], "m");
        assert!(!ctx.contains_key("nested"));
    }
}
