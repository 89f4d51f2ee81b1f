//! # Notifications
//!
//! Notification rows, templates, per-user preferences, the delivery queue
//! entry, and the drafts raised by order, payment, support and stock events.
//!
//! ## Lifecycle
//! ```text
//!   pending ──send ok──► sent ──► delivered ──► read
//!      │                   └──────────────────► read
//!      └──send err──► failed ──(retry_count < max_retries)──► pending (requeued)
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::order::{Order, OrderStatus};
use crate::support::SupportTicket;
use crate::transfer::TransferStatus;

pub const DEFAULT_MAX_RETRIES: i64 = 3;

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OrderConfirmation,
    OrderUpdate,
    ShippingUpdate,
    StockAlert,
    Promotion,
    SupportTicket,
    PaymentSuccess,
    PaymentFailed,
    Welcome,
    PasswordReset,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::OrderConfirmation => "order_confirmation",
            NotificationType::OrderUpdate => "order_update",
            NotificationType::ShippingUpdate => "shipping_update",
            NotificationType::StockAlert => "stock_alert",
            NotificationType::Promotion => "promotion",
            NotificationType::SupportTicket => "support_ticket",
            NotificationType::PaymentSuccess => "payment_success",
            NotificationType::PaymentFailed => "payment_failed",
            NotificationType::Welcome => "welcome",
            NotificationType::PasswordReset => "password_reset",
        }
    }

    /// Preference category governing this type. `None` is always sent.
    pub fn category(&self) -> Option<PreferenceCategory> {
        match self {
            NotificationType::OrderConfirmation
            | NotificationType::OrderUpdate
            | NotificationType::PaymentSuccess
            | NotificationType::PaymentFailed => Some(PreferenceCategory::Orders),
            NotificationType::ShippingUpdate => Some(PreferenceCategory::Shipping),
            NotificationType::Promotion => Some(PreferenceCategory::Promotions),
            NotificationType::SupportTicket => Some(PreferenceCategory::Support),
            NotificationType::StockAlert => Some(PreferenceCategory::StockAlerts),
            NotificationType::Welcome | NotificationType::PasswordReset => None,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Email, Channel::Sms, Channel::Whatsapp, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Failed,
    Read,
}

// =============================================================================
// Notification
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Notification {
    pub id: String,
    /// `None` for guests and configured admin contacts.
    pub user_id: Option<String>,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub subject: String,
    pub message: String,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub status: NotificationStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub sent_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub read_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    /// JSON object.
    pub extra_data: String,
}

impl Notification {
    pub fn mark_sent(&mut self, external_id: Option<String>, now: DateTime<Utc>) {
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(now);
        self.external_id = external_id;
        self.error_message = None;
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Delivered;
        self.delivered_at = Some(now);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = NotificationStatus::Failed;
        self.error_message = Some(error.into());
        self.retry_count += 1;
    }

    /// Idempotent: a second call keeps the first `read_at`.
    pub fn mark_read(&mut self, now: DateTime<Utc>) {
        if self.status != NotificationStatus::Read {
            self.status = NotificationStatus::Read;
            self.read_at = Some(now);
        }
    }

    pub fn can_retry(&self) -> bool {
        self.status == NotificationStatus::Failed && self.retry_count < self.max_retries
    }

    /// Recipient address for this channel, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self.channel {
            Channel::Email => self.recipient_email.as_deref(),
            Channel::Sms | Channel::Whatsapp => self.recipient_phone.as_deref(),
            Channel::Push => self.user_id.as_deref(),
        }
        .filter(|r| !r.trim().is_empty())
    }
}

/// A notification about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub user_id: Option<String>,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub subject: String,
    pub message: String,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub priority: QueuePriority,
    pub extra_data: serde_json::Value,
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct NotificationTemplate {
    pub id: String,
    pub name: String,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub subject_template: String,
    pub body_template: String,
    pub is_active: bool,
}

impl NotificationTemplate {
    /// Rendered `(subject, body)`.
    pub fn render(&self, context: &HashMap<String, String>) -> (String, String) {
        (
            render_template(&self.subject_template, context),
            render_template(&self.body_template, context),
        )
    }
}

/// Substitutes `{name}` placeholders. Unknown placeholders stay as written.
///
/// ```rust
/// use std::collections::HashMap;
/// use dulce_core::notification::render_template;
///
/// let ctx = HashMap::from([("name".to_string(), "Kati".to_string())]);
/// assert_eq!(render_template("Hola {name}, {unknown}", &ctx), "Hola Kati, {unknown}");
/// ```
pub fn render_template(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match context.get(key.trim()) {
                    Some(value) if is_placeholder(key) => out.push_str(value),
                    _ => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_')
}

// =============================================================================
// Preferences
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceCategory {
    Orders,
    Shipping,
    Promotions,
    Support,
    StockAlerts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct UserNotificationPreference {
    pub user_id: String,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub whatsapp_enabled: bool,
    pub push_enabled: bool,
    pub order_notifications: bool,
    pub shipping_notifications: bool,
    pub promotional_notifications: bool,
    pub support_notifications: bool,
    pub stock_alert_notifications: bool,
    pub phone_number: Option<String>,
    pub whatsapp_number: Option<String>,
}

impl UserNotificationPreference {
    /// Preferences for a user without a stored row.
    pub fn defaults_for(user_id: impl Into<String>) -> Self {
        UserNotificationPreference {
            user_id: user_id.into(),
            email_enabled: true,
            sms_enabled: false,
            whatsapp_enabled: false,
            push_enabled: true,
            order_notifications: true,
            shipping_notifications: true,
            promotional_notifications: true,
            support_notifications: true,
            stock_alert_notifications: true,
            phone_number: None,
            whatsapp_number: None,
        }
    }

    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::Whatsapp => self.whatsapp_enabled,
            Channel::Push => self.push_enabled,
        }
    }

    pub fn category_enabled(&self, category: PreferenceCategory) -> bool {
        match category {
            PreferenceCategory::Orders => self.order_notifications,
            PreferenceCategory::Shipping => self.shipping_notifications,
            PreferenceCategory::Promotions => self.promotional_notifications,
            PreferenceCategory::Support => self.support_notifications,
            PreferenceCategory::StockAlerts => self.stock_alert_notifications,
        }
    }

    /// Whether a notification of `kind` may go out on `channel`.
    pub fn allows(&self, kind: NotificationType, channel: Channel) -> bool {
        self.channel_enabled(channel)
            && kind.category().map_or(true, |c| self.category_enabled(c))
    }

    /// Phone to use for `channel`, falling back to `fallback`.
    pub fn phone_for(&self, channel: Channel, fallback: Option<&str>) -> Option<String> {
        let own = match channel {
            Channel::Whatsapp => self.whatsapp_number.as_deref().or(self.phone_number.as_deref()),
            _ => self.phone_number.as_deref(),
        };
        own.or(fallback)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}

// =============================================================================
// Log and Queue
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct NotificationLog {
    pub id: String,
    pub notification_id: String,
    pub action: String,
    pub details: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

/// Lower value is processed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    High,
    #[default]
    Normal,
    Low,
}

impl QueuePriority {
    pub fn value(&self) -> i64 {
        match self {
            QueuePriority::High => 1,
            QueuePriority::Normal => 5,
            QueuePriority::Low => 10,
        }
    }

    pub fn from_value(value: i64) -> Self {
        match value {
            v if v <= 1 => QueuePriority::High,
            v if v >= 10 => QueuePriority::Low,
            _ => QueuePriority::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct QueueEntry {
    pub id: String,
    pub notification_id: String,
    pub priority: i64,
    #[ts(as = "String")]
    pub scheduled_at: DateTime<Utc>,
    pub processed: bool,
    #[ts(as = "Option<String>")]
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i64,
}

// =============================================================================
// Event Drafts
// =============================================================================

fn order_extra(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "order_id": order.id,
        "order_number": order.order_number,
        "total": order.total,
    })
}

/// Confirmation email, plus SMS when the order has a phone.
///
/// The caller drops channels the user's preferences disallow.
pub fn order_created(order: &Order, item_count: usize) -> Vec<NotificationDraft> {
    let subject = format!("Confirmación de Pedido #{}", order.order_number);
    let message = format!(
        "Hola {}, tu pedido #{} ha sido recibido. Total: {}",
        order.first_name,
        order.order_number,
        Money::from_pesos(order.total)
    );
    let mut extra = order_extra(order);
    extra["items_count"] = serde_json::json!(item_count);

    let mut drafts = vec![NotificationDraft {
        user_id: order.user_id.clone(),
        notification_type: NotificationType::OrderConfirmation,
        channel: Channel::Email,
        subject: subject.clone(),
        message: message.clone(),
        recipient_email: Some(order.email.clone()),
        recipient_phone: None,
        priority: QueuePriority::High,
        extra_data: extra.clone(),
    }];
    if !order.phone.trim().is_empty() {
        drafts.push(NotificationDraft {
            user_id: order.user_id.clone(),
            notification_type: NotificationType::OrderConfirmation,
            channel: Channel::Sms,
            subject,
            message,
            recipient_email: None,
            recipient_phone: Some(order.phone.clone()),
            priority: QueuePriority::High,
            extra_data: extra,
        });
    }
    drafts
}

/// Email about a status change. Shipping gets its own type and carries the
/// tracking number.
pub fn order_status_changed(order: &Order, previous: OrderStatus) -> NotificationDraft {
    let (kind, message) = match (order.status, order.tracking_number.as_deref()) {
        (OrderStatus::Shipped, Some(tracking)) => (
            NotificationType::ShippingUpdate,
            format!(
                "Tu pedido #{} fue enviado. Código de seguimiento: {}",
                order.order_number, tracking
            ),
        ),
        (OrderStatus::Shipped, None) => (
            NotificationType::ShippingUpdate,
            format!("Tu pedido #{} fue enviado.", order.order_number),
        ),
        (status, _) => (
            NotificationType::OrderUpdate,
            format!(
                "Tu pedido #{} ha cambiado a: {}",
                order.order_number,
                status.label()
            ),
        ),
    };
    let mut extra = order_extra(order);
    extra["previous_status"] = serde_json::json!(previous.as_str());
    extra["new_status"] = serde_json::json!(order.status.as_str());

    NotificationDraft {
        user_id: order.user_id.clone(),
        notification_type: kind,
        channel: Channel::Email,
        subject: format!("Actualización de Pedido #{}", order.order_number),
        message,
        recipient_email: Some(order.email.clone()),
        recipient_phone: None,
        priority: QueuePriority::Normal,
        extra_data: extra,
    }
}

/// Customer notice after a transfer is approved or rejected.
pub fn transfer_decided(order: &Order, status: TransferStatus) -> Option<NotificationDraft> {
    let (kind, subject, message) = match status {
        TransferStatus::Approved => (
            NotificationType::PaymentSuccess,
            format!("Pago confirmado - Pedido #{}", order.order_number),
            format!(
                "Hemos verificado tu transferencia de {}. Tu pedido #{} está confirmado.",
                Money::from_pesos(order.total),
                order.order_number
            ),
        ),
        TransferStatus::Rejected => (
            NotificationType::PaymentFailed,
            format!("Problema con tu pago - Pedido #{}", order.order_number),
            format!(
                "No pudimos verificar la transferencia del pedido #{}. Revisa los datos o contáctanos.",
                order.order_number
            ),
        ),
        _ => return None,
    };
    Some(NotificationDraft {
        user_id: order.user_id.clone(),
        notification_type: kind,
        channel: Channel::Email,
        subject,
        message,
        recipient_email: Some(order.email.clone()),
        recipient_phone: None,
        priority: QueuePriority::High,
        extra_data: order_extra(order),
    })
}

fn ticket_extra(ticket: &SupportTicket) -> serde_json::Value {
    serde_json::json!({
        "ticket_id": ticket.id,
        "ticket_number": ticket.ticket_number,
        "status": ticket.status.as_str(),
    })
}

pub fn ticket_created(ticket: &SupportTicket, email: Option<&str>) -> NotificationDraft {
    NotificationDraft {
        user_id: Some(ticket.user_id.clone()),
        notification_type: NotificationType::SupportTicket,
        channel: Channel::Email,
        subject: format!("Ticket de Soporte #{} Creado", ticket.ticket_number),
        message: format!(
            "Hemos recibido tu ticket \"{}\". Te contactaremos pronto.",
            ticket.subject
        ),
        recipient_email: email.map(str::to_string),
        recipient_phone: None,
        priority: QueuePriority::Normal,
        extra_data: ticket_extra(ticket),
    }
}

/// Staff replied or changed the ticket status.
pub fn ticket_updated(ticket: &SupportTicket, email: Option<&str>, reply: Option<&str>) -> NotificationDraft {
    let message = match reply {
        Some(text) => format!(
            "Nuestro equipo respondió a tu ticket #{}:\n\n{}",
            ticket.ticket_number, text
        ),
        None => format!(
            "Tu ticket #{} ha sido actualizado: {}",
            ticket.ticket_number,
            ticket.status.label()
        ),
    };
    NotificationDraft {
        user_id: Some(ticket.user_id.clone()),
        notification_type: NotificationType::SupportTicket,
        channel: Channel::Email,
        subject: format!("Actualización Ticket #{}", ticket.ticket_number),
        message,
        recipient_email: email.map(str::to_string),
        recipient_phone: None,
        priority: QueuePriority::Normal,
        extra_data: ticket_extra(ticket),
    }
}

/// Admin alert for a product at or below the critical level, by email to
/// every admin address and WhatsApp to every admin phone.
pub fn stock_alert(
    product_id: &str,
    product_name: &str,
    stock: i64,
    admin_emails: &[String],
    admin_phones: &[String],
) -> Vec<NotificationDraft> {
    let subject = format!("Stock Crítico: {}", product_name);
    let message = format!(
        "ALERTA: El producto \"{}\" tiene solo {} unidades en stock.",
        product_name, stock
    );
    let extra = serde_json::json!({
        "product_id": product_id,
        "product_name": product_name,
        "current_stock": stock,
    });

    let email = admin_emails.iter().map(|addr| NotificationDraft {
        user_id: None,
        notification_type: NotificationType::StockAlert,
        channel: Channel::Email,
        subject: subject.clone(),
        message: message.clone(),
        recipient_email: Some(addr.clone()),
        recipient_phone: None,
        priority: QueuePriority::High,
        extra_data: extra.clone(),
    });
    let whatsapp = admin_phones.iter().map(|phone| NotificationDraft {
        user_id: None,
        notification_type: NotificationType::StockAlert,
        channel: Channel::Whatsapp,
        subject: subject.clone(),
        message: message.clone(),
        recipient_email: None,
        recipient_phone: Some(phone.clone()),
        priority: QueuePriority::High,
        extra_data: extra.clone(),
    });
    email.chain(whatsapp).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::order;
    use crate::order::PaymentStatus;

    fn notification(channel: Channel) -> Notification {
        Notification {
            id: "n1".into(),
            user_id: Some("u1".into()),
            notification_type: NotificationType::OrderUpdate,
            channel,
            subject: "s".into(),
            message: "m".into(),
            recipient_email: Some("kati@example.cl".into()),
            recipient_phone: None,
            status: NotificationStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            external_id: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            extra_data: "{}".into(),
        }
    }

    #[test]
    fn test_retry_rules() {
        let mut n = notification(Channel::Email);
        assert!(!n.can_retry());
        for _ in 0..2 {
            n.mark_failed("smtp down");
            assert!(n.can_retry());
        }
        n.mark_failed("smtp down");
        assert_eq!(n.retry_count, 3);
        assert!(!n.can_retry());
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut n = notification(Channel::Push);
        let first = Utc::now();
        n.mark_read(first);
        n.mark_read(first + chrono::Duration::minutes(5));
        assert_eq!(n.read_at, Some(first));
    }

    #[test]
    fn test_recipient_per_channel() {
        assert_eq!(notification(Channel::Email).recipient(), Some("kati@example.cl"));
        assert_eq!(notification(Channel::Sms).recipient(), None);
    }

    #[test]
    fn test_render_template() {
        let ctx = HashMap::from([
            ("order_number".to_string(), "DB-20240309-0001".to_string()),
            ("name".to_string(), "Kati".to_string()),
        ]);
        assert_eq!(
            render_template("Hola {name}, pedido {order_number} {missing} {", &ctx),
            "Hola Kati, pedido DB-20240309-0001 {missing} {"
        );
        assert_eq!(render_template("{}", &ctx), "{}");
    }

    #[test]
    fn test_default_preferences() {
        let p = UserNotificationPreference::defaults_for("u1");
        assert!(p.allows(NotificationType::OrderConfirmation, Channel::Email));
        assert!(!p.allows(NotificationType::OrderConfirmation, Channel::Sms));
        assert!(!p.allows(NotificationType::Promotion, Channel::Whatsapp));
        assert!(p.allows(NotificationType::Welcome, Channel::Push));
    }

    #[test]
    fn test_category_opt_out() {
        let mut p = UserNotificationPreference::defaults_for("u1");
        p.promotional_notifications = false;
        assert!(!p.allows(NotificationType::Promotion, Channel::Email));
        assert!(p.allows(NotificationType::OrderUpdate, Channel::Email));
    }

    #[test]
    fn test_priority_values() {
        assert_eq!(QueuePriority::High.value(), 1);
        assert_eq!(QueuePriority::from_value(5), QueuePriority::Normal);
        assert!(QueuePriority::High < QueuePriority::Low);
    }

    #[test]
    fn test_order_created_drafts() {
        let o = order(OrderStatus::Pending, PaymentStatus::Pending);
        let drafts = order_created(&o, 2);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].channel, Channel::Email);
        assert_eq!(drafts[1].channel, Channel::Sms);
        assert!(drafts[0].message.contains("$15.000"));
        assert_eq!(drafts[0].extra_data["items_count"], 2);
    }

    #[test]
    fn test_shipping_update_carries_tracking() {
        let mut o = order(OrderStatus::Shipped, PaymentStatus::Paid);
        o.tracking_number = Some("CX123".into());
        let d = order_status_changed(&o, OrderStatus::Processing);
        assert_eq!(d.notification_type, NotificationType::ShippingUpdate);
        assert!(d.message.contains("CX123"));
    }

    #[test]
    fn test_transfer_notices() {
        let o = order(OrderStatus::Confirmed, PaymentStatus::Paid);
        assert!(transfer_decided(&o, TransferStatus::Verified).is_none());
        let d = transfer_decided(&o, TransferStatus::Rejected).unwrap();
        assert_eq!(d.notification_type, NotificationType::PaymentFailed);
    }

    #[test]
    fn test_stock_alert_fans_out() {
        let drafts = stock_alert(
            "p1",
            "Galleta Avena",
            3,
            &["admin@dulcebias.cl".to_string()],
            &["+56911111111".to_string(), "+56922222222".to_string()],
        );
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts.iter().filter(|d| d.channel == Channel::Whatsapp).count(), 2);
    }
}
