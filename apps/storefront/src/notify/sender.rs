//! # Channel Senders
//!
//! One sender per channel. Provider integrations (SMTP, SMS gateways,
//! WhatsApp Business, push services) plug in behind [`ChannelSender`]; the
//! shipped [`SimulatedSender`] only logs the message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use dulce_core::notification::{Channel, Notification};

use super::{NotifyError, NotifyResult};

/// Delivers a notification over one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Sends the notification and returns the provider's message id.
    async fn send(&self, notification: &Notification) -> NotifyResult<String>;
}

/// Logs instead of sending.
///
/// Email needs a recipient email, SMS and WhatsApp a phone, push a user.
/// A missing recipient fails the attempt like a provider would.
#[derive(Debug, Clone)]
pub struct SimulatedSender {
    channel: Channel,
    from_email: String,
}

impl SimulatedSender {
    pub fn new(channel: Channel, from_email: impl Into<String>) -> Self {
        SimulatedSender {
            channel,
            from_email: from_email.into(),
        }
    }
}

#[async_trait]
impl ChannelSender for SimulatedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, notification: &Notification) -> NotifyResult<String> {
        let recipient = notification
            .recipient()
            .ok_or_else(|| NotifyError::MissingRecipient {
                channel: notification.channel,
                id: notification.id.clone(),
            })?;

        let external_id = format!("sim-{}-{}", self.channel, Uuid::new_v4().simple());
        info!(
            channel = %self.channel,
            from = %self.from_email,
            to = %recipient,
            subject = %notification.subject,
            external_id = %external_id,
            "Simulated notification send"
        );
        Ok(external_id)
    }
}

/// Senders by channel.
#[derive(Clone, Default)]
pub struct Senders {
    by_channel: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl Senders {
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulated sender on every channel.
    pub fn simulated(from_email: &str) -> Self {
        Channel::ALL
            .into_iter()
            .fold(Senders::new(), |senders, channel| {
                senders.with(Arc::new(SimulatedSender::new(channel, from_email)))
            })
    }

    /// Registers `sender` for its channel, replacing any previous one.
    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.by_channel.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: Channel) -> NotifyResult<&Arc<dyn ChannelSender>> {
        self.by_channel.get(&channel).ok_or(NotifyError::NoSender(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dulce_core::notification::{NotificationStatus, NotificationType, DEFAULT_MAX_RETRIES};

    fn notification(channel: Channel, email: Option<&str>, phone: Option<&str>) -> Notification {
        Notification {
            id: "n1".into(),
            user_id: None,
            notification_type: NotificationType::OrderConfirmation,
            channel,
            subject: "Confirmación de Pedido #DB-20240309-0001".into(),
            message: "Tu pedido ha sido recibido".into(),
            recipient_email: email.map(str::to_string),
            recipient_phone: phone.map(str::to_string),
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

    #[tokio::test]
    async fn test_simulated_email_returns_external_id() {
        let sender = SimulatedSender::new(Channel::Email, "noreply@dulcebias.cl");
        let id = sender
            .send(&notification(Channel::Email, Some("kati@example.cl"), None))
            .await
            .unwrap();
        assert!(id.starts_with("sim-email-"));
    }

    #[tokio::test]
    async fn test_missing_recipient_fails() {
        let sms = SimulatedSender::new(Channel::Sms, "noreply@dulcebias.cl");
        let err = sms
            .send(&notification(Channel::Sms, Some("kati@example.cl"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::MissingRecipient { channel: Channel::Sms, .. }));

        let email = SimulatedSender::new(Channel::Email, "noreply@dulcebias.cl");
        assert!(email
            .send(&notification(Channel::Email, Some("   "), None))
            .await
            .is_err());
    }

    #[test]
    fn test_simulated_set_covers_every_channel() {
        let senders = Senders::simulated("noreply@dulcebias.cl");
        for channel in Channel::ALL {
            assert_eq!(senders.get(channel).unwrap().channel(), channel);
        }
        assert!(matches!(
            Senders::new().get(Channel::Push),
            Err(NotifyError::NoSender(Channel::Push))
        ));
    }
}
