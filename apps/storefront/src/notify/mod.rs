//! # Notifications
//!
//! Business events become queued notifications; a background worker
//! delivers them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  services ──► Notifier::dispatch(drafts)                               │
//! │                 │  drop channels the user's preferences disallow        │
//! │                 │  render the active template for (type, channel)       │
//! │                 ▼                                                       │
//! │        notifications (pending) + notification_queue                     │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │        QueueWorker (every poll_interval_secs)                           │
//! │                 │  ChannelSender for the notification's channel         │
//! │                 ├─ ok  → sent, log "sent", entry processed              │
//! │                 └─ err → failed, log "failed",                          │
//! │                          requeue after retry_delay while can_retry      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod dispatch;
pub mod sender;
pub mod worker;

pub use dispatch::Notifier;
pub use sender::{ChannelSender, Senders, SimulatedSender};
pub use worker::{QueueWorker, QueueWorkerHandle, WorkerStats};

use thiserror::Error;

use dulce_core::notification::Channel;
use dulce_db::DbError;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The notification has no address for its channel.
    #[error("No recipient for {channel} notification {id}")]
    MissingRecipient { channel: Channel, id: String },

    #[error("No sender registered for channel {0}")]
    NoSender(Channel),

    /// The provider refused or failed the send.
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Channel error: {0}")]
    ChannelError(String),
}
