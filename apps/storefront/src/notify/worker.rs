//! # Notification Queue Worker
//!
//! Delivers queued notifications in the background.
//!
//! ## Processing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Queue Worker Flow                                    │
//! │                                                                         │
//! │  1. Poll: due(now, batch_size)                                         │
//! │           processed = 0 AND scheduled_at <= now                        │
//! │           ORDER BY priority, scheduled_at                              │
//! │                                                                         │
//! │  2. Send: Senders[channel].send(notification)                          │
//! │                                                                         │
//! │  3a. Ok:   status = sent, external_id stored, log "sent",              │
//! │            entry processed                                              │
//! │                                                                         │
//! │  3b. Err:  status = failed, retry_count += 1, log "failed"             │
//! │            can_retry → entry rescheduled at now + retry_delay          │
//! │            otherwise → entry processed, notification stays failed      │
//! │                                                                         │
//! │  TIMING:                                                               │
//! │  • Poll interval: 5 seconds (configurable)                             │
//! │  • Batch size: 50 entries (configurable)                               │
//! │  • Retry delay: 300 seconds (configurable), max_retries = 3            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use dulce_core::notification::{Notification, NotificationStatus, QueueEntry};
use dulce_db::Database;

use super::{NotifyError, NotifyResult, Senders};
use crate::config::StorefrontConfig;

/// Counts from one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub sent: usize,
    /// Failed but rescheduled.
    pub retried: usize,
    /// Failed with no retries left.
    pub failed: usize,
}

pub struct QueueWorker {
    db: Database,
    config: Arc<StorefrontConfig>,
    senders: Senders,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the worker.
#[derive(Clone)]
pub struct QueueWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl QueueWorkerHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> NotifyResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| NotifyError::ChannelError("Shutdown channel closed".into()))
    }
}

impl QueueWorker {
    pub fn new(
        db: Database,
        config: Arc<StorefrontConfig>,
        senders: Senders,
    ) -> (Self, QueueWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = QueueWorker {
            db,
            config,
            senders,
            shutdown_rx,
        };
        (worker, QueueWorkerHandle { shutdown_tx })
    }

    /// Runs the worker loop until shutdown.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.config.notifications.poll_interval_secs,
            batch_size = self.config.notifications.batch_size,
            "Notification worker starting"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.process_due(Utc::now()).await {
                        error!(?e, "Failed to process notification queue");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Notification worker shutting down");
                    break;
                }
            }
        }

        info!("Notification worker stopped");
    }

    /// Handles every entry due at `now`, up to the batch size.
    pub async fn process_due(&self, now: DateTime<Utc>) -> NotifyResult<WorkerStats> {
        let limit = self.config.notifications.batch_size as i64;
        let due = self.db.notifications().due(now, limit).await?;
        let mut stats = WorkerStats::default();

        if due.is_empty() {
            debug!("No due notifications");
            return Ok(stats);
        }
        debug!(count = due.len(), "Processing notification batch");

        for (entry, notification) in due {
            if let Err(e) = self.deliver(&entry, notification, now, &mut stats).await {
                error!(?e, entry_id = %entry.id, "Failed to record notification attempt");
            }
        }

        if stats != WorkerStats::default() {
            info!(
                sent = stats.sent,
                retried = stats.retried,
                failed = stats.failed,
                "Notification batch processed"
            );
        }
        Ok(stats)
    }

    async fn deliver(
        &self,
        entry: &QueueEntry,
        mut notification: Notification,
        now: DateTime<Utc>,
        stats: &mut WorkerStats,
    ) -> NotifyResult<()> {
        let repo = self.db.notifications();

        // Read or sent by an earlier attempt.
        if !matches!(
            notification.status,
            NotificationStatus::Pending | NotificationStatus::Failed
        ) {
            repo.mark_processed(&entry.id, now).await?;
            return Ok(());
        }

        let result = match self.senders.get(notification.channel) {
            Ok(sender) => sender.send(&notification).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(external_id) => {
                notification.mark_sent(Some(external_id.clone()), now);
                repo.save(&notification).await?;
                repo.log(&notification.id, "sent", &format!("external_id={}", external_id))
                    .await?;
                repo.mark_processed(&entry.id, now).await?;
                stats.sent += 1;
            }
            Err(send_error) => {
                notification.mark_failed(send_error.to_string());
                repo.save(&notification).await?;
                repo.log(&notification.id, "failed", &send_error.to_string())
                    .await?;

                if notification.can_retry() {
                    let at = now + self.config.retry_delay();
                    repo.requeue(&entry.id, at).await?;
                    debug!(
                        id = %notification.id,
                        retry_count = notification.retry_count,
                        %at,
                        "Notification rescheduled"
                    );
                    stats.retried += 1;
                } else {
                    repo.mark_processed(&entry.id, now).await?;
                    warn!(
                        id = %notification.id,
                        channel = %notification.channel,
                        error = %send_error,
                        "Notification failed with no retries left"
                    );
                    stats.failed += 1;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
