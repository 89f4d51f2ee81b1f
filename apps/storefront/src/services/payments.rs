//! # Bank Transfer Payments
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Transfer State Machine                               │
//! │                                                                         │
//! │   buyer submits ──► PENDING ──verify──► VERIFIED ──approve──► APPROVED │
//! │                        │                    │                 (paid,    │
//! │                        │                    │                 pending → │
//! │                        │                    │                 confirmed)│
//! │                        ├──reject────────────┴──reject──► REJECTED      │
//! │                        │                                 (failed)       │
//! │                        └──expire────────────┬─────────► EXPIRED        │
//! │                                   VERIFIED ─┘            (no change)    │
//! │                                                                         │
//! │  APPROVED and REJECTED email the customer.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use dulce_core::order::Actor;
use dulce_core::transfer::{BankAccount, TransferClaim, TransferDecision, TransferPayment};
use dulce_db::{Database, TransferOutcome};

use super::require_staff;
use crate::config::StorefrontConfig;
use crate::error::{ApiError, ApiResult};
use crate::notify::Notifier;

pub struct PaymentService {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl PaymentService {
    pub fn new(db: Database, config: Arc<StorefrontConfig>) -> Self {
        PaymentService { db, config }
    }

    /// Accounts shown to buyers paying by transfer.
    pub async fn bank_accounts(&self) -> ApiResult<Vec<BankAccount>> {
        Ok(self.db.transfers().list_active_accounts().await?)
    }

    pub async fn add_bank_account(&self, account: &BankAccount, actor: &Actor) -> ApiResult<()> {
        require_staff(actor)?;
        Ok(self.db.transfers().insert_account(account).await?)
    }

    /// Records the buyer's transfer for an order. A differing amount is
    /// accepted and noted for the verifier.
    pub async fn submit(
        &self,
        order_id: &str,
        claim: &TransferClaim,
        actor: &Actor,
    ) -> ApiResult<TransferPayment> {
        Ok(self.db.transfers().submit(order_id, claim, actor).await?)
    }

    pub async fn for_order(&self, order_id: &str, actor: &Actor) -> ApiResult<TransferPayment> {
        let order = self
            .db
            .orders()
            .get(order_id)
            .await?
            .filter(|o| actor.is_staff || (o.user_id.is_some() && o.user_id == actor.user_id))
            .ok_or_else(|| ApiError::not_found("Order", order_id))?;

        self.db
            .transfers()
            .get_for_order(&order.id)
            .await?
            .ok_or_else(|| ApiError::not_found("TransferPayment", order_id))
    }

    /// Transfers waiting for a decision, oldest first.
    pub async fn open_transfers(&self, actor: &Actor) -> ApiResult<Vec<TransferPayment>> {
        require_staff(actor)?;
        Ok(self.db.transfers().list_open().await?)
    }

    pub async fn decide(
        &self,
        transfer_id: &str,
        decision: TransferDecision,
        notes: Option<String>,
        actor: &Actor,
    ) -> ApiResult<TransferOutcome> {
        require_staff(actor)?;
        let outcome = self
            .db
            .transfers()
            .decide(transfer_id, decision, notes, actor)
            .await?;

        // The payment email also covers a pending → confirmed move.
        if outcome.effect.notify {
            Notifier::new(self.db.clone(), self.config.clone())
                .transfer_decided(&outcome.order, outcome.transfer.status)
                .await;
        }
        Ok(outcome)
    }
}
