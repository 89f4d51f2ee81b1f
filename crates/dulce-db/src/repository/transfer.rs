//! # Transfer Repository
//!
//! Buyer transfer claims and the staff decisions on them. A decision and
//! its effect on the order (payment status, pending → confirmed) commit
//! together.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::order::{self, insert_history, transition_in, StatusChange};
use dulce_core::order::{Actor, Order};
use dulce_core::stock::OversellPolicy;
use dulce_core::transfer::{
    BankAccount, OrderPaymentEffect, TransferClaim, TransferDecision, TransferPayment,
    TransferStatus,
};
use dulce_core::validation::validate_required;
use dulce_core::CoreError;

/// A decided transfer and what it did to the order.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub transfer: TransferPayment,
    pub order: Order,
    pub effect: OrderPaymentEffect,
    pub status_change: Option<StatusChange>,
}

#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Bank Accounts
    // -------------------------------------------------------------------------

    pub async fn list_active_accounts(&self) -> DbResult<Vec<BankAccount>> {
        let rows = sqlx::query_as::<_, BankAccount>(
            "SELECT * FROM bank_accounts WHERE is_active = 1 ORDER BY bank_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_account(&self, account: &BankAccount) -> DbResult<()> {
        validate_required("bank_name", &account.bank_name, 100)?;
        validate_required("account_number", &account.account_number, 50)?;
        validate_required("account_holder", &account.account_holder, 200)?;

        sqlx::query(
            r#"
            INSERT INTO bank_accounts (id, bank_name, account_type, account_number, account_holder, rut, email, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.bank_name)
        .bind(account.account_type)
        .bind(&account.account_number)
        .bind(&account.account_holder)
        .bind(&account.rut)
        .bind(&account.email)
        .bind(account.is_active)
        .execute(&self.pool)
        .await?;

        info!(bank = %account.bank_name, "Bank account added");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Claims
    // -------------------------------------------------------------------------

    /// Records a buyer's transfer claim. One claim per order; an amount
    /// that differs from the order total is kept with a verification note.
    pub async fn submit(
        &self,
        order_id: &str,
        claim: &TransferClaim,
        actor: &Actor,
    ) -> DbResult<TransferPayment> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let order = order::get_in(&mut tx, order_id).await?;

        // Other customers' orders look missing.
        if !actor.is_staff && order.user_id != actor.user_id {
            return Err(CoreError::OrderNotFound(order_id.to_string()).into());
        }

        let note = claim.check_against(&order)?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM transfer_payments WHERE order_id = ?")
                .bind(&order.id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(CoreError::TransferAlreadySubmitted {
                order_number: order.order_number.clone(),
            }
            .into());
        }

        let transfer = TransferPayment {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            amount: claim.amount,
            transfer_date: claim.transfer_date,
            reference_number: claim.reference_number.trim().to_string(),
            sender_name: claim.sender_name.trim().to_string(),
            sender_rut: claim.sender_rut.clone(),
            sender_bank: claim.sender_bank.clone(),
            status: TransferStatus::Pending,
            verification_notes: note,
            verified_by: None,
            verified_at: None,
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO transfer_payments (
                id, order_id, amount, transfer_date, reference_number, sender_name,
                sender_rut, sender_bank, status, verification_notes, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&transfer.id)
        .bind(&transfer.order_id)
        .bind(transfer.amount)
        .bind(transfer.transfer_date)
        .bind(&transfer.reference_number)
        .bind(&transfer.sender_name)
        .bind(&transfer.sender_rut)
        .bind(&transfer.sender_bank)
        .bind(transfer.status)
        .bind(&transfer.verification_notes)
        .bind(transfer.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::Core(CoreError::TransferAlreadySubmitted {
                order_number: order.order_number.clone(),
            }),
            other => other,
        })?;

        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            amount = transfer.amount,
            mismatch = transfer.verification_notes.is_some(),
            "Transfer submitted"
        );
        Ok(transfer)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<TransferPayment>> {
        let row = sqlx::query_as::<_, TransferPayment>("SELECT * FROM transfer_payments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_for_order(&self, order_id: &str) -> DbResult<Option<TransferPayment>> {
        let row = sqlx::query_as::<_, TransferPayment>(
            "SELECT * FROM transfer_payments WHERE order_id = ?",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Claims still waiting on staff, oldest first.
    pub async fn list_open(&self) -> DbResult<Vec<TransferPayment>> {
        let rows = sqlx::query_as::<_, TransferPayment>(
            "SELECT * FROM transfer_payments WHERE status IN ('pending', 'verified') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------------

    /// Applies a staff decision and its order effect in one transaction.
    pub async fn decide(
        &self,
        transfer_id: &str,
        decision: TransferDecision,
        notes: Option<String>,
        actor: &Actor,
    ) -> DbResult<TransferOutcome> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        let mut transfer = sqlx::query_as::<_, TransferPayment>(
            "SELECT * FROM transfer_payments WHERE id = ?",
        )
        .bind(transfer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found("TransferPayment", transfer_id))?;

        let target = decision.target();
        transfer.status.ensure_transition(target)?;

        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        transfer.verification_notes = match (transfer.verification_notes.take(), notes) {
            (Some(old), Some(new)) => Some(format!("{}\n{}", old, new)),
            (old, new) => new.or(old),
        };
        transfer.status = target;
        transfer.verified_by = Some(actor.label());
        transfer.verified_at = Some(now);

        sqlx::query(
            r#"
            UPDATE transfer_payments
            SET status = ?, verification_notes = ?, verified_by = ?, verified_at = ?
            WHERE id = ?
            "#,
        )
        .bind(transfer.status)
        .bind(&transfer.verification_notes)
        .bind(&transfer.verified_by)
        .bind(transfer.verified_at)
        .bind(&transfer.id)
        .execute(&mut *tx)
        .await?;

        let mut order = order::get_in(&mut tx, &transfer.order_id).await?;
        let effect = OrderPaymentEffect::of(target, order.status);
        let note = format!("Transfer {}", target);

        if let Some(payment_status) = effect.payment_status {
            sqlx::query("UPDATE orders SET payment_status = ?, updated_at = ? WHERE id = ?")
                .bind(payment_status)
                .bind(now)
                .bind(&order.id)
                .execute(&mut *tx)
                .await?;
            order.payment_status = payment_status;
            order.updated_at = now;
        }

        let status_change = match effect.status {
            Some(new_status) => {
                let change = transition_in(
                    &mut tx,
                    &order,
                    new_status,
                    None,
                    Some(&note),
                    actor,
                    OversellPolicy::default(),
                    now,
                )
                .await?;
                order = change.order.clone();
                Some(change)
            }
            None => {
                if effect.payment_status.is_some() {
                    insert_history(&mut tx, &order.id, order.status, Some(&note), &actor.label(), now)
                        .await?;
                }
                None
            }
        };

        tx.commit().await?;

        debug!(transfer_id = %transfer.id, "Transfer row updated");
        info!(
            order_number = %order.order_number,
            status = %target,
            payment_status = %order.payment_status,
            "Transfer decided"
        );

        Ok(TransferOutcome {
            transfer,
            order,
            effect,
            status_change,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
