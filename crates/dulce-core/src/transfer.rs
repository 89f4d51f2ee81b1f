//! # Bank Transfer Payments
//!
//! Buyers paying by transfer submit a claim that staff check against the
//! bank statement.
//!
//! ```text
//!              ┌──────────┐
//!   submit ──► │ pending  │──────────────┬──────────────┐
//!              └────┬─────┘              │              │
//!                   │ verify             │ reject       │ expire
//!                   ▼                    ▼              ▼
//!              ┌──────────┐  reject ┌──────────┐   ┌─────────┐
//!              │ verified │────────►│ rejected │   │ expired │
//!              └────┬─────┘         └──────────┘   └─────────┘
//!                   │ approve            ▲               ▲
//!                   ▼                    │               │
//!              ┌──────────┐              │   expire      │
//!              │ approved │       verified ──────────────┘
//!              └──────────┘
//! ```
//!
//! Only `approved` marks the order paid.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::order::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::validation::{validate_payment_amount, validate_required};

// =============================================================================
// Bank Accounts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    /// Cuenta Vista.
    Vista,
}

impl AccountType {
    pub fn label(&self) -> &'static str {
        match self {
            AccountType::Checking => "Cuenta Corriente",
            AccountType::Savings => "Cuenta de Ahorro",
            AccountType::Vista => "Cuenta Vista",
        }
    }
}

/// Shop account shown to buyers who pay by transfer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BankAccount {
    pub id: String,
    pub bank_name: String,
    pub account_type: AccountType,
    pub account_number: String,
    pub account_holder: String,
    pub rut: String,
    pub email: String,
    pub is_active: bool,
}

// =============================================================================
// Transfer Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    #[default]
    Pending,
    Verified,
    Approved,
    Rejected,
    Expired,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Verified => "verified",
            TransferStatus::Approved => "approved",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Expired => "expired",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransferStatus::Approved | TransferStatus::Rejected | TransferStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Verified)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (Verified, Approved)
                | (Verified, Rejected)
                | (Verified, Expired)
        )
    }

    /// Errors with [`CoreError::InvalidTransferTransition`] for anything
    /// outside the state machine.
    pub fn ensure_transition(&self, next: TransferStatus) -> CoreResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransferTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transfer Payment
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct TransferPayment {
    pub id: String,
    pub order_id: String,
    pub amount: i64,
    #[ts(as = "String")]
    pub transfer_date: NaiveDate,
    pub reference_number: String,
    pub sender_name: String,
    pub sender_rut: Option<String>,
    pub sender_bank: Option<String>,
    pub status: TransferStatus,
    pub verification_notes: Option<String>,
    pub verified_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub verified_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl TransferPayment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_pesos(self.amount)
    }
}

/// What the buyer fills in.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferClaim {
    pub amount: i64,
    #[ts(as = "String")]
    pub transfer_date: NaiveDate,
    pub reference_number: String,
    pub sender_name: String,
    pub sender_rut: Option<String>,
    pub sender_bank: Option<String>,
}

impl TransferClaim {
    /// Checks the claim against its order.
    ///
    /// Returns the initial verification note: a mismatch with the order
    /// total is accepted but noted for the verifier.
    pub fn check_against(&self, order: &Order) -> CoreResult<Option<String>> {
        if order.payment_method != PaymentMethod::Transfer {
            return Err(CoreError::NotATransferOrder {
                order_number: order.order_number.clone(),
            });
        }
        validate_payment_amount(self.amount)?;
        validate_required("reference_number", &self.reference_number, 100)?;
        validate_required("sender_name", &self.sender_name, 200)?;

        if self.amount != order.total {
            return Ok(Some(format!(
                "Amount mismatch: transferred {}, order total {}",
                Money::from_pesos(self.amount),
                Money::from_pesos(order.total)
            )));
        }
        Ok(None)
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Staff decision on a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransferDecision {
    Verify,
    Approve,
    Reject,
    Expire,
}

impl TransferDecision {
    pub fn target(&self) -> TransferStatus {
        match self {
            TransferDecision::Verify => TransferStatus::Verified,
            TransferDecision::Approve => TransferStatus::Approved,
            TransferDecision::Reject => TransferStatus::Rejected,
            TransferDecision::Expire => TransferStatus::Expired,
        }
    }
}

impl std::str::FromStr for TransferDecision {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "verify" => Ok(TransferDecision::Verify),
            "approve" => Ok(TransferDecision::Approve),
            "reject" => Ok(TransferDecision::Reject),
            "expire" => Ok(TransferDecision::Expire),
            _ => Err(ValidationError::NotAllowed {
                field: "decision".to_string(),
                allowed: vec![
                    "verify".into(),
                    "approve".into(),
                    "reject".into(),
                    "expire".into(),
                ],
            }),
        }
    }
}

/// Changes a transfer decision makes to its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPaymentEffect {
    pub payment_status: Option<PaymentStatus>,
    pub status: Option<OrderStatus>,
    /// Whether the customer hears about it.
    pub notify: bool,
}

impl OrderPaymentEffect {
    /// Approve: paid, and a pending order moves to confirmed.
    /// Reject: payment failed. Verify and expire leave the order alone.
    pub fn of(new_status: TransferStatus, order_status: OrderStatus) -> Self {
        match new_status {
            TransferStatus::Approved => OrderPaymentEffect {
                payment_status: Some(PaymentStatus::Paid),
                status: (order_status == OrderStatus::Pending).then_some(OrderStatus::Confirmed),
                notify: true,
            },
            TransferStatus::Rejected => OrderPaymentEffect {
                payment_status: Some(PaymentStatus::Failed),
                status: None,
                notify: true,
            },
            _ => OrderPaymentEffect {
                payment_status: None,
                status: None,
                notify: false,
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::order;

    fn claim(amount: i64) -> TransferClaim {
        TransferClaim {
            amount,
            transfer_date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            reference_number: "OP-123456".to_string(),
            sender_name: "Katherine Rojas".to_string(),
            sender_rut: Some("12.345.678-5".to_string()),
            sender_bank: Some("BancoEstado".to_string()),
        }
    }

    #[test]
    fn test_allowed_transitions() {
        use TransferStatus::*;
        assert!(Pending.can_transition_to(Verified));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Verified.can_transition_to(Approved));
        assert!(Verified.can_transition_to(Expired));
        assert!(!Pending.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Verified));
        assert!(!Expired.can_transition_to(Pending));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = TransferStatus::Approved
            .ensure_transition(TransferStatus::Pending)
            .unwrap_err();
        assert_eq!(err.to_string(), "Transfer payment cannot move from approved to pending");
    }

    #[test]
    fn test_only_approval_marks_paid() {
        let approved = OrderPaymentEffect::of(TransferStatus::Approved, OrderStatus::Pending);
        assert_eq!(approved.payment_status, Some(PaymentStatus::Paid));
        assert_eq!(approved.status, Some(OrderStatus::Confirmed));

        let processing = OrderPaymentEffect::of(TransferStatus::Approved, OrderStatus::Processing);
        assert_eq!(processing.status, None);

        let verified = OrderPaymentEffect::of(TransferStatus::Verified, OrderStatus::Pending);
        assert_eq!(verified.payment_status, None);
        assert!(!verified.notify);

        let rejected = OrderPaymentEffect::of(TransferStatus::Rejected, OrderStatus::Pending);
        assert_eq!(rejected.payment_status, Some(PaymentStatus::Failed));
    }

    #[test]
    fn test_claim_amount_mismatch_is_noted() {
        let o = order(OrderStatus::Pending, PaymentStatus::Pending);
        assert_eq!(claim(15000).check_against(&o).unwrap(), None);
        let note = claim(14000).check_against(&o).unwrap().unwrap();
        assert!(note.contains("$14.000"));
    }

    #[test]
    fn test_claim_validation() {
        let o = order(OrderStatus::Pending, PaymentStatus::Pending);
        assert!(claim(0).check_against(&o).is_err());

        let mut no_ref = claim(15000);
        no_ref.reference_number = " ".to_string();
        assert!(no_ref.check_against(&o).is_err());

        let mut cash = order(OrderStatus::Pending, PaymentStatus::Pending);
        cash.payment_method = PaymentMethod::Cash;
        assert!(matches!(
            claim(15000).check_against(&cash),
            Err(CoreError::NotATransferOrder { .. })
        ));
    }
}
