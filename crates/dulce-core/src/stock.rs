//! # Stock Ledger Planning
//!
//! Pure planning for every stock-affecting event. The database layer reads
//! the current stock inside its transaction, asks this module what to do,
//! and applies the resulting [`PlannedMovement`]s: one `UPDATE` of
//! `products.stock` plus one appended `product_stock` row each.
//!
//! ## Order Transitions → Stock Effects
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  created (pending)               ──► Reserve        sale row  (-qty)    │
//! │  active ──► cancelled            ──► Restore        return row (+qty)   │
//! │  cancelled ──► active            ──► Reserve        sale row  (-qty)    │
//! │  any ──► delivered               ──► ConfirmDelivery sale row (0)       │
//! │  deleted while not cancelled/delivered ──► Restore                      │
//! │  anything else                   ──► None                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ledger Invariant
//! After every applied plan, `product.stock` equals the `new_stock` of the
//! most recent ledger row for that product. Rows are only ever appended.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::catalog::Product;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::order::OrderStatus;

// =============================================================================
// Ledger Rows
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Units leaving for an order (or a zero-delta delivery confirmation).
    Sale,
    /// Units coming back from a cancelled or deleted order.
    Return,
    /// Zero-delta diagnostics and ledger repairs.
    Adjustment,
    /// Manual increase.
    Entry,
    /// Manual decrease.
    Exit,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Return => "return",
            MovementType::Adjustment => "adjustment",
            MovementType::Entry => "entry",
            MovementType::Exit => "exit",
        }
    }
}

/// One appended ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub movement_type: MovementType,
    /// Signed delta applied to `products.stock`.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: String,
    /// Order number, or free text for manual adjustments.
    pub reference: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A movement the database layer must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMovement {
    pub movement_type: MovementType,
    pub delta: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: String,
}

impl PlannedMovement {
    fn new(movement_type: MovementType, previous: i64, delta: i64, reason: String) -> Self {
        PlannedMovement {
            movement_type,
            delta,
            previous_stock: previous,
            new_stock: previous + delta,
            reason,
        }
    }
}

// =============================================================================
// Oversell Policy
// =============================================================================

/// What reserving more units than are on hand does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversellPolicy {
    /// Keep the order, leave stock untouched, append a zero-delta
    /// `adjustment` row flagging the shortfall.
    #[default]
    Flag,
    /// Decrement anyway (stock goes negative) and append a diagnostic
    /// `adjustment` row after the `sale` row.
    AllowNegative,
    /// Refuse the reservation.
    Reject,
}

impl fmt::Display for OversellPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OversellPolicy::Flag => "flag",
            OversellPolicy::AllowNegative => "allow_negative",
            OversellPolicy::Reject => "reject",
        })
    }
}

impl FromStr for OversellPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flag" => Ok(OversellPolicy::Flag),
            "allow_negative" | "allow-negative" => Ok(OversellPolicy::AllowNegative),
            "reject" => Ok(OversellPolicy::Reject),
            _ => Err(ValidationError::NotAllowed {
                field: "oversell_policy".to_string(),
                allowed: vec!["flag".into(), "allow_negative".into(), "reject".into()],
            }),
        }
    }
}

// =============================================================================
// Transition Effects
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    None,
    Reserve,
    Restore,
    ConfirmDelivery,
}

impl StockEffect {
    /// Effect of moving an existing order from `old` to `new`.
    pub fn for_transition(old: OrderStatus, new: OrderStatus) -> Self {
        if old == new {
            return StockEffect::None;
        }
        if new == OrderStatus::Cancelled && old.is_active() {
            return StockEffect::Restore;
        }
        if old == OrderStatus::Cancelled && new.is_active() {
            return StockEffect::Reserve;
        }
        if new == OrderStatus::Delivered {
            return StockEffect::ConfirmDelivery;
        }
        StockEffect::None
    }

    /// Effect of deleting an order in `status`.
    pub fn for_deletion(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Cancelled | OrderStatus::Delivered => StockEffect::None,
            _ => StockEffect::Restore,
        }
    }
}

// =============================================================================
// Plans
// =============================================================================

/// Result of planning one order line's reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Units actually taken; becomes the line's `reserved_quantity`.
    pub reserved: i64,
    pub movements: Vec<PlannedMovement>,
}

impl Reservation {
    /// Net change to `products.stock`.
    pub fn delta(&self) -> i64 {
        self.movements.iter().map(|m| m.delta).sum()
    }

    /// True when the shortfall was flagged instead of reserved.
    pub fn is_short(&self) -> bool {
        self.movements
            .iter()
            .any(|m| m.movement_type == MovementType::Adjustment)
    }
}

/// Plans reserving `quantity` units of a product with `current` on hand.
pub fn plan_reservation(
    product_name: &str,
    current: i64,
    quantity: i64,
    order_number: &str,
    policy: OversellPolicy,
) -> CoreResult<Reservation> {
    if quantity <= current {
        return Ok(Reservation {
            reserved: quantity,
            movements: vec![PlannedMovement::new(
                MovementType::Sale,
                current,
                -quantity,
                format!("Sale for order {}", order_number),
            )],
        });
    }

    let shortfall = format!(
        "Insufficient stock for order {}: requested {}, available {}",
        order_number, quantity, current
    );

    match policy {
        OversellPolicy::Reject => Err(CoreError::InsufficientStock {
            product: product_name.to_string(),
            available: current,
            requested: quantity,
        }),
        OversellPolicy::Flag => Ok(Reservation {
            reserved: 0,
            movements: vec![PlannedMovement::new(
                MovementType::Adjustment,
                current,
                0,
                shortfall,
            )],
        }),
        OversellPolicy::AllowNegative => {
            let sale = PlannedMovement::new(
                MovementType::Sale,
                current,
                -quantity,
                format!("Sale for order {} (oversold)", order_number),
            );
            let flag = PlannedMovement::new(MovementType::Adjustment, sale.new_stock, 0, shortfall);
            Ok(Reservation {
                reserved: quantity,
                movements: vec![sale, flag],
            })
        }
    }
}

/// Plans giving back `reserved` units. `None` when nothing was reserved.
pub fn plan_restore(current: i64, reserved: i64, order_number: &str, why: &str) -> Option<PlannedMovement> {
    (reserved > 0).then(|| {
        PlannedMovement::new(
            MovementType::Return,
            current,
            reserved,
            format!("Return for order {}: {}", order_number, why),
        )
    })
}

/// Zero-delta delivery confirmation row.
pub fn plan_delivery_confirmation(current: i64, quantity: i64, order_number: &str) -> PlannedMovement {
    PlannedMovement::new(
        MovementType::Sale,
        current,
        0,
        format!("Delivery confirmed for order {} ({} units)", order_number, quantity),
    )
}

// =============================================================================
// Manual Adjustment
// =============================================================================

/// Outcome of setting a product's stock to an absolute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ManualAdjustment {
    pub product_id: String,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub difference: i64,
    pub movement_type: MovementType,
}

/// Plans a manual adjustment to `target`.
///
/// `entry` when stock goes up, `exit` when it goes down, `adjustment` when
/// it stays the same.
pub fn plan_manual_adjustment(current: i64, target: i64, reason: &str) -> CoreResult<PlannedMovement> {
    if target < 0 {
        return Err(ValidationError::OutOfRange {
            field: "stock".to_string(),
            min: 0,
            max: i64::MAX,
        }
        .into());
    }
    let difference = target - current;
    let movement_type = match difference.signum() {
        1 => MovementType::Entry,
        -1 => MovementType::Exit,
        _ => MovementType::Adjustment,
    };
    Ok(PlannedMovement::new(
        movement_type,
        current,
        difference,
        reason.to_string(),
    ))
}

// =============================================================================
// Stock Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    OutOfStock,
    Critical,
    Low,
    Healthy,
}

/// Alert thresholds (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    pub critical: i64,
    pub low: i64,
}

impl Default for StockThresholds {
    fn default() -> Self {
        StockThresholds { critical: 5, low: 10 }
    }
}

impl StockThresholds {
    pub fn classify(&self, stock: i64) -> StockLevel {
        if stock <= 0 {
            StockLevel::OutOfStock
        } else if stock <= self.critical {
            StockLevel::Critical
        } else if stock <= self.low {
            StockLevel::Low
        } else {
            StockLevel::Healthy
        }
    }

    /// Whether a product at `stock` should raise an admin alert.
    pub fn needs_alert(&self, stock: i64) -> bool {
        matches!(
            self.classify(stock),
            StockLevel::OutOfStock | StockLevel::Critical
        )
    }

    /// True when a change from `before` to `after` crosses into alert range.
    pub fn crossed_into_alert(&self, before: i64, after: i64) -> bool {
        !self.needs_alert(before) && self.needs_alert(after)
    }
}

/// Inventory summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockReport {
    pub total_products: i64,
    pub out_of_stock: i64,
    pub critical: i64,
    pub low: i64,
    pub healthy: i64,
    pub total_units: i64,
    /// Σ stock × current price over products with positive stock.
    pub total_value: Money,
}

impl StockReport {
    pub fn build<'a>(products: impl IntoIterator<Item = &'a Product>, thresholds: &StockThresholds) -> Self {
        let mut report = StockReport::default();
        for product in products {
            report.total_products += 1;
            match thresholds.classify(product.stock) {
                StockLevel::OutOfStock => report.out_of_stock += 1,
                StockLevel::Critical => report.critical += 1,
                StockLevel::Low => report.low += 1,
                StockLevel::Healthy => report.healthy += 1,
            }
            if product.stock > 0 {
                report.total_units += product.stock;
                report.total_value += product.current_price().multiply_quantity(product.stock);
            }
        }
        report
    }
}

/// A product whose stock disagrees with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LedgerDrift {
    pub product_id: String,
    pub product_name: String,
    pub stock: i64,
    /// `new_stock` of the latest ledger row.
    pub ledger_stock: i64,
}

impl LedgerDrift {
    /// Repair row: an `adjustment` from the ledger's value to the real stock,
    /// so the ledger catches up without rewriting history.
    pub fn repair_movement(&self) -> PlannedMovement {
        PlannedMovement::new(
            MovementType::Adjustment,
            self.ledger_stock,
            self.stock - self.ledger_stock,
            "Ledger reconciliation".to_string(),
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
