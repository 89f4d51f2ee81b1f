//! # Orders
//!
//! Order types, the order-number scheme, the cancellation rule and the
//! totals invariant every stored order must satisfy.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Order Status                                     │
//! │                                                                         │
//! │   ┌─────────┐   ┌───────────┐   ┌────────────┐   ┌─────────┐   ┌──────┐│
//! │   │ pending │──►│ confirmed │──►│ processing │──►│ shipped │──►│deliv.││
//! │   └────┬────┘   └─────┬─────┘   └─────┬──────┘   └─────────┘   └──────┘│
//! │        │              │               │                                 │
//! │        └──────────────┴───────┬───────┘   (active states)              │
//! │                               ▼                                         │
//! │                         ┌───────────┐                                  │
//! │                         │ cancelled │──► back to an active state       │
//! │                         └───────────┘    re-reserves stock             │
//! │                                                                         │
//! │  Payment status moves independently:                                   │
//! │   pending ──► paid ──► refunded                                        │
//! │      └─────► failed                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Order Numbers
//! `DB-YYYYMMDD-NNNN`: the day's prefix plus a per-day sequence, one more
//! than the highest sequence already used that day.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

// =============================================================================
// Status Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// States that hold reserved stock and can still be cancelled with a
    /// stock restore.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Customer-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pendiente",
            OrderStatus::Confirmed => "Confirmado",
            OrderStatus::Processing => "En preparación",
            OrderStatus::Shipped => "Enviado",
            OrderStatus::Delivered => "Entregado",
            OrderStatus::Cancelled => "Cancelado",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: OrderStatus::ALL.iter().map(|s| s.to_string()).collect(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Webpay,
    #[default]
    Transfer,
    Cash,
}

/// Delivery regions offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum Region {
    #[serde(rename = "rm")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "rm"))]
    Metropolitana,
    #[serde(rename = "v")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "v"))]
    Valparaiso,
    #[serde(rename = "viii")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "viii"))]
    Biobio,
    #[serde(rename = "iv")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "iv"))]
    Coquimbo,
    #[serde(rename = "other")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "other"))]
    Other,
}

impl Region {
    pub const ALL: [Region; 5] = [
        Region::Metropolitana,
        Region::Valparaiso,
        Region::Biobio,
        Region::Coquimbo,
        Region::Other,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Region::Metropolitana => "rm",
            Region::Valparaiso => "v",
            Region::Biobio => "viii",
            Region::Coquimbo => "iv",
            Region::Other => "other",
        }
    }
}

impl FromStr for Region {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        Region::ALL
            .into_iter()
            .find(|r| r.code() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "region".to_string(),
                allowed: Region::ALL.iter().map(|r| r.code().to_string()).collect(),
            })
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Who is performing an operation. Recorded in history and ledger rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// `None` for the system itself (e.g. worker jobs) and guests.
    pub user_id: Option<String>,
    /// Staff / superuser privileges.
    pub is_staff: bool,
}

impl Actor {
    pub fn customer(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: Some(user_id.into()),
            is_staff: false,
        }
    }

    pub fn staff(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: Some(user_id.into()),
            is_staff: true,
        }
    }

    pub fn system() -> Self {
        Actor {
            user_id: None,
            is_staff: true,
        }
    }

    pub fn guest() -> Self {
        Actor {
            user_id: None,
            is_staff: false,
        }
    }

    /// Label stored in `changed_by` / `created_by` columns.
    pub fn label(&self) -> String {
        match (&self.user_id, self.is_staff) {
            (Some(id), _) => id.clone(),
            (None, true) => "system".to_string(),
            (None, false) => "guest".to_string(),
        }
    }
}

// =============================================================================
// Shipping Address
// =============================================================================

/// Checkout form contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub region: Region,
    pub postal_code: Option<String>,
    pub notes: Option<String>,
}

// =============================================================================
// Order
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// `DB-YYYYMMDD-NNNN`, unique and never changed.
    pub order_number: String,
    /// `None` for guest checkouts.
    pub user_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub region: Region,
    pub postal_code: Option<String>,
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Σ price × quantity over the order items.
    pub subtotal: i64,
    pub discount_amount: i64,
    pub shipping_cost: i64,
    /// subtotal - discount_amount + shipping_cost
    pub total: i64,
    pub coupon_code: Option<String>,
    pub tracking_number: Option<String>,
    #[ts(as = "Option<String>")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Stored totals as a value.
    pub fn stored_totals(&self) -> OrderTotals {
        OrderTotals {
            subtotal: Money::from_pesos(self.subtotal),
            discount: Money::from_pesos(self.discount_amount),
            shipping: Money::from_pesos(self.shipping_cost),
            total: Money::from_pesos(self.total),
        }
    }

    /// Cancellation rule.
    ///
    /// Cancelled or delivered orders never; staff always; customers only
    /// while the order is pending and unpaid.
    pub fn can_be_cancelled(&self, actor: &Actor) -> bool {
        if matches!(self.status, OrderStatus::Cancelled | OrderStatus::Delivered) {
            return false;
        }
        if actor.is_staff {
            return true;
        }
        self.payment_status != PaymentStatus::Paid && self.status == OrderStatus::Pending
    }

    /// Errors with [`CoreError::OrderNotCancellable`] unless `actor` may cancel.
    pub fn ensure_cancellable(&self, actor: &Actor) -> CoreResult<()> {
        if self.can_be_cancelled(actor) {
            Ok(())
        } else {
            Err(CoreError::OrderNotCancellable {
                order_number: self.order_number.clone(),
                status: self.status.to_string(),
            })
        }
    }
}

/// A purchased line. `price` is the unit price at purchase time and never
/// follows later catalog changes.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub product_name: String,
    pub price: i64,
    pub quantity: i64,
    /// Units currently taken out of stock for this line.
    pub reserved_quantity: i64,
}

impl OrderItem {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_pesos(self.price).multiply_quantity(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderStatusHistory {
    pub id: String,
    pub order_id: String,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub changed_by: String,
    #[ts(as = "String")]
    pub changed_at: DateTime<Utc>,
}

// =============================================================================
// Totals
// =============================================================================

/// The four stored money fields of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub total: Money,
}

impl OrderTotals {
    /// Totals derived from the order items plus the discount and shipping
    /// decided at checkout.
    pub fn from_items(items: &[OrderItem], discount: Money, shipping: Money) -> Self {
        let subtotal: Money = items.iter().map(OrderItem::total).sum();
        let discount = discount.min(subtotal);
        OrderTotals {
            subtotal,
            discount,
            shipping,
            total: subtotal - discount + shipping,
        }
    }

    /// `subtotal - discount + shipping == total` and the discount fits.
    pub fn is_balanced(&self) -> bool {
        self.total == self.subtotal - self.discount + self.shipping
            && !self.discount.is_negative()
            && self.discount <= self.subtotal
    }

    /// Checks these totals against the order lines they were derived from.
    pub fn verify(&self, order_number: &str, items: &[OrderItem]) -> CoreResult<()> {
        let line_sum: Money = items.iter().map(OrderItem::total).sum();
        if line_sum != self.subtotal {
            return Err(CoreError::TotalsMismatch {
                order_number: order_number.to_string(),
                detail: format!("subtotal {} but lines sum to {}", self.subtotal, line_sum),
            });
        }
        if !self.is_balanced() {
            return Err(CoreError::TotalsMismatch {
                order_number: order_number.to_string(),
                detail: format!(
                    "total {} != {} - {} + {}",
                    self.total, self.subtotal, self.discount, self.shipping
                ),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Order Numbers
// =============================================================================

/// `DB-YYYYMMDD` for the given day.
pub fn order_number_prefix(date: NaiveDate) -> String {
    format!("DB-{}", date.format("%Y%m%d"))
}

/// Highest sequence a day can issue; numbers stay four digits.
pub const MAX_DAILY_ORDERS: u32 = 9999;

/// `DB-YYYYMMDD-NNNN`. Sequences outside `1..=MAX_DAILY_ORDERS` are refused.
pub fn format_order_number(date: NaiveDate, sequence: u32) -> CoreResult<String> {
    let prefix = order_number_prefix(date);
    if sequence == 0 || sequence > MAX_DAILY_ORDERS {
        return Err(CoreError::OrderNumbersExhausted { prefix });
    }
    Ok(format!("{}-{:04}", prefix, sequence))
}

/// Sequence part of an order number if it belongs to the day of `prefix`.
pub fn parse_sequence(order_number: &str, prefix: &str) -> Option<u32> {
    order_number
        .strip_prefix(prefix)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

/// Next number for `date` given the numbers already issued.
///
/// ```rust
/// use chrono::NaiveDate;
/// use dulce_core::order::next_order_number;
///
/// let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// let existing = ["DB-20240309-0001", "DB-20240309-0007", "DB-20240308-0042"];
/// assert_eq!(next_order_number(day, existing).unwrap(), "DB-20240309-0008");
/// ```
pub fn next_order_number<'a>(
    date: NaiveDate,
    existing: impl IntoIterator<Item = &'a str>,
) -> CoreResult<String> {
    let prefix = order_number_prefix(date);
    let max = existing
        .into_iter()
        .filter_map(|n| parse_sequence(n, &prefix))
        .max()
        .unwrap_or(0);
    format_order_number(date, max + 1)
}

// =============================================================================
// Unit Tests
// =============================================================================
