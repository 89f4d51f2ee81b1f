//! # Error Types
//!
//! Domain-specific error types for dulce-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dulce-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  dulce-db errors (separate crate)                                      │
//! │  └── DbError          - Database failures (wraps CoreError raised      │
//! │                         inside a transaction)                          │
//! │                                                                         │
//! │  storefront errors (app)                                               │
//! │  └── ApiError         - What the customer / staff UI sees              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product exists but is flagged unavailable.
    #[error("Product {product} is not available")]
    ProductUnavailable { product: String },

    /// Requested more units than are in stock.
    ///
    /// Raised when adding to a cart, and at checkout under the `reject`
    /// oversell policy.
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    #[error("Cart is empty")]
    CartEmpty,

    #[error("Cart cannot have more than {max} different products")]
    CartTooLarge { max: usize },

    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    // -------------------------------------------------------------------------
    // Coupons
    // -------------------------------------------------------------------------
    #[error("Coupon code {code} does not exist")]
    CouponNotFound { code: String },

    /// Inactive, not yet valid, or past `valid_until`.
    #[error("Coupon {code} is not valid at this time")]
    CouponNotValid { code: String },

    #[error("Coupon {code} requires a minimum order of {minimum}")]
    CouponMinimumNotMet { code: String, minimum: String },

    #[error("Coupon {code} has reached its usage limit")]
    CouponUsageLimitReached { code: String },

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_number} cannot be cancelled while {status}")]
    OrderNotCancellable {
        order_number: String,
        status: String,
    },

    /// The day already issued its last four-digit sequence.
    #[error("No order numbers left for {prefix}")]
    OrderNumbersExhausted { prefix: String },

    /// Stored totals disagree with the order lines.
    #[error("Order {order_number} totals mismatch: {detail}")]
    TotalsMismatch {
        order_number: String,
        detail: String,
    },

    // -------------------------------------------------------------------------
    // Transfers
    // -------------------------------------------------------------------------
    #[error("Transfer payment cannot move from {from} to {to}")]
    InvalidTransferTransition { from: String, to: String },

    #[error("Order {order_number} already has a transfer payment")]
    TransferAlreadySubmitted { order_number: String },

    #[error("Order {order_number} is not paid by bank transfer")]
    NotATransferOrder { order_number: String },

    // -------------------------------------------------------------------------
    // Support
    // -------------------------------------------------------------------------
    #[error("Support assistant failed: {0}")]
    AssistantFailed(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any business logic runs, e.g. on checkout address fields.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    /// Shorthand for the most common variant.
    pub fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
