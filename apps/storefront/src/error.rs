//! # Storefront Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in the Storefront                         │
//! │                                                                         │
//! │  Service call (e.g. checkout)                                           │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  Validation failed? ─── CoreError::Validation ────────┐                │
//! │         │                                              │                │
//! │         ▼                                              ▼                │
//! │  Business rule? ─────── CoreError / DbError::Core ── ApiError ────────► │
//! │         │                                              ▲   { code,      │
//! │         ▼                                              │     message }  │
//! │  SQLite failure? ────── DbError::QueryFailed ──────────┘                │
//! │                         (logged, generic message)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Whatever renders the error (web view, JSON API) gets a machine-readable
//! `code` and a message that is safe to show to a customer.

use serde::Serialize;
use thiserror::Error;

use dulce_core::CoreError;
use dulce_db::DbError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error returned from storefront services.
///
/// ## Serialization
/// ```json
/// {
///   "code": "COUPON_ERROR",
///   "message": "Coupon BIENVENIDA10 is not valid at this time"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Resource not found (404)
    NotFound,

    /// Input validation failed (400)
    ValidationError,

    /// Database operation failed (500)
    DatabaseError,

    /// Business rule refused the operation (422)
    BusinessLogic,

    /// Internal server error (500)
    Internal,

    CartError,

    InsufficientStock,

    /// Transfer payment rejected or in the wrong state
    PaymentError,

    CouponError,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        ApiError::new(
            ErrorCode::NotFound,
            format!("{} not found: {}", resource, id),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::ValidationError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Internal, message)
    }

    pub fn cart(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::CartError, message)
    }

    /// Generic failure for customers; the cause is logged.
    fn unexpected(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Unexpected failure: {}", cause);
        ApiError::internal("Ocurrió un error inesperado. Inténtalo nuevamente.")
    }
}

/// Converts database errors to API errors.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ApiError::not_found(&entity, &id),
            DbError::UniqueViolation { field, value } => ApiError::new(
                ErrorCode::ValidationError,
                format!("{} '{}' already exists", field, value),
            ),
            DbError::Core(core) => ApiError::from(core),
            DbError::ConnectionFailed(e) => {
                tracing::error!("Database connection failed: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database connection failed")
            }
            DbError::MigrationFailed(e) => {
                tracing::error!("Database migration failed: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database migration failed")
            }
            DbError::QueryFailed(e) => {
                // Log the actual error but return a generic message
                tracing::error!("Database query failed: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
            DbError::TransactionFailed(e) => {
                tracing::error!("Transaction failed: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database transaction failed")
            }
            DbError::ForeignKeyViolation { message } => {
                tracing::error!("Foreign key violation: {}", message);
                ApiError::new(ErrorCode::ValidationError, "Invalid reference")
            }
            DbError::PoolExhausted => {
                ApiError::new(ErrorCode::DatabaseError, "Database pool exhausted")
            }
            DbError::Busy(e) => {
                tracing::warn!("Database busy: {}", e);
                ApiError::new(
                    ErrorCode::DatabaseError,
                    "La tienda está ocupada, inténtalo nuevamente en unos segundos",
                )
            }
            DbError::Internal(e) => {
                tracing::error!("Internal database error: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

/// Converts core errors to API errors.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::ProductNotFound(id) => ApiError::not_found("Product", &id),
            CoreError::OrderNotFound(id) => ApiError::not_found("Order", &id),
            CoreError::InsufficientStock { .. } => {
                ApiError::new(ErrorCode::InsufficientStock, message)
            }
            CoreError::ProductUnavailable { .. }
            | CoreError::CartEmpty
            | CoreError::CartTooLarge { .. } => ApiError::cart(message),
            CoreError::QuantityTooLarge { .. } => ApiError::validation(message),
            CoreError::CouponNotFound { .. }
            | CoreError::CouponNotValid { .. }
            | CoreError::CouponMinimumNotMet { .. }
            | CoreError::CouponUsageLimitReached { .. } => {
                ApiError::new(ErrorCode::CouponError, message)
            }
            CoreError::OrderNotCancellable { .. } | CoreError::OrderNumbersExhausted { .. } => {
                ApiError::new(ErrorCode::BusinessLogic, message)
            }
            CoreError::InvalidTransferTransition { .. }
            | CoreError::TransferAlreadySubmitted { .. }
            | CoreError::NotATransferOrder { .. } => {
                ApiError::new(ErrorCode::PaymentError, message)
            }
            CoreError::TotalsMismatch { .. } | CoreError::AssistantFailed(_) => {
                ApiError::unexpected(message)
            }
            CoreError::Validation(e) => ApiError::validation(e.to_string()),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// =============================================================================
// Configuration Errors
// =============================================================================

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid storefront configuration: {0}")]
    Invalid(String),

    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Failed to save config: {0}")]
    SaveFailed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::SaveFailed(err.to_string())
    }
}
