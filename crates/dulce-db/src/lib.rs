//! # dulce-db: Database Layer for the Dulce Bias Storefront
//!
//! SQLite storage through sqlx: pool setup, embedded migrations, and one
//! repository per aggregate.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Dulce Bias Data Flow                                │
//! │                                                                         │
//! │  storefront service (checkout, cart, support, notify worker)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     dulce-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Catalog Cart  │    │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ Order  Stock  │    │ 002_ref_data │  │   │
//! │  │   │               │    │ Transfer ...  │    │              │  │   │
//! │  │   └───────────────┘    └───────┬───────┘    └──────────────┘  │   │
//! │  │                                │                               │   │
//! │  │                     plans from dulce-core                       │   │
//! │  │              (reservations, totals, ticket changes)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Business rules live in `dulce-core`. Repositories read state inside a
//! transaction, ask the core what to do, and write the result in the same
//! transaction.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dulce_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("dulce.db")).await?;
//! let results = db.catalog().search("chips", 20).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cart::{CartRepository, PricedCart};
pub use repository::catalog::{CatalogRepository, NewProduct};
pub use repository::coupon::CouponRepository;
pub use repository::notification::NotificationRepository;
pub use repository::order::{
    CheckoutOutcome, CheckoutRequest, CheckoutSettings, CheckoutSource, LowStock,
    OrderRepository, StatusChange, TotalsDrift,
};
pub use repository::stock::{BulkAdjustment, StockRepository};
pub use repository::support::SupportRepository;
pub use repository::transfer::{TransferOutcome, TransferRepository};
