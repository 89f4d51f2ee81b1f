//! # dulce-core: Pure Business Logic for the Dulce Bias Storefront
//!
//! Pricing, cart rules, coupons, the order lifecycle, stock ledger planning,
//! transfer verification, the support assistant and notification drafting.
//! Nothing in this crate touches a database, a network or the clock on its
//! own; callers pass `now` in.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Dulce Bias Storefront                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              dulce-storefront (services, worker)                │   │
//! │  │    CartService ─ CheckoutService ─ OrderService ─ Notifier      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ dulce-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │  catalog  money  cart  coupon  order  stock  transfer           │   │
//! │  │  support  notification  validation  error                      │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    dulce-db (SQLite)                            │   │
//! │  │         migrations, repositories, transactional checkout        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use dulce_core::cart::{CartLine, CartTotals, ShippingPolicy};
//! use dulce_core::Money;
//!
//! let lines = vec![CartLine {
//!     product_id: "p1".to_string(),
//!     product_name: "Galleta Chips".to_string(),
//!     unit_price: Money::from_pesos(6000),
//!     quantity: 2,
//! }];
//! let totals = CartTotals::compute(&lines, None, &ShippingPolicy::default(), Utc::now());
//!
//! assert_eq!(totals.subtotal.pesos(), 12000);
//! assert_eq!(totals.shipping.pesos(), 3000);
//! assert_eq!(totals.total.pesos(), 15000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod error;
pub mod money;
pub mod notification;
pub mod order;
pub mod stock;
pub mod support;
pub mod transfer;
pub mod validation;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct products in a single cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single cart line.
///
/// Catches typos like 1000 instead of 10.
pub const MAX_ITEM_QUANTITY: i64 = 999;
