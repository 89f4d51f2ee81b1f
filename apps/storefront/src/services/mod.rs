//! # Storefront Services
//!
//! One service per area. Each call runs its repository operation, then
//! queues whatever notifications the committed change calls for.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Service Call                                     │
//! │                                                                         │
//! │  1. Check the caller (staff-only operations)                           │
//! │  2. Repository operation (one transaction)                             │
//! │  3. Notifier (after commit, failures only logged)                      │
//! │  4. Result or ApiError { code, message }                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod inbox;
pub mod orders;
pub mod payments;
pub mod support;

pub use cart::{CartResponse, CartService, SessionCartResponse};
pub use catalog::{CatalogService, ProductDetail};
pub use checkout::{CheckoutService, PlacedOrder};
pub use inbox::InboxService;
pub use orders::{OrderDetail, OrderService};
pub use payments::PaymentService;
pub use support::{ChatReply, SupportService, TicketThread};

use dulce_core::order::Actor;

use crate::error::{ApiError, ApiResult, ErrorCode};

/// Rejects callers that are not staff.
pub(crate) fn require_staff(actor: &Actor) -> ApiResult<()> {
    if actor.is_staff {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorCode::BusinessLogic,
            "Esta acción está reservada al personal de la tienda",
        ))
    }
}
