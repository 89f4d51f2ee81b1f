//! # Checkout Service
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Checkout                                       │
//! │                                                                         │
//! │  user cart ─────┐                                                       │
//! │                 ├──► OrderRepository::checkout (one transaction)       │
//! │  session cart ──┘      order + items + stock reservation + coupon      │
//! │                                │                                        │
//! │                            COMMIT                                       │
//! │                                │                                        │
//! │                ┌───────────────┴────────────────┐                      │
//! │                ▼                                ▼                       │
//! │     order confirmation                 stock alerts for products       │
//! │     (email, SMS with phone)            that reached the critical level │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use dulce_core::cart::SessionCart;
use dulce_core::order::{Order, OrderItem, PaymentMethod, ShippingAddress};
use dulce_core::transfer::BankAccount;
use dulce_core::CoreError;
use dulce_db::{CheckoutOutcome, CheckoutRequest, CheckoutSource, Database};

use super::CartService;
use crate::config::StorefrontConfig;
use crate::error::ApiResult;
use crate::notify::Notifier;

/// A committed order, ready for the confirmation page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Products ordered beyond their stock.
    pub short_lines: Vec<String>,
    /// Where to transfer, for transfer orders.
    pub bank_accounts: Vec<BankAccount>,
}

pub struct CheckoutService {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl CheckoutService {
    pub fn new(db: Database, config: Arc<StorefrontConfig>) -> Self {
        CheckoutService { db, config }
    }

    /// Orders the user's cart at live prices with its coupon.
    pub async fn user_checkout(
        &self,
        user_id: &str,
        address: ShippingAddress,
        payment_method: Option<PaymentMethod>,
    ) -> ApiResult<PlacedOrder> {
        let request = CheckoutRequest {
            user_id: Some(user_id.to_string()),
            address,
            payment_method: payment_method.unwrap_or_default(),
            source: CheckoutSource::UserCart,
        };
        self.place(request).await
    }

    /// Orders a visitor's session cart at its frozen prices. The caller
    /// clears the session once this succeeds.
    pub async fn guest_checkout(
        &self,
        session: &Value,
        address: ShippingAddress,
        payment_method: Option<PaymentMethod>,
    ) -> ApiResult<PlacedOrder> {
        let cart = SessionCart::from_session_value(session)?;
        if cart.is_empty() {
            return Err(CoreError::CartEmpty.into());
        }
        let lines = CartService::new(self.db.clone(), self.config.clone())
            .session_lines(&cart)
            .await?;
        if lines.is_empty() {
            return Err(CoreError::CartEmpty.into());
        }

        let request = CheckoutRequest {
            user_id: None,
            address,
            payment_method: payment_method.unwrap_or_default(),
            source: CheckoutSource::Session(lines),
        };
        self.place(request).await
    }

    async fn place(&self, request: CheckoutRequest) -> ApiResult<PlacedOrder> {
        let CheckoutOutcome {
            order,
            items,
            low_stock,
            short_lines,
        } = self
            .db
            .orders()
            .checkout(&request, &self.config.checkout_settings())
            .await?;

        info!(
            order_number = %order.order_number,
            total = order.total,
            items = items.len(),
            guest = order.user_id.is_none(),
            "Checkout completed"
        );

        let notifier = Notifier::new(self.db.clone(), self.config.clone());
        notifier.order_created(&order, items.len()).await;
        notifier.stock_alerts(&low_stock).await;

        let bank_accounts = if order.payment_method == PaymentMethod::Transfer {
            self.db.transfers().list_active_accounts().await?
        } else {
            Vec::new()
        };

        Ok(PlacedOrder {
            order,
            items,
            short_lines,
            bank_accounts,
        })
    }
}
