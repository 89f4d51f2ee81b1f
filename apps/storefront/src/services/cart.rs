//! # Cart Service
//!
//! Two carts with different pricing rules:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Cart Kinds                                      │
//! │                                                                         │
//! │  Signed-in user                    Visitor                              │
//! │  ──────────────                    ───────                              │
//! │  carts / cart_items rows           SessionCart in the web session       │
//! │  live current_price on read        price frozen at add time             │
//! │  coupon attached to the cart       no coupon                            │
//! │                                                                         │
//! │  Both: shipping 0 when subtotal >= free_shipping_threshold,             │
//! │        otherwise shipping_cost                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Session carts travel as the JSON value stored in the session,
//! `{"<product id>": {"quantity": 2, "price": "6000"}}`. Every session
//! operation takes the current value and returns the new one.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use dulce_core::cart::{CartLine, CartTotals, SessionCart};
use dulce_db::{Database, PricedCart};

use crate::config::StorefrontConfig;
use crate::error::{ApiError, ApiResult};

/// A user cart with its totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub lines: Vec<CartLine>,
    pub totals: CartTotals,
}

impl From<PricedCart> for CartResponse {
    fn from(priced: PricedCart) -> Self {
        CartResponse {
            lines: priced.lines,
            totals: priced.totals,
        }
    }
}

/// A session cart: the value to store back plus its priced lines.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCartResponse {
    pub session: Value,
    /// Sum of quantities.
    pub len: i64,
    pub lines: Vec<CartLine>,
    pub totals: CartTotals,
}

pub struct CartService {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl CartService {
    pub fn new(db: Database, config: Arc<StorefrontConfig>) -> Self {
        CartService { db, config }
    }

    // =========================================================================
    // User Cart
    // =========================================================================

    pub async fn view(&self, user_id: &str) -> ApiResult<CartResponse> {
        let priced = self
            .db
            .carts()
            .priced(user_id, &self.config.shipping_policy(), Utc::now())
            .await?;
        Ok(priced.into())
    }

    /// Adds to the existing quantity of the line.
    pub async fn add(&self, user_id: &str, product_id: &str, quantity: i64) -> ApiResult<CartResponse> {
        debug!(user_id = %user_id, product_id = %product_id, quantity, "add_to_cart command");
        self.db.carts().add_item(user_id, product_id, quantity).await?;
        self.view(user_id).await
    }

    /// Zero or less removes the line.
    pub async fn set_quantity(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> ApiResult<CartResponse> {
        self.db
            .carts()
            .set_quantity(user_id, product_id, quantity)
            .await?;
        self.view(user_id).await
    }

    pub async fn remove(&self, user_id: &str, product_id: &str) -> ApiResult<CartResponse> {
        if !self.db.carts().remove_item(user_id, product_id).await? {
            return Err(ApiError::not_found("Cart item", product_id));
        }
        self.view(user_id).await
    }

    pub async fn clear(&self, user_id: &str) -> ApiResult<CartResponse> {
        self.db.carts().clear(user_id).await?;
        self.view(user_id).await
    }

    pub async fn apply_coupon(&self, user_id: &str, code: &str) -> ApiResult<CartResponse> {
        self.db.carts().apply_coupon(user_id, code, Utc::now()).await?;
        self.view(user_id).await
    }

    pub async fn remove_coupon(&self, user_id: &str) -> ApiResult<CartResponse> {
        self.db.carts().remove_coupon(user_id).await?;
        self.view(user_id).await
    }

    /// Drops lines whose product is gone or unlisted. Returns how many.
    pub async fn cleanup(&self, user_id: &str) -> ApiResult<u64> {
        let removed = self.db.carts().purge_unavailable(user_id).await?;
        if removed > 0 {
            info!(user_id = %user_id, removed, "Unavailable products removed from cart");
        }
        Ok(removed)
    }

    // =========================================================================
    // Session Cart
    // =========================================================================

    pub async fn session_view(&self, session: &Value) -> ApiResult<SessionCartResponse> {
        let cart = SessionCart::from_session_value(session)?;
        self.session_response(cart).await
    }

    /// Adds `quantity`, or sets it when `override_quantity` is true. The
    /// unit price is captured again from the product.
    pub async fn session_add(
        &self,
        session: &Value,
        product_id: &str,
        quantity: i64,
        override_quantity: bool,
    ) -> ApiResult<SessionCartResponse> {
        let mut cart = SessionCart::from_session_value(session)?;
        let product = self
            .db
            .catalog()
            .get(product_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Product", product_id))?;

        cart.add(&product, quantity, override_quantity)?;
        self.session_response(cart).await
    }

    pub async fn session_remove(&self, session: &Value, product_id: &str) -> ApiResult<SessionCartResponse> {
        let mut cart = SessionCart::from_session_value(session)?;
        cart.remove(product_id);
        self.session_response(cart).await
    }

    pub async fn session_clear(&self) -> ApiResult<SessionCartResponse> {
        self.session_response(SessionCart::new()).await
    }

    /// Priced lines of a session cart at its frozen prices.
    pub(crate) async fn session_lines(&self, cart: &SessionCart) -> ApiResult<Vec<CartLine>> {
        let ids: Vec<String> = cart.product_ids().map(str::to_string).collect();
        let products = self.db.catalog().get_many(&ids).await?;
        Ok(cart.lines(&products))
    }

    async fn session_response(&self, cart: SessionCart) -> ApiResult<SessionCartResponse> {
        let lines = self.session_lines(&cart).await?;
        let totals = CartTotals::compute(&lines, None, &self.config.shipping_policy(), Utc::now());
        Ok(SessionCartResponse {
            session: cart.to_session_value(),
            len: cart.len(),
            lines,
            totals,
        })
    }
}
