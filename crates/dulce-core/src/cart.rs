//! # Cart Pricing
//!
//! Both cart flavours end up as a list of [`CartLine`]s and are priced by
//! the same [`CartTotals::compute`], so the shipping rule and coupon rules
//! cannot drift between them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Two Carts, One Price                             │
//! │                                                                         │
//! │  Authenticated (DB)                  Anonymous (session)                │
//! │  cart_items + live Product           SessionCart { id → qty, price }   │
//! │        │                                   │                            │
//! │        │ CartLine::live(product, qty)      │ unit price frozen at add   │
//! │        └───────────────┬───────────────────┘                            │
//! │                        ▼                                                │
//! │            CartTotals::compute(lines, coupon, shipping policy)          │
//! │                                                                         │
//! │  subtotal = Σ qty × unit_price                                          │
//! │  shipping = 0 if subtotal >= 15.000 (or free-shipping coupon) else 3.000│
//! │  total    = subtotal - discount + shipping                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::catalog::Product;
use crate::coupon::DiscountCoupon;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::validation::{validate_cart_size, validate_quantity};

// =============================================================================
// Shipping Policy
// =============================================================================

/// Flat-rate shipping with a free-shipping threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPolicy {
    /// Subtotals at or above this ship free (inclusive).
    pub free_shipping_threshold: Money,
    pub flat_rate: Money,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        ShippingPolicy {
            free_shipping_threshold: Money::from_pesos(15_000),
            flat_rate: Money::from_pesos(3_000),
        }
    }
}

impl ShippingPolicy {
    pub fn shipping_for(&self, subtotal: Money, coupon_waives_shipping: bool) -> Money {
        if coupon_waives_shipping || subtotal >= self.free_shipping_threshold {
            Money::zero()
        } else {
            self.flat_rate
        }
    }
}

// =============================================================================
// Cart Line
// =============================================================================

/// A priced cart line, ready for totals or for becoming an order item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: i64,
}

impl CartLine {
    /// Line priced from the product's live `current_price`.
    pub fn live(product: &Product, quantity: i64) -> Self {
        CartLine {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            unit_price: product.current_price(),
            quantity,
        }
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Cart Totals
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    /// Sum of quantities.
    pub total_items: i64,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub total: Money,
    /// Code of the coupon that produced `discount` or free shipping.
    pub coupon_code: Option<String>,
}

impl CartTotals {
    /// Prices a set of lines.
    ///
    /// A coupon that is invalid at `now` or whose minimum is not met is
    /// ignored (and `coupon_code` is left empty).
    pub fn compute(
        lines: &[CartLine],
        coupon: Option<&DiscountCoupon>,
        policy: &ShippingPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let total_items: i64 = lines.iter().map(|l| l.quantity).sum();
        let subtotal: Money = lines.iter().map(CartLine::line_total).sum();

        let applied = coupon.filter(|c| c.applies_to(subtotal, now));
        let discount = applied
            .map(|c| c.discount_for(subtotal, now))
            .unwrap_or_default();
        let waives = applied
            .map(|c| c.grants_free_shipping(subtotal, now))
            .unwrap_or(false);
        let shipping = policy.shipping_for(subtotal, waives);

        CartTotals {
            total_items,
            subtotal,
            discount,
            shipping,
            total: subtotal - discount + shipping,
            coupon_code: applied.map(|c| c.code.clone()),
        }
    }

    /// Subtotal after the coupon discount.
    pub fn discounted_subtotal(&self) -> Money {
        self.subtotal - self.discount
    }
}

// =============================================================================
// Authenticated Cart Rows
// =============================================================================

/// One cart per authenticated user, created lazily.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Cart {
    pub id: String,
    pub user_id: String,
    pub coupon_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A (cart, product) pair with its quantity. Prices are never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CartItem {
    pub id: String,
    pub cart_id: String,
    pub product_id: String,
    pub quantity: i64,
    #[ts(as = "String")]
    pub added_at: DateTime<Utc>,
}

// =============================================================================
// Session Cart
// =============================================================================

/// One session cart entry: quantity and the unit price seen at the last add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCartEntry {
    pub quantity: i64,
    /// Serialized as a decimal string, e.g. `"6000"`.
    #[serde(with = "price_string")]
    pub price: Money,
}

/// Anonymous visitor cart kept in the web session.
///
/// Serializes to exactly the session shape
/// `{"<product id>": {"quantity": 2, "price": "6000"}}`.
///
/// The unit price is captured from `current_price` whenever the product is
/// added, and later catalog price changes do not touch it. This differs from
/// the authenticated cart, which always reads the live price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCart {
    entries: BTreeMap<String, SessionCartEntry>,
}

impl SessionCart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `quantity` units of `product`, or sets the quantity when
    /// `override_quantity` is true. Re-captures the unit price.
    pub fn add(
        &mut self,
        product: &Product,
        quantity: i64,
        override_quantity: bool,
    ) -> CoreResult<()> {
        if !product.available {
            return Err(CoreError::ProductUnavailable {
                product: product.name.clone(),
            });
        }

        let existing = self.entries.get(&product.id).map(|e| e.quantity).unwrap_or(0);
        let new_quantity = if override_quantity {
            quantity
        } else {
            existing + quantity
        };
        validate_quantity(new_quantity)?;

        if !self.entries.contains_key(&product.id) {
            validate_cart_size(self.entries.len() + 1)?;
        }

        if new_quantity > product.stock {
            return Err(CoreError::InsufficientStock {
                product: product.name.clone(),
                available: product.stock,
                requested: new_quantity,
            });
        }

        self.entries.insert(
            product.id.clone(),
            SessionCartEntry {
                quantity: new_quantity,
                price: product.current_price(),
            },
        );
        Ok(())
    }

    /// Removes a product. Returns whether it was present.
    pub fn remove(&mut self, product_id: &str) -> bool {
        self.entries.remove(product_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Total number of units (not distinct products).
    pub fn len(&self) -> i64 {
        self.entries.values().map(|e| e.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, product_id: &str) -> Option<&SessionCartEntry> {
        self.entries.get(product_id)
    }

    pub fn product_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sum of frozen prices × quantities.
    pub fn total_price(&self) -> Money {
        self.entries
            .values()
            .map(|e| e.price.multiply_quantity(e.quantity))
            .sum()
    }

    /// Priced lines using the frozen unit prices.
    ///
    /// Entries whose product is not in `products` (deleted since it was
    /// added) are skipped.
    pub fn lines(&self, products: &[Product]) -> Vec<CartLine> {
        products
            .iter()
            .filter_map(|p| {
                self.entries.get(&p.id).map(|e| CartLine {
                    product_id: p.id.clone(),
                    product_name: p.name.clone(),
                    unit_price: e.price,
                    quantity: e.quantity,
                })
            })
            .collect()
    }

    /// Serializes for session storage.
    pub fn to_session_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// Reads a cart back from session storage.
    pub fn from_session_value(value: &serde_json::Value) -> CoreResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| {
            CoreError::from(ValidationError::InvalidFormat {
                field: "session cart".to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// `Money` as the decimal string stored in the session (`"6000"`).
///
/// Accepts legacy values with a fractional part (`"6000.00"`).
mod price_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::money::Money;

    pub fn serialize<S: Serializer>(price: &Money, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&price.pesos().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Money, D::Error> {
        let raw = String::deserialize(d)?;
        let whole = raw.trim().split('.').next().unwrap_or_default();
        whole
            .parse::<i64>()
            .map(Money::from_pesos)
            .map_err(|_| de::Error::custom(format!("invalid price '{}'", raw)))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::product;
    use crate::coupon::tests::coupon;
    use crate::coupon::DiscountType;

    fn line(id: &str, price: i64, qty: i64) -> CartLine {
        CartLine {
            product_id: id.to_string(),
            product_name: id.to_string(),
            unit_price: Money::from_pesos(price),
            quantity: qty,
        }
    }

    fn totals(lines: &[CartLine]) -> CartTotals {
        CartTotals::compute(lines, None, &ShippingPolicy::default(), Utc::now())
    }

    #[test]
    fn test_two_at_6000_pays_shipping() {
        let t = totals(&[line("a", 6000, 2)]);
        assert_eq!(t.total_items, 2);
        assert_eq!(t.subtotal.pesos(), 12000);
        assert_eq!(t.shipping.pesos(), 3000);
        assert_eq!(t.total.pesos(), 15000);
    }

    #[test]
    fn test_free_shipping_boundary_is_inclusive() {
        let t = totals(&[line("a", 5000, 1), line("b", 10000, 1)]);
        assert_eq!(t.subtotal.pesos(), 15000);
        assert!(t.shipping.is_zero());
        assert_eq!(t.total.pesos(), 15000);

        let t = totals(&[line("a", 14999, 1)]);
        assert_eq!(t.shipping.pesos(), 3000);
    }

    #[test]
    fn test_total_matches_sum_of_live_prices() {
        let mut a = product("a", 6990, 10);
        a.is_on_sale = true;
        a.discount_percentage_bps = Some(1000);
        let b = product("b", 4500, 10);
        let lines = vec![CartLine::live(&a, 3), CartLine::live(&b, 1)];
        let expected = a.current_price() * 3 + b.current_price();
        assert_eq!(totals(&lines).subtotal, expected);
    }

    #[test]
    fn test_coupon_discount_and_threshold_on_pre_discount_subtotal() {
        let c = coupon(DiscountType::Percentage, 10);
        let lines = [line("a", 15000, 1)];
        let t = CartTotals::compute(&lines, Some(&c), &ShippingPolicy::default(), Utc::now());
        assert_eq!(t.discount.pesos(), 1500);
        assert!(t.shipping.is_zero());
        assert_eq!(t.total.pesos(), 13500);
        assert_eq!(t.coupon_code.as_deref(), Some("DULCE10"));
    }

    #[test]
    fn test_free_shipping_coupon_waives_shipping() {
        let c = coupon(DiscountType::FreeShipping, 0);
        let lines = [line("a", 6000, 1)];
        let t = CartTotals::compute(&lines, Some(&c), &ShippingPolicy::default(), Utc::now());
        assert!(t.shipping.is_zero());
        assert_eq!(t.total.pesos(), 6000);
    }

    #[test]
    fn test_inapplicable_coupon_is_ignored() {
        let mut c = coupon(DiscountType::FixedAmount, 2000);
        c.minimum_order_amount = 20000;
        let lines = [line("a", 6000, 1)];
        let t = CartTotals::compute(&lines, Some(&c), &ShippingPolicy::default(), Utc::now());
        assert!(t.discount.is_zero());
        assert!(t.coupon_code.is_none());
        assert_eq!(t.total.pesos(), 9000);
    }

    #[test]
    fn test_session_cart_freezes_price() {
        let mut p = product("a", 6000, 10);
        let mut cart = SessionCart::new();
        cart.add(&p, 2, false).unwrap();

        p.price = 8000;
        let lines = cart.lines(std::slice::from_ref(&p));
        assert_eq!(lines[0].unit_price.pesos(), 6000);
        assert_eq!(cart.total_price().pesos(), 12000);

        let t = totals(&lines);
        assert_eq!(t.shipping.pesos(), 3000);
    }

    #[test]
    fn test_session_cart_add_and_override() {
        let p = product("a", 1000, 10);
        let mut cart = SessionCart::new();
        cart.add(&p, 2, false).unwrap();
        cart.add(&p, 3, false).unwrap();
        assert_eq!(cart.len(), 5);
        cart.add(&p, 1, true).unwrap();
        assert_eq!(cart.len(), 1);
        assert!(cart.remove("a"));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_session_cart_rejects_beyond_stock() {
        let p = product("a", 1000, 2);
        let mut cart = SessionCart::new();
        assert!(matches!(
            cart.add(&p, 3, false),
            Err(CoreError::InsufficientStock { available: 2, .. })
        ));
    }

    #[test]
    fn test_session_json_shape() {
        let p = product("42", 6000, 10);
        let mut cart = SessionCart::new();
        cart.add(&p, 2, false).unwrap();

        let value = cart.to_session_value();
        assert_eq!(value, serde_json::json!({"42": {"quantity": 2, "price": "6000"}}));

        let legacy = serde_json::json!({"42": {"quantity": 1, "price": "6000.00"}});
        let restored = SessionCart::from_session_value(&legacy).unwrap();
        assert_eq!(restored.get("42").unwrap().price.pesos(), 6000);

        assert!(SessionCart::from_session_value(&serde_json::Value::Null)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_session_lines_skip_missing_products() {
        let a = product("a", 1000, 10);
        let b = product("b", 2000, 10);
        let mut cart = SessionCart::new();
        cart.add(&a, 1, false).unwrap();
        cart.add(&b, 1, false).unwrap();
        let lines = cart.lines(std::slice::from_ref(&b));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].product_id, "b");
    }
}
