//! # Discount Coupons
//!
//! Coupon validity and the discount a coupon grants on a cart subtotal.
//!
//! ```text
//! valid(now) = is_active
//!            ∧ valid_from <= now <= valid_until
//!            ∧ (max_uses is null ∨ current_uses < max_uses)
//!
//! applies(subtotal) = valid(now) ∧ subtotal >= minimum_order_amount
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

/// What a coupon takes off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` percent of the subtotal.
    Percentage,
    /// `discount_value` pesos off.
    FixedAmount,
    /// Shipping is waived; no amount off.
    FreeShipping,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DiscountCoupon {
    pub id: String,
    /// Always stored uppercase.
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    /// Whole percent for `Percentage`, pesos for `FixedAmount`.
    pub discount_value: i64,
    pub minimum_order_amount: i64,
    /// Cap for percentage coupons.
    pub maximum_discount_amount: Option<i64>,
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    #[ts(as = "String")]
    pub valid_from: DateTime<Utc>,
    #[ts(as = "String")]
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
}

/// Normalizes a code typed by a customer.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl DiscountCoupon {
    /// Validity at `now`, ignoring the order amount.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.valid_from <= now
            && now <= self.valid_until
            && !self.usage_exhausted()
    }

    pub fn usage_exhausted(&self) -> bool {
        matches!(self.max_uses, Some(max) if self.current_uses >= max)
    }

    #[inline]
    pub fn minimum_order(&self) -> Money {
        Money::from_pesos(self.minimum_order_amount)
    }

    /// Checks the coupon can be applied to `subtotal`, naming the reason
    /// when it cannot.
    pub fn check_applicable(&self, subtotal: Money, now: DateTime<Utc>) -> CoreResult<()> {
        if self.usage_exhausted() {
            return Err(CoreError::CouponUsageLimitReached {
                code: self.code.clone(),
            });
        }
        if !self.is_valid_at(now) {
            return Err(CoreError::CouponNotValid {
                code: self.code.clone(),
            });
        }
        if subtotal < self.minimum_order() {
            return Err(CoreError::CouponMinimumNotMet {
                code: self.code.clone(),
                minimum: self.minimum_order().to_string(),
            });
        }
        Ok(())
    }

    /// True when the coupon is valid and the subtotal meets the minimum.
    pub fn applies_to(&self, subtotal: Money, now: DateTime<Utc>) -> bool {
        self.check_applicable(subtotal, now).is_ok()
    }

    /// Amount taken off `subtotal`. Zero when the coupon does not apply.
    pub fn discount_for(&self, subtotal: Money, now: DateTime<Utc>) -> Money {
        if !self.applies_to(subtotal, now) {
            return Money::zero();
        }

        let discount = match self.discount_type {
            DiscountType::Percentage => {
                let raw = subtotal.percent_floor(self.discount_value);
                match self.maximum_discount_amount {
                    Some(cap) => raw.min(Money::from_pesos(cap)),
                    None => raw,
                }
            }
            DiscountType::FixedAmount => Money::from_pesos(self.discount_value),
            DiscountType::FreeShipping => Money::zero(),
        };

        discount.min(subtotal)
    }

    /// True when this coupon waives shipping for `subtotal`.
    pub fn grants_free_shipping(&self, subtotal: Money, now: DateTime<Utc>) -> bool {
        self.discount_type == DiscountType::FreeShipping && self.applies_to(subtotal, now)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn coupon(kind: DiscountType, value: i64) -> DiscountCoupon {
        let now = Utc::now();
        DiscountCoupon {
            id: "c1".to_string(),
            code: "DULCE10".to_string(),
            description: None,
            discount_type: kind,
            discount_value: value,
            minimum_order_amount: 0,
            maximum_discount_amount: None,
            max_uses: None,
            current_uses: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
            is_active: true,
        }
    }

    #[test]
    fn test_expired_coupon_is_invalid_even_if_active() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.valid_until = Utc::now() - Duration::hours(1);
        assert!(c.is_active);
        assert!(!c.is_valid_at(Utc::now()));
        assert!(matches!(
            c.check_applicable(Money::from_pesos(20000), Utc::now()),
            Err(CoreError::CouponNotValid { .. })
        ));
    }

    #[test]
    fn test_not_yet_valid() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.valid_from = Utc::now() + Duration::days(1);
        assert!(!c.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_usage_limit() {
        let mut c = coupon(DiscountType::FixedAmount, 1000);
        c.max_uses = Some(2);
        c.current_uses = 1;
        assert!(c.is_valid_at(Utc::now()));
        c.current_uses = 2;
        assert!(!c.is_valid_at(Utc::now()));
        assert!(matches!(
            c.check_applicable(Money::from_pesos(5000), Utc::now()),
            Err(CoreError::CouponUsageLimitReached { .. })
        ));
    }

    #[test]
    fn test_percentage_discount_with_cap() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Percentage, 10);
        assert_eq!(c.discount_for(Money::from_pesos(12990), now).pesos(), 1299);

        c.maximum_discount_amount = Some(1000);
        assert_eq!(c.discount_for(Money::from_pesos(12990), now).pesos(), 1000);
    }

    #[test]
    fn test_minimum_order_amount() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::FixedAmount, 2000);
        c.minimum_order_amount = 10000;
        assert!(c.discount_for(Money::from_pesos(9999), now).is_zero());
        assert_eq!(c.discount_for(Money::from_pesos(10000), now).pesos(), 2000);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_subtotal() {
        let c = coupon(DiscountType::FixedAmount, 5000);
        assert_eq!(c.discount_for(Money::from_pesos(3000), Utc::now()).pesos(), 3000);
    }

    #[test]
    fn test_free_shipping_coupon() {
        let now = Utc::now();
        let c = coupon(DiscountType::FreeShipping, 0);
        assert!(c.discount_for(Money::from_pesos(8000), now).is_zero());
        assert!(c.grants_free_shipping(Money::from_pesos(8000), now));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  dulce10 "), "DULCE10");
    }
}
