//! # Money Module
//!
//! Provides the `Money` type for Chilean peso amounts.
//!
//! ## Whole Pesos Only
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CLP HAS NO MINOR UNIT                                                  │
//! │                                                                         │
//! │  A cookie box costs $6.000, never $6.000,50.                            │
//! │  Every amount in the shop (prices, discounts, shipping, totals) is      │
//! │  an integer number of pesos stored as i64.                              │
//! │                                                                         │
//! │  Percentages and tax rates are basis points (1900 = 19% IVA) so the     │
//! │  only place rounding happens is the explicit helpers below.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use dulce_core::money::Money;
//!
//! let price = Money::from_pesos(6000);
//! let line = price * 2;
//! assert_eq!(line.pesos(), 12000);
//! assert_eq!(line.to_string(), "$12.000");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::catalog::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in whole Chilean pesos.
///
/// ## Where Money is Used
/// ```text
/// Product.price ──► current_price ──► CartLine.line_total ──► subtotal
///                                                               │
///                         coupon discount ◄─────────────────────┤
///                         shipping rule   ◄─────────────────────┘
///                                │
///                                ▼
///                          Order.total
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from whole pesos.
    #[inline]
    pub const fn from_pesos(pesos: i64) -> Self {
        Money(pesos)
    }

    /// Returns the value in pesos.
    #[inline]
    pub const fn pesos(&self) -> i64 {
        self.0
    }

    /// Zero pesos.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies a unit price by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Returns `bps` basis points of this amount, rounded half up.
    ///
    /// ```rust
    /// use dulce_core::money::Money;
    ///
    /// // 15% of $6.990 = 1048.5 → 1049
    /// assert_eq!(Money::from_pesos(6990).percentage(1500).pesos(), 1049);
    /// ```
    pub fn percentage(&self, bps: u32) -> Money {
        let value = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money(value as i64)
    }

    /// Returns `percent` whole percent of this amount, truncated toward zero.
    ///
    /// Used for coupon discounts; the fractional peso is dropped.
    pub fn percent_floor(&self, percent: i64) -> Money {
        Money(((self.0 as i128 * percent as i128) / 100) as i64)
    }

    /// Tax added on top of a tax-exclusive amount (rounded half up).
    ///
    /// ```rust
    /// use dulce_core::money::Money;
    /// use dulce_core::catalog::TaxRate;
    ///
    /// let tax = Money::from_pesos(10000).calculate_tax(TaxRate::IVA);
    /// assert_eq!(tax.pesos(), 1900);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        self.percentage(rate.bps())
    }

    /// Splits a tax-inclusive amount into `(net, tax)`.
    ///
    /// `net = round(gross * 10000 / (10000 + bps))` and `tax = gross - net`,
    /// so the two parts always add back up to the original amount.
    pub fn split_inclusive_tax(&self, rate: TaxRate) -> (Money, Money) {
        if rate.is_zero() {
            return (*self, Money::zero());
        }
        let divisor = 10000i128 + rate.bps() as i128;
        let net = (self.0 as i128 * 10000 * 2 + divisor) / (divisor * 2);
        let net = Money(net as i64);
        (net, *self - net)
    }

    /// Returns the smaller of two amounts.
    #[inline]
    pub fn min(self, other: Money) -> Money {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Chilean formatting: `$` prefix and `.` as the thousands separator.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}", sign, grouped)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl From<i64> for Money {
    fn from(pesos: i64) -> Self {
        Money(pesos)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_groups_thousands() {
        assert_eq!(Money::from_pesos(0).to_string(), "$0");
        assert_eq!(Money::from_pesos(990).to_string(), "$990");
        assert_eq!(Money::from_pesos(3000).to_string(), "$3.000");
        assert_eq!(Money::from_pesos(1234567).to_string(), "$1.234.567");
        assert_eq!(Money::from_pesos(-15000).to_string(), "-$15.000");
    }

    #[test]
    fn test_arithmetic() {
        let mut total = Money::from_pesos(6000) * 2;
        total += Money::from_pesos(3000);
        total -= Money::from_pesos(1000);
        assert_eq!(total.pesos(), 14000);
    }

    #[test]
    fn test_sum() {
        let total: Money = [1000, 2500, 500].into_iter().map(Money::from_pesos).sum();
        assert_eq!(total, Money::from_pesos(4000));
    }

    #[test]
    fn test_percentage_rounds_half_up() {
        assert_eq!(Money::from_pesos(1000).percentage(1000).pesos(), 100);
        assert_eq!(Money::from_pesos(6990).percentage(1500).pesos(), 1049);
        assert_eq!(Money::from_pesos(5).percentage(1000).pesos(), 1); // 0.5 → 1
    }

    #[test]
    fn test_percent_floor_truncates() {
        assert_eq!(Money::from_pesos(12990).percent_floor(10).pesos(), 1299);
        assert_eq!(Money::from_pesos(999).percent_floor(15).pesos(), 149);
    }

    #[test]
    fn test_inclusive_tax_split_adds_up() {
        let gross = Money::from_pesos(11900);
        let (net, tax) = gross.split_inclusive_tax(TaxRate::IVA);
        assert_eq!(net.pesos(), 10000);
        assert_eq!(tax.pesos(), 1900);

        for amount in [1, 990, 4590, 6990, 12345] {
            let gross = Money::from_pesos(amount);
            let (net, tax) = gross.split_inclusive_tax(TaxRate::IVA);
            assert_eq!(net + tax, gross);
        }
    }

    #[test]
    fn test_zero_rate_split() {
        let (net, tax) = Money::from_pesos(5000).split_inclusive_tax(TaxRate::zero());
        assert_eq!(net.pesos(), 5000);
        assert!(tax.is_zero());
    }
}
