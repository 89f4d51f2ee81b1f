//! # Catalog Types
//!
//! Products, categories and tax configuration, plus the computed pricing
//! the rest of the shop reads: the discounted `current_price` and the IVA
//! breakdown.
//!
//! ## Pricing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Product Pricing                                    │
//! │                                                                         │
//! │  price (base) ──► is_on_sale? ──no──────────────────► current_price    │
//! │                       │                                                 │
//! │                      yes                                                │
//! │                       ▼                                                 │
//! │         discount_price in (0, price)? ──yes──────────► current_price    │
//! │                       │                                                 │
//! │                       no                                                │
//! │                       ▼                                                 │
//! │         discount_percentage in (0, 100%]? ──yes──► price - pct ──►      │
//! │                       │                                                 │
//! │                       no ──────────────────────────► price              │
//! │                                                                         │
//! │  current_price ──► TaxConfiguration (or IVA default) ──► TaxBreakdown  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points (1 bps = 0.01%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Chilean IVA, 19%.
    pub const IVA: TaxRate = TaxRate(1900);

    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Rate as a percentage, for display only.
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::IVA
    }
}

// =============================================================================
// Tax Configuration
// =============================================================================

/// A named tax rule products can point at.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct TaxConfiguration {
    pub id: String,
    pub name: String,
    /// Rate in basis points (1900 = 19%).
    pub rate_bps: u32,
    /// Catalog prices already include this tax (the Chilean norm).
    pub prices_include_tax: bool,
    pub is_active: bool,
}

impl TaxConfiguration {
    /// Default configuration applied to products without one.
    pub fn iva() -> Self {
        TaxConfiguration {
            id: "iva".to_string(),
            name: "IVA 19%".to_string(),
            rate_bps: TaxRate::IVA.bps(),
            prices_include_tax: true,
            is_active: true,
        }
    }

    #[inline]
    pub fn rate(&self) -> TaxRate {
        TaxRate::from_bps(self.rate_bps)
    }

    /// Breaks an amount down into net, tax and gross under this rule.
    pub fn breakdown(&self, amount: Money) -> TaxBreakdown {
        if !self.is_active || self.rate().is_zero() {
            return TaxBreakdown::exempt(amount);
        }

        if self.prices_include_tax {
            let (net, tax) = amount.split_inclusive_tax(self.rate());
            TaxBreakdown {
                net,
                tax,
                gross: amount,
                rate_bps: self.rate_bps,
            }
        } else {
            let tax = amount.calculate_tax(self.rate());
            TaxBreakdown {
                net: amount,
                tax,
                gross: amount + tax,
                rate_bps: self.rate_bps,
            }
        }
    }
}

/// Net / tax / gross split of an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxBreakdown {
    pub net: Money,
    pub tax: Money,
    pub gross: Money,
    pub rate_bps: u32,
}

impl TaxBreakdown {
    pub fn exempt(amount: Money) -> Self {
        TaxBreakdown {
            net: amount,
            tax: Money::zero(),
            gross: amount,
            rate_bps: 0,
        }
    }
}

// =============================================================================
// Category
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Product
// =============================================================================

/// A cookie (or box of cookies) for sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4). Also the session cart key.
    pub id: String,

    pub category_id: Option<String>,

    pub name: String,

    /// URL slug, unique.
    pub slug: String,

    pub description: Option<String>,

    /// Base price in pesos.
    pub price: i64,

    /// Whether the discount fields below apply.
    pub is_on_sale: bool,

    /// Percentage discount in basis points (1500 = 15%).
    pub discount_percentage_bps: Option<u32>,

    /// Fixed sale price in pesos. Wins over the percentage when both are set.
    pub discount_price: Option<i64>,

    /// Units on hand. Only the stock ledger changes this.
    pub stock: i64,

    /// Listed in the storefront and purchasable.
    pub available: bool,

    pub featured: bool,

    pub weight_grams: Option<i64>,

    pub tax_configuration_id: Option<String>,

    pub is_tax_exempt: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Base price as Money.
    #[inline]
    pub fn base_price(&self) -> Money {
        Money::from_pesos(self.price)
    }

    /// Price the customer pays right now.
    pub fn current_price(&self) -> Money {
        if !self.is_on_sale {
            return self.base_price();
        }

        if let Some(fixed) = self.discount_price {
            if fixed > 0 && fixed < self.price {
                return Money::from_pesos(fixed);
            }
        }

        match self.discount_percentage_bps {
            Some(bps) if bps > 0 && bps <= 10_000 => {
                self.base_price() - self.base_price().percentage(bps)
            }
            _ => self.base_price(),
        }
    }

    /// True when a discount actually lowers the price.
    pub fn has_discount(&self) -> bool {
        self.current_price() < self.base_price()
    }

    /// Amount saved per unit.
    pub fn savings(&self) -> Money {
        self.base_price() - self.current_price()
    }

    /// IVA breakdown of the current price.
    ///
    /// `config` is the product's own tax configuration when it has one;
    /// callers pass `None` to fall back to [`TaxConfiguration::iva`].
    pub fn tax_breakdown(&self, config: Option<&TaxConfiguration>) -> TaxBreakdown {
        let price = self.current_price();
        if self.is_tax_exempt {
            return TaxBreakdown::exempt(price);
        }
        match config {
            Some(config) => config.breakdown(price),
            None => TaxConfiguration::iva().breakdown(price),
        }
    }

    /// Whether `quantity` more units can be put in a cart.
    pub fn can_purchase(&self, quantity: i64) -> bool {
        self.available && quantity > 0 && self.stock >= quantity
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn product(id: &str, price: i64, stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            category_id: None,
            name: format!("Galleta {}", id),
            slug: format!("galleta-{}", id),
            description: None,
            price,
            is_on_sale: false,
            discount_percentage_bps: None,
            discount_price: None,
            stock,
            available: true,
            featured: false,
            weight_grams: Some(120),
            tax_configuration_id: None,
            is_tax_exempt: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_current_price_without_sale() {
        let mut p = product("a", 6000, 10);
        p.discount_price = Some(4000);
        assert_eq!(p.current_price().pesos(), 6000);
        assert!(!p.has_discount());
    }

    #[test]
    fn test_fixed_discount_wins() {
        let mut p = product("a", 6000, 10);
        p.is_on_sale = true;
        p.discount_price = Some(4990);
        p.discount_percentage_bps = Some(5000);
        assert_eq!(p.current_price().pesos(), 4990);
        assert_eq!(p.savings().pesos(), 1010);
    }

    #[test]
    fn test_fixed_discount_above_price_is_ignored() {
        let mut p = product("a", 6000, 10);
        p.is_on_sale = true;
        p.discount_price = Some(7000);
        assert_eq!(p.current_price().pesos(), 6000);
    }

    #[test]
    fn test_percentage_discount() {
        let mut p = product("a", 6990, 10);
        p.is_on_sale = true;
        p.discount_percentage_bps = Some(1500);
        // 15% of 6990 = 1048.5 → 1049
        assert_eq!(p.current_price().pesos(), 5941);
    }

    #[test]
    fn test_tax_breakdown_inclusive_default() {
        let p = product("a", 11900, 1);
        let b = p.tax_breakdown(None);
        assert_eq!(b.net.pesos(), 10000);
        assert_eq!(b.tax.pesos(), 1900);
        assert_eq!(b.gross.pesos(), 11900);
    }

    #[test]
    fn test_tax_breakdown_exclusive_and_exempt() {
        let p = product("a", 10000, 1);
        let config = TaxConfiguration {
            prices_include_tax: false,
            ..TaxConfiguration::iva()
        };
        let b = p.tax_breakdown(Some(&config));
        assert_eq!(b.gross.pesos(), 11900);

        let mut exempt = product("b", 10000, 1);
        exempt.is_tax_exempt = true;
        assert!(exempt.tax_breakdown(Some(&config)).tax.is_zero());
    }

    #[test]
    fn test_can_purchase() {
        let mut p = product("a", 1000, 3);
        assert!(p.can_purchase(3));
        assert!(!p.can_purchase(4));
        assert!(!p.can_purchase(0));
        p.available = false;
        assert!(!p.can_purchase(1));
    }
}
