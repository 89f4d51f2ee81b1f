//! # Validation Module
//!
//! Input validation for cart and checkout operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Storefront forms                                             │
//! │  └── Basic format checks, immediate feedback                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Services (Rust)                                              │
//! │  └── THIS MODULE: business rule validation before any write            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE (order_number, coupon code, cart item pair)                │
//! │  └── Foreign keys                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::order::{Region, ShippingAddress};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Requires a non-blank value no longer than `max` characters.
///
/// ```rust
/// use dulce_core::validation::validate_required;
///
/// assert!(validate_required("city", "Santiago", 100).is_ok());
/// assert!(validate_required("city", "   ", 100).is_err());
/// ```
pub fn validate_required(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

/// Minimal email shape check: one `@`, non-empty local part, dotted domain.
pub fn validate_email(email: &str) -> ValidationResult<()> {
    validate_required("email", email, 254)?;

    let invalid = || ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: "must look like name@domain.cl".to_string(),
    };

    let email = email.trim();
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') || email.contains(char::is_whitespace) {
        return Err(invalid());
    }
    let dotted = domain
        .split_once('.')
        .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
        .unwrap_or(false);
    if !dotted {
        return Err(invalid());
    }
    Ok(())
}

/// Phone numbers: digits with optional `+`, spaces and dashes, 8 to 15 digits.
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    validate_required("phone", phone, 20)?;

    let phone = phone.trim();
    let allowed = phone
        .chars()
        .enumerate()
        .all(|(i, c)| c.is_ascii_digit() || c == ' ' || c == '-' || (i == 0 && c == '+'));
    let digits = phone.chars().filter(char::is_ascii_digit).count();

    if !allowed || !(8..=15).contains(&digits) {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must contain 8 to 15 digits".to_string(),
        });
    }
    Ok(())
}

/// Search queries may be empty, up to 100 characters. Returns the trimmed query.
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();
    if query.chars().count() > 100 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 100,
        });
    }
    Ok(query.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Quantity per cart line: 1..=999.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Prices are non-negative whole pesos.
pub fn validate_price(pesos: i64) -> ValidationResult<()> {
    if pesos < 0 {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Transfer amounts must be positive.
pub fn validate_payment_amount(pesos: i64) -> ValidationResult<()> {
    if pesos <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

/// Ticket ratings: 1..=5.
pub fn validate_rating(rating: i64) -> ValidationResult<()> {
    if !(1..=5).contains(&rating) {
        return Err(ValidationError::OutOfRange {
            field: "rating".to_string(),
            min: 1,
            max: 5,
        });
    }
    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Number of distinct products in a cart after an add.
pub fn validate_cart_size(line_count: usize) -> ValidationResult<()> {
    if line_count > MAX_CART_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "cart items".to_string(),
            min: 0,
            max: MAX_CART_ITEMS as i64,
        });
    }
    Ok(())
}

// =============================================================================
// Checkout Address
// =============================================================================

/// Validates the checkout form and returns a trimmed copy.
///
/// Required: first/last name, email, phone, address, city, region.
/// Optional: postal code, notes.
pub fn validate_shipping_address(address: &ShippingAddress) -> ValidationResult<ShippingAddress> {
    validate_required("first_name", &address.first_name, 50)?;
    validate_required("last_name", &address.last_name, 50)?;
    validate_email(&address.email)?;
    validate_phone(&address.phone)?;
    validate_required("address", &address.address, 250)?;
    validate_required("city", &address.city, 100)?;

    if let Some(postal) = address.postal_code.as_deref() {
        if postal.trim().chars().count() > 10 {
            return Err(ValidationError::TooLong {
                field: "postal_code".to_string(),
                max: 10,
            });
        }
    }

    Ok(ShippingAddress {
        first_name: address.first_name.trim().to_string(),
        last_name: address.last_name.trim().to_string(),
        email: address.email.trim().to_lowercase(),
        phone: address.phone.trim().to_string(),
        address: address.address.trim().to_string(),
        city: address.city.trim().to_string(),
        region: address.region,
        postal_code: address
            .postal_code
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        notes: address
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
    })
}

/// Parses a region code from a form value.
pub fn parse_region(value: &str) -> ValidationResult<Region> {
    value.trim().parse()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn address() -> ShippingAddress {
        ShippingAddress {
            first_name: " Katherine ".to_string(),
            last_name: "Rojas".to_string(),
            email: "Kati@Example.CL".to_string(),
            phone: "+56 9 1234 5678".to_string(),
            address: "Av. Providencia 1234".to_string(),
            city: "Santiago".to_string(),
            region: Region::Metropolitana,
            postal_code: Some("  ".to_string()),
            notes: None,
        }
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("kati@dulcebias.cl").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@dulcebias.cl").is_err());
        assert!(validate_email("kati@localhost").is_err());
        assert!(validate_email("a@b@c.cl").is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+56 9 1234 5678").is_ok());
        assert!(validate_phone("912345678").is_ok());
        assert!(validate_phone("12-34").is_err());
        assert!(validate_phone("9123 abc 5678").is_err());
    }

    #[test]
    fn test_shipping_address_is_trimmed() {
        let clean = validate_shipping_address(&address()).unwrap();
        assert_eq!(clean.first_name, "Katherine");
        assert_eq!(clean.email, "kati@example.cl");
        assert!(clean.postal_code.is_none());
    }

    #[test]
    fn test_missing_city_is_rejected() {
        let mut a = address();
        a.city = "  ".to_string();
        let err = validate_shipping_address(&a).unwrap_err();
        assert_eq!(err.to_string(), "city is required");
    }

    #[test]
    fn test_parse_region() {
        assert_eq!(parse_region("rm").unwrap(), Region::Metropolitana);
        assert_eq!(parse_region("viii").unwrap(), Region::Biobio);
        assert!(parse_region("xv").is_err());
    }

    #[test]
    fn test_cart_size_and_rating() {
        assert!(validate_cart_size(MAX_CART_ITEMS).is_ok());
        assert!(validate_cart_size(MAX_CART_ITEMS + 1).is_err());
        assert!(validate_rating(5).is_ok());
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(6).is_err());
    }
}
