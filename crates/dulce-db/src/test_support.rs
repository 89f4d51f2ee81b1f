//! Fixtures shared by the repository tests.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::pool::{Database, DbConfig};
use crate::repository::catalog::NewProduct;
use dulce_core::catalog::Product;
use dulce_core::coupon::{DiscountCoupon, DiscountType};
use dulce_core::order::{Actor, Region, ShippingAddress};

/// Fresh migrated in-memory database.
pub(crate) async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// Product named after its slug.
pub(crate) async fn seed_product(db: &Database, slug: &str, price: i64, stock: i64) -> Product {
    db.catalog()
        .insert_product(NewProduct::new(slug, slug, price, stock), &Actor::system())
        .await
        .unwrap()
}

pub(crate) fn address() -> ShippingAddress {
    ShippingAddress {
        first_name: "Katherine".to_string(),
        last_name: "Rojas".to_string(),
        email: "kati@example.cl".to_string(),
        phone: "+56 9 1234 5678".to_string(),
        address: "Av. Providencia 1234".to_string(),
        city: "Santiago".to_string(),
        region: Region::Metropolitana,
        postal_code: None,
        notes: None,
    }
}

/// Active coupon valid from yesterday until next week.
pub(crate) fn coupon(code: &str, discount_type: DiscountType, value: i64) -> DiscountCoupon {
    let now = Utc::now();
    DiscountCoupon {
        id: Uuid::new_v4().to_string(),
        code: code.to_string(),
        description: None,
        discount_type,
        discount_value: value,
        minimum_order_amount: 0,
        maximum_discount_amount: None,
        max_uses: None,
        current_uses: 0,
        valid_from: now - Duration::days(1),
        valid_until: now + Duration::days(7),
        is_active: true,
    }
}
