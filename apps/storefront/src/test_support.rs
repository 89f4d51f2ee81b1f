//! Fixtures shared by the storefront tests.

use uuid::Uuid;

use dulce_core::cart::CartLine;
use dulce_core::catalog::Product;
use dulce_core::order::{Actor, Order, PaymentMethod, Region, ShippingAddress};
use dulce_db::{CheckoutRequest, CheckoutSource, Database, DbConfig, NewProduct};

use crate::config::StorefrontConfig;
use crate::Storefront;

pub(crate) async fn test_storefront() -> Storefront {
    test_storefront_with(StorefrontConfig::default()).await
}

/// Storefront over a fresh migrated in-memory database.
pub(crate) async fn test_storefront_with(config: StorefrontConfig) -> Storefront {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Storefront::new(db, config)
}

pub(crate) async fn seed_product(sf: &Storefront, slug: &str, price: i64, stock: i64) -> Product {
    sf.db()
        .catalog()
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

/// A committed transfer order for two units at 6000, from the user's cart
/// or, for `None`, from a guest session.
pub(crate) async fn placed_order(sf: &Storefront, user_id: Option<&str>) -> Order {
    let slug = format!("chocolate-{}", Uuid::new_v4().simple());
    let product = seed_product(sf, &slug, 6000, 20).await;

    let source = match user_id {
        Some(user) => {
            sf.db().carts().add_item(user, &product.id, 2).await.unwrap();
            CheckoutSource::UserCart
        }
        None => CheckoutSource::Session(vec![CartLine::live(&product, 2)]),
    };
    let request = CheckoutRequest {
        user_id: user_id.map(str::to_string),
        address: address(),
        payment_method: PaymentMethod::Transfer,
        source,
    };
    sf.db()
        .orders()
        .checkout(&request, &sf.config().checkout_settings())
        .await
        .unwrap()
        .order
}
