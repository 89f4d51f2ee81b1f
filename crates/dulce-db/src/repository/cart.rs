//! # Cart Repository
//!
//! The authenticated cart: one row per user, created on first use, with one
//! item per product. Prices are never stored on cart items; every read
//! prices the lines from the live product.
//!
//! ## Add Item Rules
//! ```text
//! product missing      → ProductNotFound
//! product unavailable  → ProductUnavailable
//! quantity ∉ 1..=999   → Validation (out of range)
//! > 100 distinct lines → Validation (cart items)
//! quantity > stock     → InsufficientStock
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbResult;
use crate::repository::{begin_write, coupon};
use dulce_core::cart::{Cart, CartItem, CartLine, CartTotals, ShippingPolicy};
use dulce_core::catalog::Product;
use dulce_core::coupon::DiscountCoupon;
use dulce_core::money::Money;
use dulce_core::validation::{validate_cart_size, validate_quantity};
use dulce_core::CoreError;

/// A cart priced at the live catalog prices.
#[derive(Debug, Clone, Serialize)]
pub struct PricedCart {
    pub cart: Cart,
    pub lines: Vec<CartLine>,
    pub coupon: Option<DiscountCoupon>,
    pub totals: CartTotals,
}

#[derive(sqlx::FromRow)]
struct CartProductRow {
    #[sqlx(flatten)]
    product: Product,
    cart_quantity: i64,
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn find_cart(conn: &mut SqliteConnection, user_id: &str) -> DbResult<Option<Cart>> {
    let cart = sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(cart)
}

async fn get_or_create_in(conn: &mut SqliteConnection, user_id: &str) -> DbResult<Cart> {
    if let Some(cart) = find_cart(conn, user_id).await? {
        return Ok(cart);
    }

    let now = Utc::now();
    sqlx::query(
        "INSERT INTO carts (id, user_id, coupon_id, created_at, updated_at) VALUES (?, ?, NULL, ?, ?) ON CONFLICT(user_id) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(user_id = %user_id, "Cart created");
    find_cart(conn, user_id)
        .await?
        .ok_or_else(|| crate::error::DbError::not_found("Cart", user_id))
}

/// Cart products with their quantities, in the order they were added.
async fn load_products(
    conn: &mut SqliteConnection,
    cart_id: &str,
) -> DbResult<Vec<(Product, i64)>> {
    let rows = sqlx::query_as::<_, CartProductRow>(
        r#"
        SELECT p.*, ci.quantity AS cart_quantity
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = ?
        ORDER BY ci.added_at, ci.rowid
        "#,
    )
    .bind(cart_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(|r| (r.product, r.cart_quantity)).collect())
}

/// Lines priced at the live `current_price`.
pub(crate) async fn load_lines(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<Vec<CartLine>> {
    Ok(load_products(conn, cart_id)
        .await?
        .iter()
        .map(|(product, quantity)| CartLine::live(product, *quantity))
        .collect())
}

/// Empties the cart and drops its coupon.
pub(crate) async fn clear_in(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM cart_items WHERE cart_id = ?")
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE carts SET coupon_id = NULL, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn touch(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<()> {
    sqlx::query("UPDATE carts SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// The user's cart, created on first access.
    pub async fn get_or_create(&self, user_id: &str) -> DbResult<Cart> {
        let mut conn = self.pool.acquire().await?;
        get_or_create_in(&mut conn, user_id).await
    }

    pub async fn items(&self, cart_id: &str) -> DbResult<Vec<CartItem>> {
        let rows = sqlx::query_as::<_, CartItem>(
            "SELECT * FROM cart_items WHERE cart_id = ? ORDER BY added_at, rowid",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Adds `quantity` units to the line for `product_id`.
    pub async fn add_item(&self, user_id: &str, product_id: &str, quantity: i64) -> DbResult<CartItem> {
        self.put_item(user_id, product_id, quantity, false).await
    }

    /// Sets the line quantity; zero or less removes the line.
    ///
    /// Returns `None` when the line was removed.
    pub async fn set_quantity(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> DbResult<Option<CartItem>> {
        if quantity <= 0 {
            self.remove_item(user_id, product_id).await?;
            return Ok(None);
        }
        self.put_item(user_id, product_id, quantity, true).await.map(Some)
    }

    async fn put_item(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: i64,
        override_quantity: bool,
    ) -> DbResult<CartItem> {
        let mut tx = begin_write(&self.pool).await?;
        let cart = get_or_create_in(&mut tx, user_id).await?;

        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

        if !product.available {
            return Err(CoreError::ProductUnavailable {
                product: product.name,
            }
            .into());
        }

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM cart_items WHERE cart_id = ? AND product_id = ?",
        )
        .bind(&cart.id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let new_quantity = match (override_quantity, existing) {
            (true, _) | (false, None) => quantity,
            (false, Some(current)) => current + quantity,
        };
        validate_quantity(new_quantity)?;

        if existing.is_none() {
            let lines: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_items WHERE cart_id = ?")
                .bind(&cart.id)
                .fetch_one(&mut *tx)
                .await?;
            validate_cart_size(lines as usize + 1)?;
        }

        if new_quantity > product.stock {
            return Err(CoreError::InsufficientStock {
                product: product.name,
                available: product.stock,
                requested: new_quantity,
            }
            .into());
        }

        let item = sqlx::query_as::<_, CartItem>(
            r#"
            INSERT INTO cart_items (id, cart_id, product_id, quantity, added_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(cart_id, product_id) DO UPDATE SET quantity = excluded.quantity
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&cart.id)
        .bind(product_id)
        .bind(new_quantity)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        touch(&mut tx, &cart.id).await?;
        tx.commit().await?;

        debug!(user_id = %user_id, product_id = %product_id, quantity = new_quantity, "Cart line updated");
        Ok(item)
    }

    /// Returns whether a line was removed.
    pub async fn remove_item(&self, user_id: &str, product_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM cart_items
            WHERE product_id = ? AND cart_id = (SELECT id FROM carts WHERE user_id = ?)
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(&self, user_id: &str) -> DbResult<()> {
        let mut tx = begin_write(&self.pool).await?;
        if let Some(cart) = find_cart(&mut tx, user_id).await? {
            clear_in(&mut tx, &cart.id).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Attaches a coupon after checking it against the current subtotal.
    pub async fn apply_coupon(
        &self,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> DbResult<DiscountCoupon> {
        let coupon = sqlx::query_as::<_, DiscountCoupon>(
            "SELECT * FROM discount_coupons WHERE code = ?",
        )
        .bind(dulce_core::coupon::normalize_code(code))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::CouponNotFound {
            code: code.trim().to_uppercase(),
        })?;

        let mut tx = begin_write(&self.pool).await?;
        let cart = get_or_create_in(&mut tx, user_id).await?;
        let subtotal: Money = load_lines(&mut tx, &cart.id)
            .await?
            .iter()
            .map(CartLine::line_total)
            .sum();
        coupon.check_applicable(subtotal, now)?;

        sqlx::query("UPDATE carts SET coupon_id = ?, updated_at = ? WHERE id = ?")
            .bind(&coupon.id)
            .bind(now)
            .bind(&cart.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user_id = %user_id, code = %coupon.code, "Coupon applied to cart");
        Ok(coupon)
    }

    pub async fn remove_coupon(&self, user_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE carts SET coupon_id = NULL, updated_at = ? WHERE user_id = ?")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The cart with live prices and totals.
    pub async fn priced(
        &self,
        user_id: &str,
        shipping: &ShippingPolicy,
        now: DateTime<Utc>,
    ) -> DbResult<PricedCart> {
        let mut conn = self.pool.acquire().await?;
        let cart = get_or_create_in(&mut conn, user_id).await?;
        let lines = load_lines(&mut conn, &cart.id).await?;
        let coupon = match cart.coupon_id.as_deref() {
            Some(id) => coupon::get_in(&mut conn, id).await?,
            None => None,
        };
        let totals = CartTotals::compute(&lines, coupon.as_ref(), shipping, now);

        Ok(PricedCart {
            cart,
            lines,
            coupon,
            totals,
        })
    }

    /// Drops lines whose product was unlisted. Deleted products cascade on
    /// their own. Returns the number of lines removed.
    pub async fn purge_unavailable(&self, user_id: &str) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM cart_items
            WHERE cart_id = (SELECT id FROM carts WHERE user_id = ?)
              AND product_id NOT IN (SELECT id FROM products WHERE available = 1)
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(user_id = %user_id, removed, "Removed unavailable products from cart");
        }
        Ok(removed)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support::{coupon, seed_product, test_db};
    use dulce_core::coupon::DiscountType;

    #[tokio::test]
    async fn test_cart_is_created_lazily_once() {
        let db = test_db().await;
        let a = db.carts().get_or_create("u1").await.unwrap();
        let b = db.carts().get_or_create("u1").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_add_accumulates_and_prices_live() {
        let db = test_db().await;
        let product = seed_product(&db, "chips", 6000, 10).await;

        db.carts().add_item("u1", &product.id, 1).await.unwrap();
        let item = db.carts().add_item("u1", &product.id, 1).await.unwrap();
        assert_eq!(item.quantity, 2);

        let priced = db
            .carts()
            .priced("u1", &ShippingPolicy::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(priced.totals.subtotal.pesos(), 12000);
        assert_eq!(priced.totals.shipping.pesos(), 3000);
        assert_eq!(priced.totals.total.pesos(), 15000);

        // Live price: a sale shows up immediately.
        db.catalog().set_sale(&product.id, None, Some(5000)).await.unwrap();
        let priced = db
            .carts()
            .priced("u1", &ShippingPolicy::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(priced.totals.subtotal.pesos(), 10000);
    }

    #[tokio::test]
    async fn test_add_rules() {
        let db = test_db().await;
        let product = seed_product(&db, "avena", 1000, 3).await;

        let err = db.carts().add_item("u1", &product.id, 4).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InsufficientStock { .. })));

        let err = db.carts().add_item("u1", "missing", 1).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::ProductNotFound(_))));

        assert!(db.carts().add_item("u1", &product.id, 0).await.is_err());

        db.catalog().set_available(&product.id, false).await.unwrap();
        let err = db.carts().add_item("u1", &product.id, 1).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::ProductUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_set_quantity_zero_removes() {
        let db = test_db().await;
        let product = seed_product(&db, "nuez", 1000, 10).await;
        db.carts().add_item("u1", &product.id, 2).await.unwrap();

        let updated = db.carts().set_quantity("u1", &product.id, 5).await.unwrap();
        assert_eq!(updated.unwrap().quantity, 5);

        assert!(db.carts().set_quantity("u1", &product.id, 0).await.unwrap().is_none());
        let cart = db.carts().get_or_create("u1").await.unwrap();
        assert!(db.carts().items(&cart.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_coupon_application() {
        let db = test_db().await;
        let product = seed_product(&db, "caja", 10_000, 10).await;
        let mut c = coupon("DULCE10", DiscountType::Percentage, 10);
        c.minimum_order_amount = 15_000;
        db.coupons().insert(&c).await.unwrap();

        db.carts().add_item("u1", &product.id, 1).await.unwrap();
        let err = db.carts().apply_coupon("u1", "dulce10", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::CouponMinimumNotMet { .. })));

        let err = db.carts().apply_coupon("u1", "NOPE", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::CouponNotFound { .. })));

        db.carts().add_item("u1", &product.id, 1).await.unwrap();
        db.carts().apply_coupon("u1", " dulce10 ", Utc::now()).await.unwrap();

        let priced = db
            .carts()
            .priced("u1", &ShippingPolicy::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(priced.totals.discount.pesos(), 2000);
        assert_eq!(priced.totals.shipping.pesos(), 0);
        assert_eq!(priced.totals.total.pesos(), 18000);

        db.carts().remove_coupon("u1").await.unwrap();
        let priced = db
            .carts()
            .priced("u1", &ShippingPolicy::default(), Utc::now())
            .await
            .unwrap();
        assert!(priced.coupon.is_none());
    }

    #[tokio::test]
    async fn test_purge_unavailable() {
        let db = test_db().await;
        let keep = seed_product(&db, "keep", 1000, 10).await;
        let gone = seed_product(&db, "gone", 1000, 10).await;
        db.carts().add_item("u1", &keep.id, 1).await.unwrap();
        db.carts().add_item("u1", &gone.id, 1).await.unwrap();

        db.catalog().set_available(&gone.id, false).await.unwrap();
        assert_eq!(db.carts().purge_unavailable("u1").await.unwrap(), 1);

        let cart = db.carts().get_or_create("u1").await.unwrap();
        assert_eq!(db.carts().items(&cart.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_drops_items_and_coupon() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 1000, 10).await;
        db.coupons()
            .insert(&coupon("ENVIO", DiscountType::FreeShipping, 0))
            .await
            .unwrap();
        db.carts().add_item("u1", &product.id, 1).await.unwrap();
        db.carts().apply_coupon("u1", "ENVIO", Utc::now()).await.unwrap();

        db.carts().clear("u1").await.unwrap();
        let cart = db.carts().get_or_create("u1").await.unwrap();
        assert!(cart.coupon_id.is_none());
        assert!(db.carts().items(&cart.id).await.unwrap().is_empty());
    }
}
