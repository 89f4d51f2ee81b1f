//! # Catalog Repository
//!
//! Categories, products and tax configurations.
//!
//! Product stock is never written here after creation; the ledger in
//! [`super::stock`] owns it. Creating a product with initial stock records
//! an `entry` row so the ledger starts in agreement.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::stock::append_movement;
use dulce_core::catalog::{Category, Product, TaxConfiguration};
use dulce_core::order::Actor;
use dulce_core::stock::plan_manual_adjustment;
use dulce_core::validation::{validate_price, validate_required, validate_search_query};

/// Fields for a new product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub category_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: i64,
    pub is_on_sale: bool,
    pub discount_percentage_bps: Option<u32>,
    pub discount_price: Option<i64>,
    pub stock: i64,
    pub featured: bool,
    pub weight_grams: Option<i64>,
    pub tax_configuration_id: Option<String>,
    pub is_tax_exempt: bool,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, slug: impl Into<String>, price: i64, stock: i64) -> Self {
        NewProduct {
            category_id: None,
            name: name.into(),
            slug: slug.into(),
            description: None,
            price,
            is_on_sale: false,
            discount_percentage_bps: None,
            discount_price: None,
            stock,
            featured: false,
            weight_grams: None,
            tax_configuration_id: None,
            is_tax_exempt: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Categories
    // -------------------------------------------------------------------------

    pub async fn insert_category(
        &self,
        name: &str,
        slug: &str,
        description: Option<&str>,
    ) -> DbResult<Category> {
        validate_required("name", name, 100)?;
        validate_required("slug", slug, 100)?;

        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            slug: slug.trim().to_lowercase(),
            description: description.map(str::to_string),
            is_active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO categories (id, name, slug, description, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.is_active)
        .bind(category.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &category.slug),
            other => other,
        })?;

        Ok(category)
    }

    /// Active categories by name.
    pub async fn categories(&self) -> DbResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>(
            "SELECT * FROM categories WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn category_by_slug(&self, slug: &str) -> DbResult<Option<Category>> {
        let row = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    /// Inserts a product; initial stock goes through the ledger as an
    /// `entry` row.
    pub async fn insert_product(&self, new: NewProduct, actor: &Actor) -> DbResult<Product> {
        validate_required("name", &new.name, 200)?;
        validate_required("slug", &new.slug, 200)?;
        validate_price(new.price)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            category_id: new.category_id,
            name: new.name.trim().to_string(),
            slug: new.slug.trim().to_lowercase(),
            description: new.description,
            price: new.price,
            is_on_sale: new.is_on_sale,
            discount_percentage_bps: new.discount_percentage_bps,
            discount_price: new.discount_price,
            stock: new.stock.max(0),
            available: true,
            featured: new.featured,
            weight_grams: new.weight_grams,
            tax_configuration_id: new.tax_configuration_id,
            is_tax_exempt: new.is_tax_exempt,
            created_at: now,
            updated_at: now,
        };

        let mut tx = begin_write(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, category_id, name, slug, description, price, is_on_sale,
                discount_percentage_bps, discount_price, stock, available, featured,
                weight_grams, tax_configuration_id, is_tax_exempt, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.id)
        .bind(&product.category_id)
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.is_on_sale)
        .bind(product.discount_percentage_bps)
        .bind(product.discount_price)
        .bind(product.stock)
        .bind(product.available)
        .bind(product.featured)
        .bind(product.weight_grams)
        .bind(&product.tax_configuration_id)
        .bind(product.is_tax_exempt)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &product.slug),
            other => other,
        })?;

        if product.stock > 0 {
            let plan = plan_manual_adjustment(0, product.stock, "Initial stock")?;
            append_movement(&mut tx, &product.id, &plan, None, &actor.label(), now).await?;
        }

        tx.commit().await?;

        info!(product_id = %product.id, slug = %product.slug, stock = product.stock, "Product created");
        Ok(product)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Product>> {
        let row = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_by_slug(&self, slug: &str) -> DbResult<Option<Product>> {
        let row = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Products for a set of ids, in no particular order. Unknown ids are
    /// skipped.
    pub async fn get_many(&self, ids: &[String]) -> DbResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM products WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows = query.build_query_as::<Product>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Available products, optionally within one category slug.
    pub async fn list_available(&self, category_slug: Option<&str>) -> DbResult<Vec<Product>> {
        let rows = match category_slug {
            Some(slug) => {
                sqlx::query_as::<_, Product>(
                    r#"
                    SELECT p.* FROM products p
                    JOIN categories c ON c.id = p.category_id
                    WHERE p.available = 1 AND c.slug = ?
                    ORDER BY p.name
                    "#,
                )
                .bind(slug)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Product>(
                    "SELECT * FROM products WHERE available = 1 ORDER BY name",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Featured products for the home page, newest first.
    pub async fn featured(&self, limit: i64) -> DbResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE available = 1 AND featured = 1 ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Case-insensitive substring search over name and description.
    pub async fn search(&self, query: &str, limit: i64) -> DbResult<Vec<Product>> {
        let term = validate_search_query(query)?;
        debug!(query = %term, limit, "Searching products");

        let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query_as::<_, Product>(
            r#"
            SELECT * FROM products
            WHERE available = 1
              AND (name LIKE ?1 ESCAPE '\' OR COALESCE(description, '') LIKE ?1 ESCAPE '\')
            ORDER BY name
            LIMIT ?2
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Lists or unlists a product.
    pub async fn set_available(&self, id: &str, available: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET available = ?, updated_at = ? WHERE id = ?")
            .bind(available)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Sale pricing. `None` for both discounts ends the sale.
    pub async fn set_sale(
        &self,
        id: &str,
        discount_percentage_bps: Option<u32>,
        discount_price: Option<i64>,
    ) -> DbResult<()> {
        let on_sale = discount_percentage_bps.is_some() || discount_price.is_some();
        let result = sqlx::query(
            r#"
            UPDATE products
            SET is_on_sale = ?, discount_percentage_bps = ?, discount_price = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(on_sale)
        .bind(discount_percentage_bps)
        .bind(discount_price)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tax
    // -------------------------------------------------------------------------

    pub async fn tax_configurations(&self) -> DbResult<Vec<TaxConfiguration>> {
        let rows = sqlx::query_as::<_, TaxConfiguration>(
            "SELECT * FROM tax_configurations WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The product's own tax configuration, if it points at an active one.
    pub async fn tax_configuration_for(&self, product: &Product) -> DbResult<Option<TaxConfiguration>> {
        let Some(id) = product.tax_configuration_id.as_deref() else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, TaxConfiguration>(
            "SELECT * FROM tax_configurations WHERE id = ? AND is_active = 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_product, test_db};

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let db = test_db().await;
        let product = seed_product(&db, "chips-chocolate", 1500, 10).await;

        let by_id = db.catalog().get(&product.id).await.unwrap().unwrap();
        assert_eq!(by_id.slug, "chips-chocolate");
        assert_eq!(by_id.stock, 10);

        let by_slug = db.catalog().get_by_slug("chips-chocolate").await.unwrap();
        assert!(by_slug.is_some());
        assert!(db.catalog().get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_slug() {
        let db = test_db().await;
        seed_product(&db, "avena", 1200, 1).await;

        let err = db
            .catalog()
            .insert_product(NewProduct::new("Avena 2", "avena", 1200, 1), &Actor::system())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_search_and_availability() {
        let db = test_db().await;
        let chips = seed_product(&db, "chips", 1500, 5).await;
        seed_product(&db, "avena-pasas", 1300, 5).await;

        let found = db.catalog().search("CHIPS", 10).await.unwrap();
        assert_eq!(found.len(), 1);

        db.catalog().set_available(&chips.id, false).await.unwrap();
        assert!(db.catalog().search("chips", 10).await.unwrap().is_empty());
        assert_eq!(db.catalog().list_available(None).await.unwrap().len(), 1);
        assert_eq!(db.catalog().search("   ", 10).await.unwrap().len(), 1);
        assert!(db.catalog().search(&"x".repeat(101), 10).await.is_err());
    }

    #[tokio::test]
    async fn test_get_many_and_categories() {
        let db = test_db().await;
        let category = db
            .catalog()
            .insert_category("Clásicas", "clasicas", None)
            .await
            .unwrap();
        let mut new = NewProduct::new("Mantequilla", "mantequilla", 1000, 3);
        new.category_id = Some(category.id.clone());
        let a = db.catalog().insert_product(new, &Actor::system()).await.unwrap();
        let b = seed_product(&db, "b", 1000, 3).await;

        let many = db
            .catalog()
            .get_many(&[a.id.clone(), b.id.clone(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);

        let in_category = db.catalog().list_available(Some("clasicas")).await.unwrap();
        assert_eq!(in_category.len(), 1);
        assert_eq!(in_category[0].id, a.id);
    }

    #[tokio::test]
    async fn test_sale_pricing_and_tax() {
        let db = test_db().await;
        let mut new = NewProduct::new("Caja", "caja", 10_000, 3);
        new.tax_configuration_id = Some("00000000-0000-0000-0000-000000000019".to_string());
        let product = db.catalog().insert_product(new, &Actor::system()).await.unwrap();

        db.catalog().set_sale(&product.id, Some(1500), None).await.unwrap();
        let product = db.catalog().get(&product.id).await.unwrap().unwrap();
        assert_eq!(product.current_price().pesos(), 8500);

        let tax = db.catalog().tax_configuration_for(&product).await.unwrap().unwrap();
        assert_eq!(tax.rate_bps, 1900);
    }
}
