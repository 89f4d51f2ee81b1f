//! # Stock Ledger Repository
//!
//! Applies [`PlannedMovement`]s produced by `dulce_core::stock`.
//!
//! ## Applying a Movement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  (inside the caller's transaction)                                      │
//! │                                                                         │
//! │  1. UPDATE products SET stock = stock + delta ... RETURNING stock      │
//! │  2. INSERT INTO product_stock (previous, new = returned stock)         │
//! │                                                                         │
//! │  The update and the ledger row commit or roll back together, so        │
//! │  products.stock always equals the newest ledger row's new_stock.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ledger rows are never updated or deleted. Repairs append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use dulce_core::catalog::Product;
use dulce_core::order::Actor;
use dulce_core::stock::{
    plan_manual_adjustment, LedgerDrift, ManualAdjustment, PlannedMovement, StockMovement,
    StockReport, StockThresholds,
};
use dulce_core::CoreError;

// =============================================================================
// Transaction Helpers
// =============================================================================

/// What a reservation needs to know about a product.
#[derive(Debug, Clone)]
pub(crate) struct StockSnapshot {
    pub name: String,
    pub stock: i64,
    pub available: bool,
}

pub(crate) async fn read_stock(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<StockSnapshot> {
    let row: Option<(String, i64, bool)> =
        sqlx::query_as("SELECT name, stock, available FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;

    row.map(|(name, stock, available)| StockSnapshot {
        name,
        stock,
        available,
    })
    .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()).into())
}

/// Applies the movement's delta to `products.stock` and appends its ledger row.
///
/// The ledger row records the stock the update actually produced.
pub(crate) async fn apply_movement(
    conn: &mut SqliteConnection,
    product_id: &str,
    plan: &PlannedMovement,
    reference: Option<&str>,
    created_by: &str,
    now: DateTime<Utc>,
) -> DbResult<StockMovement> {
    let mut applied = plan.clone();

    if plan.delta != 0 {
        let new_stock: i64 = sqlx::query_scalar(
            "UPDATE products SET stock = stock + ?, updated_at = ? WHERE id = ? RETURNING stock",
        )
        .bind(plan.delta)
        .bind(now)
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::from(CoreError::ProductNotFound(product_id.to_string())))?;

        applied.new_stock = new_stock;
        applied.previous_stock = new_stock - plan.delta;
    }

    append_movement(conn, product_id, &applied, reference, created_by, now).await
}

/// Appends a ledger row without touching `products.stock`.
pub(crate) async fn append_movement(
    conn: &mut SqliteConnection,
    product_id: &str,
    plan: &PlannedMovement,
    reference: Option<&str>,
    created_by: &str,
    now: DateTime<Utc>,
) -> DbResult<StockMovement> {
    let movement = StockMovement {
        id: Uuid::new_v4().to_string(),
        product_id: product_id.to_string(),
        movement_type: plan.movement_type,
        quantity: plan.delta,
        previous_stock: plan.previous_stock,
        new_stock: plan.new_stock,
        reason: plan.reason.clone(),
        reference: reference.map(str::to_string),
        created_by: created_by.to_string(),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO product_stock (
            id, product_id, movement_type, quantity, previous_stock,
            new_stock, reason, reference, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.product_id)
    .bind(movement.movement_type)
    .bind(movement.quantity)
    .bind(movement.previous_stock)
    .bind(movement.new_stock)
    .bind(&movement.reason)
    .bind(&movement.reference)
    .bind(&movement.created_by)
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;

    debug!(
        product_id = %movement.product_id,
        movement_type = movement.movement_type.as_str(),
        delta = movement.quantity,
        new_stock = movement.new_stock,
        "Stock movement recorded"
    );

    Ok(movement)
}

const DRIFT_SQL: &str = r#"
    SELECT p.id AS product_id,
           p.name AS product_name,
           p.stock AS stock,
           COALESCE(ps.new_stock, 0) AS ledger_stock
    FROM products p
    LEFT JOIN product_stock ps
           ON ps.rowid = (SELECT MAX(rowid) FROM product_stock WHERE product_id = p.id)
    WHERE COALESCE(ps.new_stock, 0) <> p.stock
    ORDER BY p.name
"#;

// =============================================================================
// Requests / Results
// =============================================================================

/// One line of a bulk adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub product_id: String,
    pub new_stock: i64,
    pub reason: String,
}

/// Outcome of [`StockRepository::bulk_adjust`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkAdjustment {
    pub applied: Vec<ManualAdjustment>,
    /// `(product_id, error message)` for lines that were skipped.
    pub failed: Vec<(String, String)>,
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Ledger rows for a product, newest first.
    pub async fn movements(&self, product_id: &str, limit: i64) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, StockMovement>(
            "SELECT * FROM product_stock WHERE product_id = ? ORDER BY rowid DESC LIMIT ?",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// `new_stock` of the newest ledger row, if the product has any.
    pub async fn latest_ledger_stock(&self, product_id: &str) -> DbResult<Option<i64>> {
        let value = sqlx::query_scalar(
            "SELECT new_stock FROM product_stock WHERE product_id = ? ORDER BY rowid DESC LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    /// Sets a product's stock to `new_stock`, recording an entry, exit or
    /// adjustment row.
    pub async fn adjust(
        &self,
        product_id: &str,
        new_stock: i64,
        reason: &str,
        actor: &Actor,
    ) -> DbResult<ManualAdjustment> {
        let mut tx = begin_write(&self.pool).await?;
        let adjustment = adjust_in(&mut tx, product_id, new_stock, reason, actor).await?;
        tx.commit().await?;

        info!(
            product_id = %product_id,
            previous = adjustment.previous_stock,
            new = adjustment.new_stock,
            "Manual stock adjustment"
        );
        Ok(adjustment)
    }

    /// Applies several adjustments in one transaction.
    ///
    /// Lines that fail a business rule (unknown product, negative target)
    /// are reported in `failed` and the rest still apply. A database error
    /// rolls everything back.
    pub async fn bulk_adjust(
        &self,
        requests: &[AdjustmentRequest],
        actor: &Actor,
    ) -> DbResult<BulkAdjustment> {
        let mut tx = begin_write(&self.pool).await?;
        let mut result = BulkAdjustment::default();

        for request in requests {
            match adjust_in(&mut tx, &request.product_id, request.new_stock, &request.reason, actor)
                .await
            {
                Ok(adjustment) => result.applied.push(adjustment),
                Err(DbError::Core(e)) => {
                    warn!(product_id = %request.product_id, error = %e, "Bulk adjustment line skipped");
                    result.failed.push((request.product_id.clone(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        info!(
            applied = result.applied.len(),
            failed = result.failed.len(),
            "Bulk stock adjustment"
        );
        Ok(result)
    }

    /// Inventory summary over every product.
    pub async fn report(&self, thresholds: &StockThresholds) -> DbResult<StockReport> {
        let products = sqlx::query_as::<_, Product>("SELECT * FROM products")
            .fetch_all(&self.pool)
            .await?;

        Ok(StockReport::build(&products, thresholds))
    }

    /// Available products at or below the critical threshold, lowest first.
    pub async fn alerts(&self, thresholds: &StockThresholds) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE available = 1 AND stock <= ? ORDER BY stock ASC, name ASC",
        )
        .bind(thresholds.critical)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Products whose stock differs from their newest ledger row.
    pub async fn ledger_drift(&self) -> DbResult<Vec<LedgerDrift>> {
        let rows = sqlx::query_as::<_, LedgerDrift>(DRIFT_SQL)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Appends an adjustment row for every drifting product so the ledger
    /// catches up with the real stock.
    pub async fn repair_drift(&self, actor: &Actor) -> DbResult<Vec<StockMovement>> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        let drifts = sqlx::query_as::<_, LedgerDrift>(DRIFT_SQL)
            .fetch_all(&mut *tx)
            .await?;

        let mut repairs = Vec::with_capacity(drifts.len());
        for drift in &drifts {
            warn!(
                product_id = %drift.product_id,
                stock = drift.stock,
                ledger_stock = drift.ledger_stock,
                "Repairing stock ledger drift"
            );
            let movement = append_movement(
                &mut tx,
                &drift.product_id,
                &drift.repair_movement(),
                None,
                &actor.label(),
                now,
            )
            .await?;
            repairs.push(movement);
        }

        tx.commit().await?;
        Ok(repairs)
    }
}

async fn adjust_in(
    conn: &mut SqliteConnection,
    product_id: &str,
    new_stock: i64,
    reason: &str,
    actor: &Actor,
) -> DbResult<ManualAdjustment> {
    let current = read_stock(conn, product_id).await?;
    let plan = plan_manual_adjustment(current.stock, new_stock, reason)?;
    let movement = apply_movement(conn, product_id, &plan, None, &actor.label(), Utc::now()).await?;

    Ok(ManualAdjustment {
        product_id: product_id.to_string(),
        previous_stock: movement.previous_stock,
        new_stock: movement.new_stock,
        difference: movement.quantity,
        movement_type: movement.movement_type,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_product, test_db};
    use dulce_core::stock::MovementType;

    #[tokio::test]
    async fn test_initial_stock_is_on_the_ledger() {
        let db = test_db().await;
        let product = seed_product(&db, "chips", 1500, 12).await;

        let rows = db.stock().movements(&product.id, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].movement_type, MovementType::Entry);
        assert_eq!(rows[0].new_stock, 12);
        assert!(db.stock().ledger_drift().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_adjustment_typing() {
        let db = test_db().await;
        let product = seed_product(&db, "avena", 1200, 10).await;
        let admin = Actor::staff("admin");

        let up = db.stock().adjust(&product.id, 25, "Horneado", &admin).await.unwrap();
        assert_eq!(up.movement_type, MovementType::Entry);
        assert_eq!(up.difference, 15);

        let down = db.stock().adjust(&product.id, 20, "Merma", &admin).await.unwrap();
        assert_eq!(down.movement_type, MovementType::Exit);
        assert_eq!(down.previous_stock, 25);

        let same = db.stock().adjust(&product.id, 20, "Conteo", &admin).await.unwrap();
        assert_eq!(same.movement_type, MovementType::Adjustment);
        assert_eq!(same.difference, 0);

        let stored = db.catalog().get(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 20);
        assert_eq!(
            db.stock().latest_ledger_stock(&product.id).await.unwrap(),
            Some(20)
        );
    }

    #[tokio::test]
    async fn test_negative_target_is_rejected() {
        let db = test_db().await;
        let product = seed_product(&db, "nuez", 1800, 4).await;

        let err = db
            .stock()
            .adjust(&product.id, -1, "error", &Actor::staff("admin"))
            .await
            .unwrap_err();
        assert!(err.as_core().is_some());
        assert_eq!(db.catalog().get(&product.id).await.unwrap().unwrap().stock, 4);
    }

    #[tokio::test]
    async fn test_bulk_adjust_reports_failures() {
        let db = test_db().await;
        let a = seed_product(&db, "a", 1000, 1).await;
        let b = seed_product(&db, "b", 1000, 1).await;

        let requests = vec![
            AdjustmentRequest { product_id: a.id.clone(), new_stock: 30, reason: "ok".into() },
            AdjustmentRequest { product_id: "missing".into(), new_stock: 3, reason: "x".into() },
            AdjustmentRequest { product_id: b.id.clone(), new_stock: -2, reason: "x".into() },
        ];
        let result = db.stock().bulk_adjust(&requests, &Actor::staff("admin")).await.unwrap();

        assert_eq!(result.applied.len(), 1);
        assert_eq!(result.failed.len(), 2);
        assert_eq!(db.catalog().get(&a.id).await.unwrap().unwrap().stock, 30);
    }

    #[tokio::test]
    async fn test_drift_detection_and_repair() {
        let db = test_db().await;
        let product = seed_product(&db, "drift", 1000, 8).await;

        // Simulate a legacy write that bypassed the ledger.
        sqlx::query("UPDATE products SET stock = 5 WHERE id = ?")
            .bind(&product.id)
            .execute(db.pool())
            .await
            .unwrap();

        let drift = db.stock().ledger_drift().await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].ledger_stock, 8);

        let repairs = db.stock().repair_drift(&Actor::system()).await.unwrap();
        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].quantity, -3);
        assert!(db.stock().ledger_drift().await.unwrap().is_empty());
        assert_eq!(db.catalog().get(&product.id).await.unwrap().unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_report_and_alerts() {
        let db = test_db().await;
        seed_product(&db, "out", 1000, 0).await;
        seed_product(&db, "crit", 1000, 3).await;
        seed_product(&db, "low", 1000, 9).await;
        seed_product(&db, "ok", 2000, 40).await;
        let thresholds = StockThresholds::default();

        let report = db.stock().report(&thresholds).await.unwrap();
        assert_eq!(report.total_products, 4);
        assert_eq!(report.out_of_stock, 1);
        assert_eq!(report.critical, 1);
        assert_eq!(report.low, 1);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.total_units, 52);

        let alerts = db.stock().alerts(&thresholds).await.unwrap();
        let slugs: Vec<_> = alerts.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["out", "crit"]);
    }
}
