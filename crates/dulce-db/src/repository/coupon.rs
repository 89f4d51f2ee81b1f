//! # Coupon Repository
//!
//! Lookup is by normalized (trimmed, uppercase) code. Redemption is a
//! single conditional `UPDATE`, so two checkouts racing for the last use
//! cannot both succeed.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use dulce_core::coupon::{normalize_code, DiscountCoupon};
use dulce_core::validation::validate_required;

/// Takes one use of the coupon. `false` when the usage limit was already
/// reached.
pub(crate) async fn redeem(conn: &mut SqliteConnection, coupon_id: &str) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE discount_coupons
        SET current_uses = current_uses + 1
        WHERE id = ? AND (max_uses IS NULL OR current_uses < max_uses)
        "#,
    )
    .bind(coupon_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn get_in(
    conn: &mut SqliteConnection,
    coupon_id: &str,
) -> DbResult<Option<DiscountCoupon>> {
    let row = sqlx::query_as::<_, DiscountCoupon>("SELECT * FROM discount_coupons WHERE id = ?")
        .bind(coupon_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Stores a coupon; the code is normalized first.
    pub async fn insert(&self, coupon: &DiscountCoupon) -> DbResult<DiscountCoupon> {
        validate_required("code", &coupon.code, 50)?;
        let mut coupon = coupon.clone();
        coupon.code = normalize_code(&coupon.code);

        sqlx::query(
            r#"
            INSERT INTO discount_coupons (
                id, code, description, discount_type, discount_value, minimum_order_amount,
                maximum_discount_amount, max_uses, current_uses, valid_from, valid_until, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&coupon.id)
        .bind(&coupon.code)
        .bind(&coupon.description)
        .bind(coupon.discount_type)
        .bind(coupon.discount_value)
        .bind(coupon.minimum_order_amount)
        .bind(coupon.maximum_discount_amount)
        .bind(coupon.max_uses)
        .bind(coupon.current_uses)
        .bind(coupon.valid_from)
        .bind(coupon.valid_until)
        .bind(coupon.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &coupon.code),
            other => other,
        })?;

        info!(code = %coupon.code, "Coupon created");
        Ok(coupon)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<DiscountCoupon>> {
        let mut conn = self.pool.acquire().await?;
        get_in(&mut conn, id).await
    }

    /// Lookup by code as typed by a customer.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<DiscountCoupon>> {
        let code = normalize_code(code);
        debug!(code = %code, "Looking up coupon");

        let row = sqlx::query_as::<_, DiscountCoupon>("SELECT * FROM discount_coupons WHERE code = ?")
            .bind(&code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Coupons valid at `now`, for the promotions page.
    pub async fn list_active(&self, now: DateTime<Utc>) -> DbResult<Vec<DiscountCoupon>> {
        let rows = sqlx::query_as::<_, DiscountCoupon>(
            "SELECT * FROM discount_coupons WHERE is_active = 1 ORDER BY valid_until",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter(|c| c.is_valid_at(now)).collect())
    }

    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE discount_coupons SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Coupon", id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{coupon, test_db};
    use chrono::Duration;
    use dulce_core::coupon::DiscountType;

    #[tokio::test]
    async fn test_code_is_normalized() {
        let db = test_db().await;
        let stored = db
            .coupons()
            .insert(&coupon(" dulce10 ", DiscountType::Percentage, 10))
            .await
            .unwrap();
        assert_eq!(stored.code, "DULCE10");

        let found = db.coupons().get_by_code("Dulce10  ").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_redeem_respects_max_uses() {
        let db = test_db().await;
        let mut c = coupon("UNAVEZ", DiscountType::FixedAmount, 1000);
        c.max_uses = Some(1);
        let c = db.coupons().insert(&c).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(redeem(&mut conn, &c.id).await.unwrap());
        assert!(!redeem(&mut conn, &c.id).await.unwrap());
        drop(conn);

        let stored = db.coupons().get(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.current_uses, 1);
        assert!(stored.usage_exhausted());
    }

    #[tokio::test]
    async fn test_expired_coupon_is_not_listed() {
        let db = test_db().await;
        let mut expired = coupon("VIEJO", DiscountType::Percentage, 5);
        expired.valid_until = Utc::now() - Duration::days(1);
        db.coupons().insert(&expired).await.unwrap();
        db.coupons()
            .insert(&coupon("NUEVO", DiscountType::FreeShipping, 0))
            .await
            .unwrap();

        let active = db.coupons().list_active(Utc::now()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].code, "NUEVO");
    }
}
