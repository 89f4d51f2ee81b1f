//! Catalog browsing and inventory administration.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use dulce_core::catalog::{Category, Product, TaxBreakdown};
use dulce_core::money::Money;
use dulce_core::order::Actor;
use dulce_core::stock::{LedgerDrift, ManualAdjustment, StockLevel, StockMovement, StockReport};
use dulce_db::repository::stock::AdjustmentRequest;
use dulce_db::{BulkAdjustment, Database, LowStock};

use super::require_staff;
use crate::config::StorefrontConfig;
use crate::error::{ApiError, ApiResult};
use crate::notify::Notifier;

const SEARCH_LIMIT: i64 = 50;

/// Product page data.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    pub product: Product,
    pub current_price: Money,
    pub has_discount: bool,
    pub savings: Money,
    pub tax: TaxBreakdown,
    pub stock_level: StockLevel,
}

pub struct CatalogService {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl CatalogService {
    pub fn new(db: Database, config: Arc<StorefrontConfig>) -> Self {
        CatalogService { db, config }
    }

    pub async fn categories(&self) -> ApiResult<Vec<Category>> {
        Ok(self.db.catalog().categories().await?)
    }

    /// Available products, optionally within a category.
    pub async fn list(&self, category_slug: Option<&str>) -> ApiResult<Vec<Product>> {
        Ok(self.db.catalog().list_available(category_slug).await?)
    }

    pub async fn featured(&self, limit: i64) -> ApiResult<Vec<Product>> {
        Ok(self.db.catalog().featured(limit).await?)
    }

    pub async fn search(&self, query: &str) -> ApiResult<Vec<Product>> {
        debug!(query = %query, "search command");
        Ok(self.db.catalog().search(query, SEARCH_LIMIT).await?)
    }

    /// An available product by slug, with its pricing and tax breakdown.
    pub async fn detail(&self, slug: &str) -> ApiResult<ProductDetail> {
        let product = self
            .db
            .catalog()
            .get_by_slug(slug)
            .await?
            .filter(|p| p.available)
            .ok_or_else(|| ApiError::not_found("Product", slug))?;

        let tax_config = self.db.catalog().tax_configuration_for(&product).await?;
        Ok(ProductDetail {
            current_price: product.current_price(),
            has_discount: product.has_discount(),
            savings: product.savings(),
            tax: product.tax_breakdown(tax_config.as_ref()),
            stock_level: self.config.stock_thresholds().classify(product.stock),
            product,
        })
    }

    // =========================================================================
    // Inventory (staff)
    // =========================================================================

    pub async fn stock_report(&self) -> ApiResult<StockReport> {
        Ok(self.db.stock().report(&self.config.stock_thresholds()).await?)
    }

    /// Listed products at or below the critical level, lowest first.
    pub async fn stock_alerts(&self) -> ApiResult<Vec<Product>> {
        Ok(self.db.stock().alerts(&self.config.stock_thresholds()).await?)
    }

    pub async fn movements(&self, product_id: &str, limit: i64) -> ApiResult<Vec<StockMovement>> {
        Ok(self.db.stock().movements(product_id, limit).await?)
    }

    /// Sets a product's stock to `new_stock`, alerting admins when it
    /// drops into the critical range.
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        new_stock: i64,
        reason: &str,
        actor: &Actor,
    ) -> ApiResult<ManualAdjustment> {
        require_staff(actor)?;
        let adjustment = self
            .db
            .stock()
            .adjust(product_id, new_stock, reason, actor)
            .await?;

        self.alert_crossings(std::slice::from_ref(&adjustment)).await?;
        Ok(adjustment)
    }

    /// Applies several adjustments in one transaction. Lines the ledger
    /// refuses are reported in `failed`.
    pub async fn bulk_adjust(
        &self,
        requests: &[AdjustmentRequest],
        actor: &Actor,
    ) -> ApiResult<BulkAdjustment> {
        require_staff(actor)?;
        let result = self.db.stock().bulk_adjust(requests, actor).await?;
        self.alert_crossings(&result.applied).await?;
        Ok(result)
    }

    /// Products whose stock disagrees with their latest ledger row.
    pub async fn ledger_audit(&self) -> ApiResult<Vec<LedgerDrift>> {
        Ok(self.db.stock().ledger_drift().await?)
    }

    /// Appends one adjustment row per drifted product.
    pub async fn repair_ledger(&self, actor: &Actor) -> ApiResult<Vec<StockMovement>> {
        require_staff(actor)?;
        let repairs = self.db.stock().repair_drift(actor).await?;
        info!(repaired = repairs.len(), "Stock ledger repaired");
        Ok(repairs)
    }

    async fn alert_crossings(&self, adjustments: &[ManualAdjustment]) -> ApiResult<()> {
        let thresholds = self.config.stock_thresholds();
        let mut low = Vec::new();
        for adjustment in adjustments
            .iter()
            .filter(|a| thresholds.crossed_into_alert(a.previous_stock, a.new_stock))
        {
            let product = self
                .db
                .catalog()
                .get(&adjustment.product_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Product", &adjustment.product_id))?;
            low.push(LowStock {
                product_id: product.id,
                product_name: product.name,
                stock: adjustment.new_stock,
            });
        }

        Notifier::new(self.db.clone(), self.config.clone())
            .stock_alerts(&low)
            .await;
        Ok(())
    }
}
