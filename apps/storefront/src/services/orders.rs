//! Orders after checkout: lookups, status changes, cancellation and the
//! staff audits.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use dulce_core::order::{Actor, Order, OrderItem, OrderStatus, OrderStatusHistory, PaymentStatus};
use dulce_core::stock::StockMovement;
use dulce_db::{Database, StatusChange, TotalsDrift};

use super::require_staff;
use crate::config::StorefrontConfig;
use crate::error::{ApiError, ApiResult};
use crate::notify::Notifier;

/// An order with its lines and status history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub history: Vec<OrderStatusHistory>,
    pub can_cancel: bool,
}

pub struct OrderService {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl OrderService {
    pub fn new(db: Database, config: Arc<StorefrontConfig>) -> Self {
        OrderService { db, config }
    }

    fn notifier(&self) -> Notifier {
        Notifier::new(self.db.clone(), self.config.clone())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// An order the actor may see. Other customers' orders look missing.
    pub async fn get(&self, order_id: &str, actor: &Actor) -> ApiResult<OrderDetail> {
        let order = self
            .db
            .orders()
            .get(order_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Order", order_id))?;
        self.detail(visible_to(order, actor, order_id)?, actor).await
    }

    pub async fn by_number(&self, order_number: &str, actor: &Actor) -> ApiResult<OrderDetail> {
        let order = self
            .db
            .orders()
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| ApiError::not_found("Order", order_number))?;
        self.detail(visible_to(order, actor, order_number)?, actor).await
    }

    /// The user's orders, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> ApiResult<Vec<Order>> {
        Ok(self.db.orders().list_for_user(user_id).await?)
    }

    pub async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        actor: &Actor,
    ) -> ApiResult<Vec<Order>> {
        require_staff(actor)?;
        Ok(self.db.orders().list(status, limit).await?)
    }

    async fn detail(&self, order: Order, actor: &Actor) -> ApiResult<OrderDetail> {
        let items = self.db.orders().items(&order.id).await?;
        let history = self.db.orders().history(&order.id).await?;
        Ok(OrderDetail {
            can_cancel: order.can_be_cancelled(actor),
            order,
            items,
            history,
        })
    }

    // =========================================================================
    // Changes
    // =========================================================================

    /// Moves an order to `status`, applying its stock effect. Same-status
    /// requests change nothing and notify nobody.
    pub async fn change_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        tracking_number: Option<String>,
        notes: Option<&str>,
        actor: &Actor,
    ) -> ApiResult<StatusChange> {
        require_staff(actor)?;
        let change = self
            .db
            .orders()
            .change_status(
                order_id,
                status,
                tracking_number,
                notes,
                actor,
                self.config.stock.oversell_policy,
            )
            .await?;

        if change.changed {
            self.notifier()
                .order_status_changed(&change.order, change.previous)
                .await;
        }
        Ok(change)
    }

    /// Customer or staff cancellation; reserved stock goes back.
    pub async fn cancel(&self, order_id: &str, actor: &Actor) -> ApiResult<StatusChange> {
        if !actor.is_staff {
            let order = self
                .db
                .orders()
                .get(order_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Order", order_id))?;
            visible_to(order, actor, order_id)?;
        }

        let change = self.db.orders().cancel(order_id, actor).await?;
        info!(
            order_number = %change.order.order_number,
            by = %actor.label(),
            restored = change.movements.len(),
            "Order cancelled"
        );
        if change.changed {
            self.notifier()
                .order_status_changed(&change.order, change.previous)
                .await;
        }
        Ok(change)
    }

    /// Staff override of the payment status, e.g. a refund.
    pub async fn set_payment_status(
        &self,
        order_id: &str,
        payment_status: PaymentStatus,
        actor: &Actor,
    ) -> ApiResult<Order> {
        require_staff(actor)?;
        Ok(self
            .db
            .orders()
            .set_payment_status(order_id, payment_status, actor)
            .await?)
    }

    pub async fn delete(&self, order_id: &str, actor: &Actor) -> ApiResult<Vec<StockMovement>> {
        require_staff(actor)?;
        Ok(self.db.orders().delete(order_id, actor).await?)
    }

    // =========================================================================
    // Totals Audit
    // =========================================================================

    pub async fn audit_totals(&self, actor: &Actor) -> ApiResult<Vec<TotalsDrift>> {
        require_staff(actor)?;
        Ok(self.db.orders().audit_totals().await?)
    }

    /// Recomputes every drifted order. Returns the repaired orders.
    pub async fn repair_totals(&self, actor: &Actor) -> ApiResult<Vec<Order>> {
        require_staff(actor)?;
        let mut repaired = Vec::new();
        for drift in self.db.orders().audit_totals().await? {
            repaired.push(self.db.orders().repair_totals(&drift.order_id).await?);
        }
        if !repaired.is_empty() {
            info!(count = repaired.len(), "Order totals repaired");
        }
        Ok(repaired)
    }
}

fn visible_to(order: Order, actor: &Actor, key: &str) -> ApiResult<Order> {
    if actor.is_staff || (order.user_id.is_some() && order.user_id == actor.user_id) {
        Ok(order)
    } else {
        Err(ApiError::not_found("Order", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_support::{placed_order, test_storefront};
    use dulce_core::notification::NotificationType;

    #[tokio::test]
    async fn test_customer_sees_only_own_orders() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, Some("u1")).await;

        let detail = sf.orders().get(&order.id, &Actor::customer("u1")).await.unwrap();
        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.history.len(), 1);
        assert!(detail.can_cancel);

        let err = sf
            .orders()
            .by_number(&order.order_number, &Actor::customer("u2"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let staff = sf.orders().get(&order.id, &Actor::staff("kati")).await.unwrap();
        assert_eq!(staff.order.order_number, order.order_number);
    }

    #[tokio::test]
    async fn test_status_change_notifies_once() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, Some("u1")).await;
        let before = sf.db().notifications().pending_count().await.unwrap();

        let change = sf
            .orders()
            .change_status(&order.id, OrderStatus::Shipped, Some("CHX123".into()), None, &Actor::staff("kati"))
            .await
            .unwrap();
        assert!(change.changed);
        assert_eq!(change.order.tracking_number.as_deref(), Some("CHX123"));
        assert!(change.order.shipped_at.is_some());

        let same = sf
            .orders()
            .change_status(&order.id, OrderStatus::Shipped, None, None, &Actor::staff("kati"))
            .await
            .unwrap();
        assert!(!same.changed);

        assert_eq!(sf.db().notifications().pending_count().await.unwrap(), before + 1);
        let inbox = sf.db().notifications().list_for_user("u1", 10).await.unwrap();
        assert_eq!(inbox[0].notification_type, NotificationType::OrderUpdate);
    }

    #[tokio::test]
    async fn test_customer_cancel_restores_stock() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, Some("u1")).await;
        let item = &sf.db().orders().items(&order.id).await.unwrap()[0];
        let before = sf.db().catalog().get(&item.product_id).await.unwrap().unwrap().stock;

        let err = sf.orders().cancel(&order.id, &Actor::customer("u2")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let change = sf.orders().cancel(&order.id, &Actor::customer("u1")).await.unwrap();
        assert_eq!(change.order.status, OrderStatus::Cancelled);
        let after = sf.db().catalog().get(&item.product_id).await.unwrap().unwrap().stock;
        assert_eq!(after, before + item.quantity);

        let err = sf.orders().cancel(&order.id, &Actor::customer("u1")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BusinessLogic);
    }

    #[tokio::test]
    async fn test_paid_orders_need_staff_to_cancel() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, Some("u1")).await;
        sf.orders()
            .set_payment_status(&order.id, PaymentStatus::Paid, &Actor::staff("kati"))
            .await
            .unwrap();

        let err = sf.orders().cancel(&order.id, &Actor::customer("u1")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BusinessLogic);
        sf.orders().cancel(&order.id, &Actor::staff("kati")).await.unwrap();
    }

    #[tokio::test]
    async fn test_staff_only_operations() {
        let sf = test_storefront().await;
        let order = placed_order(&sf, Some("u1")).await;
        let customer = Actor::customer("u1");

        assert!(sf.orders().delete(&order.id, &customer).await.is_err());
        assert!(sf.orders().audit_totals(&customer).await.is_err());
        assert!(sf
            .orders()
            .change_status(&order.id, OrderStatus::Confirmed, None, None, &customer)
            .await
            .is_err());

        let staff = Actor::staff("kati");
        assert!(sf.orders().audit_totals(&staff).await.unwrap().is_empty());
        assert!(sf.orders().repair_totals(&staff).await.unwrap().is_empty());
        let restored = sf.orders().delete(&order.id, &staff).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert!(sf.db().orders().get(&order.id).await.unwrap().is_none());
    }
}
