//! # Order Repository
//!
//! Checkout, status transitions and their stock effects, all inside one
//! transaction per operation.
//!
//! ## Checkout Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       checkout() (one transaction)                      │
//! │                                                                         │
//! │  1. Load lines (user cart at live prices, or session lines)            │
//! │  2. Revalidate the cart coupon against the subtotal                    │
//! │  3. Next order number DB-YYYYMMDD-NNNN for today                        │
//! │  4. INSERT order (takes the write lock)                                │
//! │  5. Per line: read stock → plan reservation → UPDATE + ledger row      │
//! │              INSERT order item with reserved_quantity                  │
//! │  6. Redeem coupon (conditional increment)                              │
//! │  7. write_totals(): verify against the items, then UPDATE totals       │
//! │  8. History row "pending", clear the cart                              │
//! │  9. COMMIT                                                              │
//! │                                                                         │
//! │  UNIQUE(order_number) violation → roll back, retry from 1              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `write_totals` is the only code that writes the four money columns.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::stock::{apply_movement, read_stock};
use crate::repository::{begin_write, cart, coupon};
use dulce_core::cart::{CartLine, CartTotals, ShippingPolicy};
use dulce_core::money::Money;
use dulce_core::order::{
    next_order_number, order_number_prefix, Actor, Order, OrderItem, OrderStatus,
    OrderStatusHistory, OrderTotals, PaymentMethod, PaymentStatus, ShippingAddress,
};
use dulce_core::stock::{
    plan_delivery_confirmation, plan_reservation, plan_restore, OversellPolicy, StockEffect,
    StockMovement, StockThresholds,
};
use dulce_core::validation::{validate_cart_size, validate_quantity, validate_shipping_address};
use dulce_core::{CoreError, ValidationError};

// =============================================================================
// Requests / Results
// =============================================================================

/// Where the checkout lines come from.
#[derive(Debug, Clone)]
pub enum CheckoutSource {
    /// The signed-in user's cart, at live prices, with its coupon.
    UserCart,
    /// A visitor's session cart, at the prices frozen when each product
    /// was added.
    Session(Vec<CartLine>),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// `None` for guests.
    pub user_id: Option<String>,
    pub address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub source: CheckoutSource,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckoutSettings {
    pub shipping: ShippingPolicy,
    pub oversell: OversellPolicy,
    pub thresholds: StockThresholds,
    /// Attempts when the order number collides with a concurrent checkout.
    pub max_attempts: u32,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        CheckoutSettings {
            shipping: ShippingPolicy::default(),
            oversell: OversellPolicy::default(),
            thresholds: StockThresholds::default(),
            max_attempts: 5,
        }
    }
}

/// A product that dropped into the alert range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStock {
    pub product_id: String,
    pub product_name: String,
    pub stock: i64,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Products that crossed into the alert range with this order.
    pub low_stock: Vec<LowStock>,
    /// Products flagged short instead of reserved.
    pub short_lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order: Order,
    pub previous: OrderStatus,
    /// `false` for same-status requests, which change nothing.
    pub changed: bool,
    pub movements: Vec<StockMovement>,
}

/// Stored totals that disagree with the order lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalsDrift {
    pub order_id: String,
    pub order_number: String,
    pub stored: OrderTotals,
    pub computed: OrderTotals,
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn get_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()).into())
}

async fn items_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = ? ORDER BY rowid",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

pub(crate) async fn insert_history(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: OrderStatus,
    notes: Option<&str>,
    changed_by: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO order_status_history (id, order_id, status, notes, changed_by, changed_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(order_id)
    .bind(status)
    .bind(notes)
    .bind(changed_by)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Verifies `totals` against `items` and stores them.
async fn write_totals(
    conn: &mut SqliteConnection,
    order: &mut Order,
    totals: &OrderTotals,
    items: &[OrderItem],
    now: DateTime<Utc>,
) -> DbResult<()> {
    totals.verify(&order.order_number, items)?;

    sqlx::query(
        r#"
        UPDATE orders
        SET subtotal = ?, discount_amount = ?, shipping_cost = ?, total = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(totals.subtotal.pesos())
    .bind(totals.discount.pesos())
    .bind(totals.shipping.pesos())
    .bind(totals.total.pesos())
    .bind(now)
    .bind(&order.id)
    .execute(&mut *conn)
    .await?;

    order.subtotal = totals.subtotal.pesos();
    order.discount_amount = totals.discount.pesos();
    order.shipping_cost = totals.shipping.pesos();
    order.total = totals.total.pesos();
    order.updated_at = now;
    Ok(())
}

/// Applies a transition's stock effect to every line, keeping
/// `reserved_quantity` in step.
async fn apply_stock_effect(
    conn: &mut SqliteConnection,
    order_number: &str,
    items: &mut [OrderItem],
    effect: StockEffect,
    oversell: OversellPolicy,
    why: &str,
    created_by: &str,
    now: DateTime<Utc>,
) -> DbResult<Vec<StockMovement>> {
    let mut movements = Vec::new();

    for item in items.iter_mut() {
        let snapshot = read_stock(conn, &item.product_id).await?;
        match effect {
            StockEffect::None => {}
            StockEffect::Reserve => {
                let reservation = plan_reservation(
                    &snapshot.name,
                    snapshot.stock,
                    item.quantity,
                    order_number,
                    oversell,
                )?;
                for plan in &reservation.movements {
                    movements.push(
                        apply_movement(conn, &item.product_id, plan, Some(order_number), created_by, now)
                            .await?,
                    );
                }
                set_reserved(conn, item, reservation.reserved).await?;
            }
            StockEffect::Restore => {
                if let Some(plan) = plan_restore(snapshot.stock, item.reserved_quantity, order_number, why) {
                    movements.push(
                        apply_movement(conn, &item.product_id, &plan, Some(order_number), created_by, now)
                            .await?,
                    );
                }
                set_reserved(conn, item, 0).await?;
            }
            StockEffect::ConfirmDelivery => {
                let plan = plan_delivery_confirmation(snapshot.stock, item.quantity, order_number);
                movements.push(
                    apply_movement(conn, &item.product_id, &plan, Some(order_number), created_by, now)
                        .await?,
                );
            }
        }
    }

    Ok(movements)
}

async fn set_reserved(conn: &mut SqliteConnection, item: &mut OrderItem, reserved: i64) -> DbResult<()> {
    if item.reserved_quantity == reserved {
        return Ok(());
    }
    sqlx::query("UPDATE order_items SET reserved_quantity = ? WHERE id = ?")
        .bind(reserved)
        .bind(&item.id)
        .execute(&mut *conn)
        .await?;
    item.reserved_quantity = reserved;
    Ok(())
}

/// Moves an order to `new_status` with its stock effect and history row.
///
/// The status `UPDATE` is conditional on the status read, so a concurrent
/// change makes this fail instead of applying the stock effect twice.
pub(crate) async fn transition_in(
    conn: &mut SqliteConnection,
    order: &Order,
    new_status: OrderStatus,
    tracking_number: Option<String>,
    notes: Option<&str>,
    actor: &Actor,
    oversell: OversellPolicy,
    now: DateTime<Utc>,
) -> DbResult<StatusChange> {
    let previous = order.status;
    if previous == new_status {
        return Ok(StatusChange {
            order: order.clone(),
            previous,
            changed: false,
            movements: Vec::new(),
        });
    }

    let mut updated = order.clone();
    updated.status = new_status;
    updated.updated_at = now;
    match new_status {
        OrderStatus::Shipped => {
            updated.shipped_at = Some(now);
            if let Some(tracking) = tracking_number.filter(|t| !t.trim().is_empty()) {
                updated.tracking_number = Some(tracking.trim().to_string());
            }
        }
        OrderStatus::Delivered => updated.delivered_at = Some(now),
        _ => {}
    }

    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = ?, tracking_number = ?, shipped_at = ?, delivered_at = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(updated.status)
    .bind(&updated.tracking_number)
    .bind(updated.shipped_at)
    .bind(updated.delivered_at)
    .bind(now)
    .bind(&order.id)
    .bind(previous)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::TransactionFailed(format!(
            "order {} changed while updating its status",
            order.order_number
        )));
    }

    let mut items = items_in(conn, &order.id).await?;
    let why = format!("order {}", new_status);
    let movements = apply_stock_effect(
        conn,
        &order.order_number,
        &mut items,
        StockEffect::for_transition(previous, new_status),
        oversell,
        &why,
        &actor.label(),
        now,
    )
    .await?;

    insert_history(conn, &order.id, new_status, notes, &actor.label(), now).await?;

    info!(
        order_number = %order.order_number,
        from = %previous,
        to = %new_status,
        movements = movements.len(),
        "Order status changed"
    );

    Ok(StatusChange {
        order: updated,
        previous,
        changed: true,
        movements,
    })
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Checkout
    // -------------------------------------------------------------------------

    /// Creates an order from a cart, reserving stock.
    ///
    /// Address validation happens before anything is written. The
    /// transaction holds the write lock from its first statement, so the
    /// day's sequence is read after every earlier checkout committed. An
    /// order number collision or a busy database retries the whole
    /// transaction up to `settings.max_attempts` times.
    pub async fn checkout(
        &self,
        request: &CheckoutRequest,
        settings: &CheckoutSettings,
    ) -> DbResult<CheckoutOutcome> {
        let address = validate_shipping_address(&request.address)?;
        let attempts = settings.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_checkout(request, &address, settings).await {
                Err(e) if e.is_unique_violation_on("orders.order_number") && attempt < attempts => {
                    warn!(attempt, "Order number taken by a concurrent checkout, retrying");
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, error = %e, "Database busy during checkout, retrying");
                }
                result => return result,
            }
        }
    }

    async fn try_checkout(
        &self,
        request: &CheckoutRequest,
        address: &ShippingAddress,
        settings: &CheckoutSettings,
    ) -> DbResult<CheckoutOutcome> {
        let now = Utc::now();
        let actor = match &request.user_id {
            Some(id) => Actor::customer(id.clone()),
            None => Actor::guest(),
        };
        let created_by = actor.label();
        let mut tx = begin_write(&self.pool).await?;

        let (cart_id, lines, cart_coupon) = match &request.source {
            CheckoutSource::UserCart => {
                let user_id = request
                    .user_id
                    .as_deref()
                    .ok_or_else(|| ValidationError::required("user_id"))?;
                let cart = cart::find_cart(&mut tx, user_id)
                    .await?
                    .ok_or(CoreError::CartEmpty)?;
                let lines = cart::load_lines(&mut tx, &cart.id).await?;
                let cart_coupon = match cart.coupon_id.as_deref() {
                    Some(id) => coupon::get_in(&mut tx, id).await?,
                    None => None,
                };
                (Some(cart.id), lines, cart_coupon)
            }
            CheckoutSource::Session(lines) => (None, lines.clone(), None),
        };

        if lines.is_empty() {
            return Err(CoreError::CartEmpty.into());
        }
        validate_cart_size(lines.len())?;
        for line in &lines {
            validate_quantity(line.quantity)?;
        }

        let subtotal: Money = lines.iter().map(CartLine::line_total).sum();
        if let Some(c) = &cart_coupon {
            c.check_applicable(subtotal, now)?;
        }
        let priced = CartTotals::compute(&lines, cart_coupon.as_ref(), &settings.shipping, now);

        let today = now.date_naive();
        let issued: Vec<String> =
            sqlx::query_scalar("SELECT order_number FROM orders WHERE order_number LIKE ?")
                .bind(format!("{}-%", order_number_prefix(today)))
                .fetch_all(&mut *tx)
                .await?;
        let order_number = next_order_number(today, issued.iter().map(String::as_str))?;

        let mut order = Order {
            id: Uuid::new_v4().to_string(),
            order_number,
            user_id: request.user_id.clone(),
            first_name: address.first_name.clone(),
            last_name: address.last_name.clone(),
            email: address.email.clone(),
            phone: address.phone.clone(),
            address: address.address.clone(),
            city: address.city.clone(),
            region: address.region,
            postal_code: address.postal_code.clone(),
            notes: address.notes.clone(),
            payment_method: request.payment_method,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            subtotal: 0,
            discount_amount: 0,
            shipping_cost: 0,
            total: 0,
            coupon_code: priced.coupon_code.clone(),
            tracking_number: None,
            shipped_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, user_id, first_name, last_name, email, phone,
                address, city, region, postal_code, notes, payment_method, status,
                payment_status, subtotal, discount_amount, shipping_cost, total,
                coupon_code, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, 0, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.user_id)
        .bind(&order.first_name)
        .bind(&order.last_name)
        .bind(&order.email)
        .bind(&order.phone)
        .bind(&order.address)
        .bind(&order.city)
        .bind(order.region)
        .bind(&order.postal_code)
        .bind(&order.notes)
        .bind(order.payment_method)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(&order.coupon_code)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        debug!(order_number = %order.order_number, lines = lines.len(), "Order row inserted");

        let mut items = Vec::with_capacity(lines.len());
        let mut low_stock = Vec::new();
        let mut short_lines = Vec::new();

        for line in &lines {
            let snapshot = read_stock(&mut tx, &line.product_id).await?;
            if !snapshot.available {
                return Err(CoreError::ProductUnavailable {
                    product: snapshot.name,
                }
                .into());
            }

            let reservation = plan_reservation(
                &snapshot.name,
                snapshot.stock,
                line.quantity,
                &order.order_number,
                settings.oversell,
            )?;

            let mut after = snapshot.stock;
            for plan in &reservation.movements {
                let movement = apply_movement(
                    &mut tx,
                    &line.product_id,
                    plan,
                    Some(&order.order_number),
                    &created_by,
                    now,
                )
                .await?;
                after = movement.new_stock;
            }

            if reservation.is_short() {
                warn!(
                    order_number = %order.order_number,
                    product = %snapshot.name,
                    requested = line.quantity,
                    available = snapshot.stock,
                    policy = %settings.oversell,
                    "Ordered more than in stock"
                );
                short_lines.push(snapshot.name.clone());
            }
            if settings.thresholds.crossed_into_alert(snapshot.stock, after) {
                low_stock.push(LowStock {
                    product_id: line.product_id.clone(),
                    product_name: snapshot.name.clone(),
                    stock: after,
                });
            }

            let item = OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                price: line.unit_price.pesos(),
                quantity: line.quantity,
                reserved_quantity: reservation.reserved,
            };
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, product_name, price, quantity, reserved_quantity)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(item.price)
            .bind(item.quantity)
            .bind(item.reserved_quantity)
            .execute(&mut *tx)
            .await?;
            items.push(item);
        }

        if let Some(applied) = cart_coupon.as_ref().filter(|_| priced.coupon_code.is_some()) {
            if !coupon::redeem(&mut tx, &applied.id).await? {
                return Err(CoreError::CouponUsageLimitReached {
                    code: applied.code.clone(),
                }
                .into());
            }
        }

        let totals = OrderTotals::from_items(&items, priced.discount, priced.shipping);
        write_totals(&mut tx, &mut order, &totals, &items, now).await?;

        insert_history(&mut tx, &order.id, OrderStatus::Pending, Some("Order created"), &created_by, now)
            .await?;

        if let Some(cart_id) = cart_id.as_deref() {
            cart::clear_in(&mut tx, cart_id).await?;
        }

        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            total = order.total,
            items = items.len(),
            guest = order.user_id.is_none(),
            "Order created"
        );

        Ok(CheckoutOutcome {
            order,
            items,
            low_stock,
            short_lines,
        })
    }

    // -------------------------------------------------------------------------
    // After Checkout
    // -------------------------------------------------------------------------

    /// Staff status change. Same-status requests change nothing.
    pub async fn change_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        tracking_number: Option<String>,
        notes: Option<&str>,
        actor: &Actor,
        oversell: OversellPolicy,
    ) -> DbResult<StatusChange> {
        let mut tx = begin_write(&self.pool).await?;
        let order = get_in(&mut tx, order_id).await?;
        let change = transition_in(
            &mut tx,
            &order,
            new_status,
            tracking_number,
            notes,
            actor,
            oversell,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;
        Ok(change)
    }

    /// Cancellation on behalf of `actor`, subject to the cancellation rule.
    pub async fn cancel(&self, order_id: &str, actor: &Actor) -> DbResult<StatusChange> {
        let mut tx = begin_write(&self.pool).await?;
        let order = get_in(&mut tx, order_id).await?;
        order.ensure_cancellable(actor)?;

        let note = if actor.is_staff {
            "Cancelled by staff"
        } else {
            "Cancelled by customer"
        };
        let change = transition_in(
            &mut tx,
            &order,
            OrderStatus::Cancelled,
            None,
            Some(note),
            actor,
            OversellPolicy::default(),
            Utc::now(),
        )
        .await?;
        tx.commit().await?;
        Ok(change)
    }

    pub async fn set_payment_status(
        &self,
        order_id: &str,
        payment_status: PaymentStatus,
        actor: &Actor,
    ) -> DbResult<Order> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let mut order = get_in(&mut tx, order_id).await?;
        if order.payment_status == payment_status {
            return Ok(order);
        }

        sqlx::query("UPDATE orders SET payment_status = ?, updated_at = ? WHERE id = ?")
            .bind(payment_status)
            .bind(now)
            .bind(&order.id)
            .execute(&mut *tx)
            .await?;

        let note = format!("Payment status {} -> {}", order.payment_status, payment_status);
        insert_history(&mut tx, &order.id, order.status, Some(&note), &actor.label(), now).await?;
        tx.commit().await?;

        info!(order_number = %order.order_number, payment_status = %payment_status, "Payment status changed");
        order.payment_status = payment_status;
        order.updated_at = now;
        Ok(order)
    }

    /// Deletes an order, giving back its reserved stock unless it was
    /// cancelled or delivered.
    pub async fn delete(&self, order_id: &str, actor: &Actor) -> DbResult<Vec<StockMovement>> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let order = get_in(&mut tx, order_id).await?;
        let mut items = items_in(&mut tx, &order.id).await?;

        let movements = apply_stock_effect(
            &mut tx,
            &order.order_number,
            &mut items,
            StockEffect::for_deletion(order.status),
            OversellPolicy::default(),
            "order deleted",
            &actor.label(),
            now,
        )
        .await?;

        sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(&order.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(order_number = %order.order_number, restored = movements.len(), "Order deleted");
        Ok(movements)
    }

    /// Orders whose stored totals disagree with their lines.
    pub async fn audit_totals(&self) -> DbResult<Vec<TotalsDrift>> {
        let orders = sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        let all_items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items")
            .fetch_all(&self.pool)
            .await?;

        let mut by_order: HashMap<&str, Vec<OrderItem>> = HashMap::new();
        for item in &all_items {
            by_order.entry(item.order_id.as_str()).or_default().push(item.clone());
        }

        let drift = orders
            .iter()
            .filter_map(|order| {
                let items = by_order.get(order.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                let stored = order.stored_totals();
                let computed = OrderTotals::from_items(items, stored.discount, stored.shipping);
                (stored != computed).then(|| TotalsDrift {
                    order_id: order.id.clone(),
                    order_number: order.order_number.clone(),
                    stored,
                    computed,
                })
            })
            .collect();
        Ok(drift)
    }

    /// Recomputes an order's totals from its lines.
    pub async fn repair_totals(&self, order_id: &str) -> DbResult<Order> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let mut order = get_in(&mut tx, order_id).await?;
        let items = items_in(&mut tx, &order.id).await?;

        let stored = order.stored_totals();
        let computed = OrderTotals::from_items(&items, stored.discount, stored.shipping);
        if stored != computed {
            warn!(
                order_number = %order.order_number,
                stored_total = %stored.total,
                computed_total = %computed.total,
                "Repairing order totals"
            );
            write_totals(&mut tx, &mut order, &computed, &items, now).await?;
        }
        tx.commit().await?;
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub async fn get(&self, order_id: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_number = ?")
            .bind(order_number.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let mut conn = self.pool.acquire().await?;
        items_in(&mut conn, order_id).await
    }

    pub async fn history(&self, order_id: &str) -> DbResult<Vec<OrderStatusHistory>> {
        let rows = sqlx::query_as::<_, OrderStatusHistory>(
            "SELECT * FROM order_status_history WHERE order_id = ? ORDER BY changed_at, rowid",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// A customer's orders, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Staff listing, optionally by status, newest first.
    pub async fn list(&self, status: Option<OrderStatus>, limit: i64) -> DbResult<Vec<Order>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, Order>(
                    "SELECT * FROM orders WHERE status = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Order>(
                    "SELECT * FROM orders ORDER BY created_at DESC, rowid DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Database;
    use crate::test_support::{address, coupon, seed_product, test_db};
    use dulce_core::coupon::DiscountType;
    use dulce_core::stock::MovementType;

    fn cart_request(user_id: &str) -> CheckoutRequest {
        CheckoutRequest {
            user_id: Some(user_id.to_string()),
            address: address(),
            payment_method: PaymentMethod::Transfer,
            source: CheckoutSource::UserCart,
        }
    }

    fn session_request(lines: Vec<CartLine>) -> CheckoutRequest {
        CheckoutRequest {
            user_id: None,
            address: address(),
            payment_method: PaymentMethod::Transfer,
            source: CheckoutSource::Session(lines),
        }
    }

    fn line(product_id: &str, price: i64, quantity: i64) -> CartLine {
        CartLine {
            product_id: product_id.to_string(),
            product_name: product_id.to_string(),
            unit_price: Money::from_pesos(price),
            quantity,
        }
    }

    async fn ledger_matches(db: &Database, product_id: &str) -> bool {
        let stock = db.catalog().get(product_id).await.unwrap().unwrap().stock;
        db.stock().latest_ledger_stock(product_id).await.unwrap() == Some(stock)
    }

    async fn stock_of(db: &Database, product_id: &str) -> i64 {
        db.catalog().get(product_id).await.unwrap().unwrap().stock
    }

    #[tokio::test]
    async fn test_checkout_two_at_6000() {
        let db = test_db().await;
        let product = seed_product(&db, "chips", 6000, 10).await;
        db.carts().add_item("u1", &product.id, 2).await.unwrap();

        let outcome = db
            .orders()
            .checkout(&cart_request("u1"), &CheckoutSettings::default())
            .await
            .unwrap();
        let order = &outcome.order;

        let prefix = order_number_prefix(Utc::now().date_naive());
        assert_eq!(order.order_number, format!("{}-0001", prefix));
        assert_eq!(order.subtotal, 12000);
        assert_eq!(order.shipping_cost, 3000);
        assert_eq!(order.total, 15000);
        assert_eq!(outcome.items[0].reserved_quantity, 2);

        assert_eq!(stock_of(&db, &product.id).await, 8);
        assert!(ledger_matches(&db, &product.id).await);

        let cart = db.carts().get_or_create("u1").await.unwrap();
        assert!(db.carts().items(&cart.id).await.unwrap().is_empty());

        let history = db.orders().history(&order.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, OrderStatus::Pending);

        let stored = db.orders().get_by_number(&order.order_number).await.unwrap().unwrap();
        assert_eq!(stored.total, 15000);
        assert!(db.orders().audit_totals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_numbers_increase_per_day() {
        let db = test_db().await;
        let product = seed_product(&db, "avena", 1000, 100).await;
        let settings = CheckoutSettings::default();

        let first = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 1)]), &settings)
            .await
            .unwrap();
        let second = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 1)]), &settings)
            .await
            .unwrap();

        assert!(first.order.order_number.ends_with("-0001"));
        assert!(second.order.order_number.ends_with("-0002"));
    }

    #[tokio::test]
    async fn test_free_shipping_at_threshold() {
        let db = test_db().await;
        let product = seed_product(&db, "caja", 15000, 5).await;

        let outcome = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 15000, 1)]), &CheckoutSettings::default())
            .await
            .unwrap();
        assert_eq!(outcome.order.shipping_cost, 0);
        assert_eq!(outcome.order.total, 15000);
    }

    #[tokio::test]
    async fn test_session_prices_are_frozen() {
        let db = test_db().await;
        let product = seed_product(&db, "nuez", 2000, 5).await;
        db.catalog().set_sale(&product.id, None, Some(1500)).await.unwrap();

        // The session captured the old price.
        let outcome = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 2000, 2)]), &CheckoutSettings::default())
            .await
            .unwrap();
        assert_eq!(outcome.items[0].price, 2000);
        assert_eq!(outcome.order.subtotal, 4000);
        assert!(outcome.order.user_id.is_none());
    }

    #[tokio::test]
    async fn test_empty_cart_and_bad_address_write_nothing() {
        let db = test_db().await;
        let err = db
            .orders()
            .checkout(&cart_request("u1"), &CheckoutSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::CartEmpty)));

        let product = seed_product(&db, "x", 1000, 5).await;
        db.carts().add_item("u1", &product.id, 1).await.unwrap();
        let mut request = cart_request("u1");
        request.address.email = "not-an-email".to_string();
        let err = db
            .orders()
            .checkout(&request, &CheckoutSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));

        assert!(db.orders().list(None, 10).await.unwrap().is_empty());
        assert_eq!(stock_of(&db, &product.id).await, 5);
    }

    #[tokio::test]
    async fn test_oversell_policies() {
        let db = test_db().await;
        let product = seed_product(&db, "escasa", 1000, 1).await;

        let flag = CheckoutSettings::default();
        let outcome = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 3)]), &flag)
            .await
            .unwrap();
        assert_eq!(outcome.items[0].reserved_quantity, 0);
        assert_eq!(outcome.short_lines, vec!["escasa".to_string()]);
        assert_eq!(stock_of(&db, &product.id).await, 1);
        let latest = db.stock().movements(&product.id, 1).await.unwrap();
        assert_eq!(latest[0].movement_type, MovementType::Adjustment);
        assert_eq!(latest[0].quantity, 0);

        let reject = CheckoutSettings {
            oversell: OversellPolicy::Reject,
            ..CheckoutSettings::default()
        };
        let err = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 3)]), &reject)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InsufficientStock { .. })));
        assert_eq!(db.orders().list(None, 10).await.unwrap().len(), 1);

        let negative = CheckoutSettings {
            oversell: OversellPolicy::AllowNegative,
            ..CheckoutSettings::default()
        };
        let outcome = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 3)]), &negative)
            .await
            .unwrap();
        assert_eq!(outcome.items[0].reserved_quantity, 3);
        assert_eq!(stock_of(&db, &product.id).await, -2);
        assert!(ledger_matches(&db, &product.id).await);
    }

    #[tokio::test]
    async fn test_cancel_restores_exactly_what_was_taken() {
        let db = test_db().await;
        let product = seed_product(&db, "chips", 1000, 10).await;
        db.carts().add_item("u1", &product.id, 3).await.unwrap();
        let outcome = db
            .orders()
            .checkout(&cart_request("u1"), &CheckoutSettings::default())
            .await
            .unwrap();
        assert_eq!(stock_of(&db, &product.id).await, 7);

        let change = db
            .orders()
            .cancel(&outcome.order.id, &Actor::customer("u1"))
            .await
            .unwrap();
        assert!(change.changed);
        assert_eq!(change.movements.len(), 1);
        assert_eq!(change.movements[0].movement_type, MovementType::Return);
        assert_eq!(stock_of(&db, &product.id).await, 10);
        assert!(ledger_matches(&db, &product.id).await);

        let items = db.orders().items(&outcome.order.id).await.unwrap();
        assert_eq!(items[0].reserved_quantity, 0);

        // Reactivating reserves again.
        db.orders()
            .change_status(
                &outcome.order.id,
                OrderStatus::Pending,
                None,
                None,
                &Actor::staff("admin"),
                OversellPolicy::Flag,
            )
            .await
            .unwrap();
        assert_eq!(stock_of(&db, &product.id).await, 7);
        assert!(ledger_matches(&db, &product.id).await);
    }

    #[tokio::test]
    async fn test_flagged_line_restores_nothing() {
        let db = test_db().await;
        let product = seed_product(&db, "poca", 1000, 1).await;
        let outcome = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 2)]), &CheckoutSettings::default())
            .await
            .unwrap();

        let change = db
            .orders()
            .cancel(&outcome.order.id, &Actor::staff("admin"))
            .await
            .unwrap();
        assert!(change.movements.is_empty());
        assert_eq!(stock_of(&db, &product.id).await, 1);
    }

    #[tokio::test]
    async fn test_customer_cancellation_rule() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 1000, 10).await;
        db.carts().add_item("u1", &product.id, 1).await.unwrap();
        let order = db
            .orders()
            .checkout(&cart_request("u1"), &CheckoutSettings::default())
            .await
            .unwrap()
            .order;
        let staff = Actor::staff("admin");

        db.orders()
            .change_status(&order.id, OrderStatus::Confirmed, None, None, &staff, OversellPolicy::Flag)
            .await
            .unwrap();

        let err = db.orders().cancel(&order.id, &Actor::customer("u1")).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::OrderNotCancellable { .. })));

        let change = db.orders().cancel(&order.id, &staff).await.unwrap();
        assert_eq!(change.order.status, OrderStatus::Cancelled);
        assert_eq!(stock_of(&db, &product.id).await, 10);
    }

    #[tokio::test]
    async fn test_shipping_and_delivery() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 1000, 10).await;
        let order = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 2)]), &CheckoutSettings::default())
            .await
            .unwrap()
            .order;
        let staff = Actor::staff("admin");

        let shipped = db
            .orders()
            .change_status(
                &order.id,
                OrderStatus::Shipped,
                Some("CX123".to_string()),
                None,
                &staff,
                OversellPolicy::Flag,
            )
            .await
            .unwrap();
        assert!(shipped.order.shipped_at.is_some());
        assert_eq!(shipped.order.tracking_number.as_deref(), Some("CX123"));
        assert!(shipped.movements.is_empty());

        let same = db
            .orders()
            .change_status(&order.id, OrderStatus::Shipped, None, None, &staff, OversellPolicy::Flag)
            .await
            .unwrap();
        assert!(!same.changed);

        let delivered = db
            .orders()
            .change_status(&order.id, OrderStatus::Delivered, None, None, &staff, OversellPolicy::Flag)
            .await
            .unwrap();
        assert!(delivered.order.delivered_at.is_some());
        assert_eq!(delivered.movements.len(), 1);
        assert_eq!(delivered.movements[0].quantity, 0);
        assert_eq!(stock_of(&db, &product.id).await, 8);
        assert!(ledger_matches(&db, &product.id).await);

        let history = db.orders().history(&order.id).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_restores_active_orders_only() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 1000, 10).await;
        let settings = CheckoutSettings::default();
        let staff = Actor::staff("admin");

        let pending = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 4)]), &settings)
            .await
            .unwrap()
            .order;
        let restored = db.orders().delete(&pending.id, &staff).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(stock_of(&db, &product.id).await, 10);
        assert!(db.orders().get(&pending.id).await.unwrap().is_none());

        let delivered = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 4)]), &settings)
            .await
            .unwrap()
            .order;
        db.orders()
            .change_status(&delivered.id, OrderStatus::Delivered, None, None, &staff, OversellPolicy::Flag)
            .await
            .unwrap();
        assert!(db.orders().delete(&delivered.id, &staff).await.unwrap().is_empty());
        assert_eq!(stock_of(&db, &product.id).await, 6);
    }

    #[tokio::test]
    async fn test_coupon_is_redeemed_once() {
        let db = test_db().await;
        let product = seed_product(&db, "caja", 10_000, 10).await;
        let mut c = coupon("UNAVEZ", DiscountType::FixedAmount, 2000);
        c.max_uses = Some(1);
        let c = db.coupons().insert(&c).await.unwrap();

        for user in ["u1", "u2"] {
            db.carts().add_item(user, &product.id, 1).await.unwrap();
            db.carts().apply_coupon(user, "unavez", Utc::now()).await.unwrap();
        }

        let first = db
            .orders()
            .checkout(&cart_request("u1"), &CheckoutSettings::default())
            .await
            .unwrap()
            .order;
        assert_eq!(first.discount_amount, 2000);
        assert_eq!(first.coupon_code.as_deref(), Some("UNAVEZ"));
        assert_eq!(first.total, 10_000 - 2000 + 3000);

        let err = db
            .orders()
            .checkout(&cart_request("u2"), &CheckoutSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::CouponUsageLimitReached { .. })));
        assert_eq!(db.coupons().get(&c.id).await.unwrap().unwrap().current_uses, 1);
        assert_eq!(stock_of(&db, &product.id).await, 9);
    }

    #[tokio::test]
    async fn test_low_stock_is_reported() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 1000, 6).await;
        let outcome = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 2)]), &CheckoutSettings::default())
            .await
            .unwrap();
        assert_eq!(outcome.low_stock.len(), 1);
        assert_eq!(outcome.low_stock[0].stock, 4);
    }

    #[tokio::test]
    async fn test_totals_audit_and_repair() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 6000, 10).await;
        let order = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 6000, 2)]), &CheckoutSettings::default())
            .await
            .unwrap()
            .order;

        sqlx::query("UPDATE orders SET subtotal = 9000, total = 12000 WHERE id = ?")
            .bind(&order.id)
            .execute(db.pool())
            .await
            .unwrap();

        let drift = db.orders().audit_totals().await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].computed.total.pesos(), 15000);

        let repaired = db.orders().repair_totals(&order.id).await.unwrap();
        assert_eq!(repaired.subtotal, 12000);
        assert_eq!(repaired.total, 15000);
        assert!(db.orders().audit_totals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_order_number_maps_to_unique_violation() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 1000, 10).await;
        let order = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 1)]), &CheckoutSettings::default())
            .await
            .unwrap()
            .order;

        let raw = sqlx::query(
            "INSERT INTO orders (id, order_number, first_name, last_name, email, phone, address, city, region, subtotal, shipping_cost, total, created_at, updated_at) VALUES ('dup', ?, 'a', 'b', 'c@d.cl', '12345678', 'x', 'y', 'rm', 0, 0, 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .bind(&order.order_number)
        .execute(db.pool())
        .await
        .unwrap_err();
        assert!(DbError::from(raw).is_unique_violation_on("orders.order_number"));
    }

    #[tokio::test]
    async fn test_checkout_refuses_a_fifth_digit() {
        let db = test_db().await;
        let product = seed_product(&db, "x", 1000, 10).await;
        let last = format!("{}-9999", order_number_prefix(Utc::now().date_naive()));
        sqlx::query(
            "INSERT INTO orders (id, order_number, first_name, last_name, email, phone, address, city, region, subtotal, shipping_cost, total, created_at, updated_at) VALUES ('full', ?, 'a', 'b', 'c@d.cl', '12345678', 'x', 'y', 'rm', 0, 0, 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .bind(&last)
        .execute(db.pool())
        .await
        .unwrap();

        let err = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 1)]), &CheckoutSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::OrderNumbersExhausted { .. })));
        assert_eq!(stock_of(&db, &product.id).await, 10);
    }

    async fn file_db(dir: &tempfile::TempDir) -> Database {
        let config = crate::pool::DbConfig::new(dir.path().join("shop.db")).max_connections(8);
        Database::new(config).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_on_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;
        let product = seed_product(&db, "galleta", 1000, 100).await;

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            let product_id = product.id.clone();
            tasks.push(tokio::spawn(async move {
                db.orders()
                    .checkout(
                        &session_request(vec![line(&product_id, 1000, 1)]),
                        &CheckoutSettings::default(),
                    )
                    .await
            }));
        }

        let mut numbers = std::collections::HashSet::new();
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            numbers.insert(outcome.order.order_number);
        }
        assert_eq!(numbers.len(), 16);
        assert_eq!(stock_of(&db, &product.id).await, 84);
        assert!(ledger_matches(&db, &product.id).await);
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_restore_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;
        let product = seed_product(&db, "galleta", 1000, 10).await;
        let order = db
            .orders()
            .checkout(&session_request(vec![line(&product.id, 1000, 3)]), &CheckoutSettings::default())
            .await
            .unwrap()
            .order;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            let order_id = order.id.clone();
            tasks.push(tokio::spawn(async move {
                db.orders().cancel(&order_id, &Actor::staff("admin")).await
            }));
        }

        let mut changed = 0;
        for task in tasks {
            if let Ok(change) = task.await.unwrap() {
                if change.changed {
                    changed += 1;
                }
            }
        }
        assert_eq!(changed, 1);
        assert_eq!(stock_of(&db, &product.id).await, 10);
        assert!(ledger_matches(&db, &product.id).await);
        db.close().await;
    }
}
