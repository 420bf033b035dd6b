use axum::extract::State;
use axum::Json;
use bigdecimal::BigDecimal;
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use sqlx::{query, Row};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::StockError;
use crate::ledger::{self, MovementType, NewMovement};
use crate::stock::ShoeSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderOperation {
    Create,
    Update,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemLine {
    pub product_id: Uuid,
    pub size: ShoeSize,
    #[serde(default)]
    pub color: Option<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

/// An order lifecycle event, the only entry point that drives the
/// reservation/release protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderEvent {
    pub order_reference: String,
    pub operation: OrderOperation,
    pub status: OrderStatus,
    #[serde(default)]
    pub previous_status: Option<OrderStatus>,
    pub items: Vec<OrderItemLine>,
    #[serde(default)]
    pub shipping_cost: Option<BigDecimal>,
    #[serde(default)]
    pub tax_amount: Option<BigDecimal>,
    #[serde(default)]
    pub discount_amount: Option<BigDecimal>,
}

/// What a transition means for stock, decided purely from the status pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAction {
    /// New unconfirmed order: place holds.
    Reserve,
    /// Order created already confirmed: sell without a prior hold.
    DirectSale,
    /// pending -> confirmed: convert holds into sales.
    ConvertReservations,
    /// cancelled/refunded: release holds, or return sold units to stock.
    ReleaseOrReturn,
    /// No stock effect.
    NoAction,
}

impl StockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockAction::Reserve => "reserve",
            StockAction::DirectSale => "direct_sale",
            StockAction::ConvertReservations => "convert_reservations",
            StockAction::ReleaseOrReturn => "release_or_return",
            StockAction::NoAction => "none",
        }
    }
}

pub fn plan_stock_action(
    operation: OrderOperation,
    previous_status: Option<OrderStatus>,
    status: OrderStatus,
) -> StockAction {
    if operation == OrderOperation::Update && previous_status == Some(status) {
        return StockAction::NoAction;
    }
    match (operation, status) {
        (OrderOperation::Create, OrderStatus::Pending) => StockAction::Reserve,
        (OrderOperation::Create, OrderStatus::Confirmed) => StockAction::DirectSale,
        (OrderOperation::Create, _) => StockAction::NoAction,
        (OrderOperation::Update, OrderStatus::Confirmed) => {
            if previous_status == Some(OrderStatus::Pending) {
                StockAction::ConvertReservations
            } else {
                StockAction::NoAction
            }
        }
        (OrderOperation::Update, OrderStatus::Cancelled | OrderStatus::Refunded) => {
            StockAction::ReleaseOrReturn
        }
        (OrderOperation::Update, _) => StockAction::NoAction,
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LineResult {
    Reserved,
    Sold,
    Released,
    Returned,
    Skipped,
    Rejected { code: &'static str, available: i32 },
}

#[derive(Debug, Serialize)]
pub struct LineOutcome {
    pub product_id: Uuid,
    pub size: ShoeSize,
    pub quantity: i32,
    #[serde(flatten)]
    pub result: LineResult,
}

#[derive(Debug, Serialize)]
pub struct OrderStockReport {
    pub order_reference: String,
    pub action: &'static str,
    pub subtotal: BigDecimal,
    pub total: BigDecimal,
    pub lines: Vec<LineOutcome>,
}

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// Derived pricing for the event, for the report and the log line. The
/// order document itself lives outside this service.
pub fn event_totals(event: &OrderEvent) -> common_money::OrderTotals {
    let line_totals: Vec<BigDecimal> = event
        .items
        .iter()
        .map(|item| common_money::line_total(item.quantity, &item.unit_price))
        .collect();
    common_money::order_totals(
        &line_totals,
        event.shipping_cost.as_ref().unwrap_or(&zero()),
        event.tax_amount.as_ref().unwrap_or(&zero()),
        event.discount_amount.as_ref().unwrap_or(&zero()),
    )
}

/// Apply one order lifecycle event to stock. Each line runs in its own
/// transaction so one rejected line does not roll back its siblings;
/// replaying the same transition is a no-op for already-processed lines.
pub async fn handle_order_event(
    state: &AppState,
    event: &OrderEvent,
) -> Result<OrderStockReport, StockError> {
    let action = plan_stock_action(event.operation, event.previous_status, event.status);
    let totals = event_totals(event);
    tracing::info!(
        order_reference = %event.order_reference,
        action = action.as_str(),
        lines = event.items.len(),
        total = %totals.total,
        "Order event received"
    );

    let mut lines = Vec::with_capacity(event.items.len());
    for item in &event.items {
        let result = match action {
            StockAction::Reserve => reserve_line(state, &event.order_reference, item).await?,
            StockAction::DirectSale => direct_sale_line(state, &event.order_reference, item).await?,
            StockAction::ConvertReservations => convert_line(state, &event.order_reference, item).await?,
            StockAction::ReleaseOrReturn => {
                release_or_return_line(state, &event.order_reference, item).await?
            }
            StockAction::NoAction => LineResult::Skipped,
        };
        lines.push(LineOutcome {
            product_id: item.product_id,
            size: item.size,
            quantity: item.quantity,
            result,
        });
    }

    Ok(OrderStockReport {
        order_reference: event.order_reference.clone(),
        action: action.as_str(),
        subtotal: totals.subtotal,
        total: totals.total,
        lines,
    })
}

async fn reserve_line(
    state: &AppState,
    order_reference: &str,
    item: &OrderItemLine,
) -> Result<LineResult, StockError> {
    let mut tx = state.db.begin().await?;
    let existing = query(
        "SELECT status FROM order_reservations \
         WHERE order_reference = $1 AND product_id = $2 AND size = $3",
    )
    .bind(order_reference)
    .bind(item.product_id)
    .bind(item.size.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    if existing.is_some() {
        tx.commit().await?;
        return Ok(LineResult::Skipped);
    }

    match ledger::reserve_stock(
        &mut tx,
        &state.metrics,
        &state.config,
        item.product_id,
        item.size,
        item.quantity,
        order_reference,
    )
    .await
    {
        Ok(()) => {
            query(
                "INSERT INTO order_reservations (order_reference, product_id, size, quantity) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order_reference)
            .bind(item.product_id)
            .bind(item.size.as_str())
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(LineResult::Reserved)
        }
        Err(StockError::InsufficientStock { available, .. }) => {
            tx.rollback().await?;
            tracing::warn!(
                order_reference = %order_reference,
                product_id = %item.product_id,
                size = %item.size,
                requested = item.quantity,
                available,
                "Reservation rejected: insufficient stock"
            );
            Ok(LineResult::Rejected { code: "insufficient_stock", available })
        }
        Err(err) => Err(err),
    }
}

async fn direct_sale_line(
    state: &AppState,
    order_reference: &str,
    item: &OrderItemLine,
) -> Result<LineResult, StockError> {
    let mut tx = state.db.begin().await?;
    if sale_recorded(&mut tx, order_reference, item).await? {
        tx.commit().await?;
        return Ok(LineResult::Skipped);
    }

    let movement = NewMovement::new(
        item.product_id,
        item.size,
        MovementType::Sale,
        -item.quantity,
        format!("Sale - order {order_reference}"),
    )
    .automated()
    .with_order_reference(order_reference);

    match ledger::append_movement(&mut tx, &state.metrics, &state.config, movement).await {
        Ok(_) => {
            tx.commit().await?;
            Ok(LineResult::Sold)
        }
        Err(StockError::InsufficientStock { available, .. }) => {
            tx.rollback().await?;
            Ok(LineResult::Rejected { code: "insufficient_stock", available })
        }
        Err(err) => Err(err),
    }
}

async fn convert_line(
    state: &AppState,
    order_reference: &str,
    item: &OrderItemLine,
) -> Result<LineResult, StockError> {
    let mut tx = state.db.begin().await?;
    let row = query(
        "SELECT quantity, status FROM order_reservations \
         WHERE order_reference = $1 AND product_id = $2 AND size = $3 FOR UPDATE",
    )
    .bind(order_reference)
    .bind(item.product_id)
    .bind(item.size.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    match row {
        None => {
            // Confirmed without a recorded hold (order predates the hold or
            // was placed directly): fall back to a guarded direct sale.
            tx.commit().await?;
            direct_sale_line(state, order_reference, item).await
        }
        Some(row) => {
            let status: String = row.get("status");
            if status != "active" {
                tx.commit().await?;
                return Ok(LineResult::Skipped);
            }
            let held: i32 = row.get("quantity");
            match ledger::convert_hold_to_sale(
                &mut tx,
                &state.metrics,
                &state.config,
                item.product_id,
                item.size,
                held,
                order_reference,
            )
            .await
            {
                Ok(_) => {
                    mark_reservation(&mut tx, order_reference, item, "converted").await?;
                    tx.commit().await?;
                    Ok(LineResult::Sold)
                }
                Err(StockError::InsufficientStock { available, .. }) => {
                    tx.rollback().await?;
                    Ok(LineResult::Rejected { code: "insufficient_stock", available })
                }
                Err(err) => Err(err),
            }
        }
    }
}

async fn release_or_return_line(
    state: &AppState,
    order_reference: &str,
    item: &OrderItemLine,
) -> Result<LineResult, StockError> {
    let mut tx = state.db.begin().await?;
    let row = query(
        "SELECT quantity, status FROM order_reservations \
         WHERE order_reference = $1 AND product_id = $2 AND size = $3 FOR UPDATE",
    )
    .bind(order_reference)
    .bind(item.product_id)
    .bind(item.size.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    match row {
        Some(row) => {
            let status: String = row.get("status");
            let held: i32 = row.get("quantity");
            match status.as_str() {
                "active" => {
                    ledger::release_hold(
                        &mut tx,
                        &state.metrics,
                        &state.config,
                        item.product_id,
                        item.size,
                        held,
                        order_reference,
                        format!("Hold released - order {order_reference} cancelled"),
                    )
                    .await?;
                    mark_reservation(&mut tx, order_reference, item, "released").await?;
                    tx.commit().await?;
                    Ok(LineResult::Released)
                }
                "converted" => {
                    let returned = return_sold_units(&mut tx, state, order_reference, item, held).await?;
                    tx.commit().await?;
                    Ok(returned)
                }
                _ => {
                    tx.commit().await?;
                    Ok(LineResult::Skipped)
                }
            }
        }
        None => {
            // No hold was ever recorded. If a direct sale went through for
            // this order, put the units back; otherwise nothing to undo.
            if sale_recorded(&mut tx, order_reference, item).await? {
                let returned =
                    return_sold_units(&mut tx, state, order_reference, item, item.quantity).await?;
                tx.commit().await?;
                Ok(returned)
            } else {
                tx.commit().await?;
                Ok(LineResult::Skipped)
            }
        }
    }
}

async fn return_sold_units(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    state: &AppState,
    order_reference: &str,
    item: &OrderItemLine,
    quantity: i32,
) -> Result<LineResult, StockError> {
    if return_recorded(tx, order_reference, item).await? {
        return Ok(LineResult::Skipped);
    }
    ledger::append_movement(
        tx,
        &state.metrics,
        &state.config,
        NewMovement::new(
            item.product_id,
            item.size,
            MovementType::Return,
            quantity,
            format!("Return - order {order_reference} cancelled"),
        )
        .automated()
        .with_order_reference(order_reference),
    )
    .await?;
    Ok(LineResult::Returned)
}

async fn sale_recorded(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_reference: &str,
    item: &OrderItemLine,
) -> Result<bool, StockError> {
    let row = query(
        "SELECT 1 AS present FROM stock_movements \
         WHERE order_reference = $1 AND product_id = $2 AND size = $3 AND movement_type = 'sale' \
         LIMIT 1",
    )
    .bind(order_reference)
    .bind(item.product_id)
    .bind(item.size.as_str())
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}

async fn return_recorded(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_reference: &str,
    item: &OrderItemLine,
) -> Result<bool, StockError> {
    let row = query(
        "SELECT 1 AS present FROM stock_movements \
         WHERE order_reference = $1 AND product_id = $2 AND size = $3 AND movement_type = 'return' \
         LIMIT 1",
    )
    .bind(order_reference)
    .bind(item.product_id)
    .bind(item.size.as_str())
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}

async fn mark_reservation(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_reference: &str,
    item: &OrderItemLine,
    status: &str,
) -> Result<(), StockError> {
    query(
        "UPDATE order_reservations SET status = $4, updated_at = NOW() \
         WHERE order_reference = $1 AND product_id = $2 AND size = $3",
    )
    .bind(order_reference)
    .bind(item.product_id)
    .bind(item.size.as_str())
    .bind(status)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Release every still-active hold for an order (manual release path).
pub async fn release_active_reservations(
    state: &AppState,
    order_reference: &str,
) -> Result<Vec<LineOutcome>, StockError> {
    let rows = query(
        "SELECT product_id, size, quantity FROM order_reservations \
         WHERE order_reference = $1 AND status = 'active' ORDER BY product_id, size",
    )
    .bind(order_reference)
    .fetch_all(&state.db)
    .await?;

    let mut released = Vec::with_capacity(rows.len());
    for row in rows {
        let product_id: Uuid = row.get("product_id");
        let size_str: String = row.get("size");
        let Ok(size) = size_str.parse::<ShoeSize>() else {
            tracing::warn!(order_reference = %order_reference, size = %size_str, "Skipping reservation with unknown size");
            continue;
        };
        let quantity: i32 = row.get("quantity");

        let mut tx = state.db.begin().await?;
        // Re-check under lock; another release may have won the race.
        let still_active = query(
            "SELECT 1 AS present FROM order_reservations \
             WHERE order_reference = $1 AND product_id = $2 AND size = $3 AND status = 'active' FOR UPDATE",
        )
        .bind(order_reference)
        .bind(product_id)
        .bind(size.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if still_active.is_none() {
            tx.commit().await?;
            continue;
        }
        ledger::release_hold(
            &mut tx,
            &state.metrics,
            &state.config,
            product_id,
            size,
            quantity,
            order_reference,
            format!("Hold released - order {order_reference}"),
        )
        .await?;
        query(
            "UPDATE order_reservations SET status = 'released', updated_at = NOW() \
             WHERE order_reference = $1 AND product_id = $2 AND size = $3",
        )
        .bind(order_reference)
        .bind(product_id)
        .bind(size.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        released.push(LineOutcome {
            product_id,
            size,
            quantity,
            result: LineResult::Released,
        });
    }
    Ok(released)
}

fn validate_event(event: &OrderEvent) -> Result<(), ApiError> {
    if event.order_reference.trim().is_empty() {
        return Err(ApiError::BadRequest {
            code: "missing_order_reference",
            trace_id: None,
            message: Some("order_reference must not be empty".into()),
        });
    }
    if event.items.is_empty() {
        return Err(ApiError::BadRequest {
            code: "empty_order",
            trace_id: None,
            message: Some("an order event must include at least one item".into()),
        });
    }
    for item in &event.items {
        if item.quantity <= 0 {
            return Err(ApiError::BadRequest {
                code: "invalid_quantity",
                trace_id: None,
                message: Some(format!(
                    "Quantity for product {} must be positive",
                    item.product_id
                )),
            });
        }
    }
    Ok(())
}

pub async fn ingest_order_event(
    State(state): State<AppState>,
    Json(event): Json<OrderEvent>,
) -> Result<Json<OrderStockReport>, ApiError> {
    validate_event(&event)?;
    let report = handle_order_event(&state, &event).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_pending_reserves() {
        assert_eq!(
            plan_stock_action(OrderOperation::Create, None, OrderStatus::Pending),
            StockAction::Reserve
        );
    }

    #[test]
    fn create_confirmed_sells_directly() {
        assert_eq!(
            plan_stock_action(OrderOperation::Create, None, OrderStatus::Confirmed),
            StockAction::DirectSale
        );
    }

    #[test]
    fn pending_to_confirmed_converts_holds() {
        assert_eq!(
            plan_stock_action(
                OrderOperation::Update,
                Some(OrderStatus::Pending),
                OrderStatus::Confirmed
            ),
            StockAction::ConvertReservations
        );
    }

    #[test]
    fn cancellations_release_or_return() {
        for previous in [OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Shipped] {
            assert_eq!(
                plan_stock_action(OrderOperation::Update, Some(previous), OrderStatus::Cancelled),
                StockAction::ReleaseOrReturn
            );
        }
        assert_eq!(
            plan_stock_action(
                OrderOperation::Update,
                Some(OrderStatus::Confirmed),
                OrderStatus::Refunded
            ),
            StockAction::ReleaseOrReturn
        );
    }

    #[test]
    fn replaying_the_same_status_is_a_no_op() {
        assert_eq!(
            plan_stock_action(
                OrderOperation::Update,
                Some(OrderStatus::Confirmed),
                OrderStatus::Confirmed
            ),
            StockAction::NoAction
        );
    }

    #[test]
    fn fulfilment_statuses_do_not_touch_stock() {
        for status in [OrderStatus::Preparing, OrderStatus::Shipped, OrderStatus::Delivered] {
            assert_eq!(
                plan_stock_action(OrderOperation::Update, Some(OrderStatus::Confirmed), status),
                StockAction::NoAction
            );
        }
    }

    #[test]
    fn shipped_to_confirmed_does_not_convert() {
        // Only a pending order still holds reservations to convert.
        assert_eq!(
            plan_stock_action(
                OrderOperation::Update,
                Some(OrderStatus::Shipped),
                OrderStatus::Confirmed
            ),
            StockAction::NoAction
        );
    }

    #[test]
    fn event_totals_derive_from_lines() {
        let dec = |s: &str| BigDecimal::parse_bytes(s.as_bytes(), 10).unwrap();
        let event = OrderEvent {
            order_reference: "ORD-1".into(),
            operation: OrderOperation::Create,
            status: OrderStatus::Pending,
            previous_status: None,
            items: vec![
                OrderItemLine {
                    product_id: Uuid::new_v4(),
                    size: ShoeSize::Eu41,
                    color: Some("Stone White".into()),
                    quantity: 2,
                    unit_price: dec("89.90"),
                },
                OrderItemLine {
                    product_id: Uuid::new_v4(),
                    size: ShoeSize::Eu42,
                    color: None,
                    quantity: 1,
                    unit_price: dec("120.00"),
                },
            ],
            shipping_cost: Some(dec("4.90")),
            tax_amount: None,
            discount_amount: Some(dec("10.00")),
        };
        let totals = event_totals(&event);
        assert_eq!(totals.subtotal, dec("299.80"));
        assert_eq!(totals.total, dec("294.70"));
    }
}
