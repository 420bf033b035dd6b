use axum::extract::{Path, State};
use axum::Json;
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::app::AppState;
use crate::order_trigger::{self, LineOutcome, OrderEvent, OrderItemLine, OrderOperation, OrderStatus};
use crate::stock::ShoeSize;

#[derive(Debug, Deserialize)]
pub struct ReservationItemPayload {
    pub product_id: Uuid,
    pub size: ShoeSize,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub order_reference: String,
    pub items: Vec<ReservationItemPayload>,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub order_reference: String,
    pub results: Vec<LineOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub order_reference: String,
    pub released: Vec<LineOutcome>,
}

/// Place holds for an unconfirmed order. Per-line outcomes: a line that
/// cannot be covered is reported, not silently accepted.
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(payload): Json<CreateReservationRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    if payload.order_reference.trim().is_empty() {
        return Err(ApiError::bad_request("missing_order_reference", None));
    }
    if payload.items.is_empty() {
        return Err(ApiError::BadRequest {
            code: "empty_reservation",
            trace_id: None,
            message: Some("Reservation must include at least one item".into()),
        });
    }

    let mut condensed: HashMap<(Uuid, ShoeSize), i32> = HashMap::new();
    for item in payload.items.iter() {
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
        *condensed.entry((item.product_id, item.size)).or_insert(0) += item.quantity;
    }

    let mut lines: Vec<((Uuid, ShoeSize), i32)> = condensed.into_iter().collect();
    lines.sort_by_key(|((product_id, size), _)| (*product_id, size.as_str()));

    let event = OrderEvent {
        order_reference: payload.order_reference.clone(),
        operation: OrderOperation::Create,
        status: OrderStatus::Pending,
        previous_status: None,
        items: lines
            .into_iter()
            .map(|((product_id, size), quantity)| OrderItemLine {
                product_id,
                size,
                color: None,
                quantity,
                unit_price: 0.into(),
            })
            .collect(),
        shipping_cost: None,
        tax_amount: None,
        discount_amount: None,
    };

    let report = order_trigger::handle_order_event(&state, &event).await?;
    Ok(Json(ReservationResponse {
        order_reference: payload.order_reference,
        results: report.lines,
    }))
}

/// Drop every still-active hold for an order without touching `stock`.
pub async fn release_reservation(
    State(state): State<AppState>,
    Path(order_reference): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let released = order_trigger::release_active_reservations(&state, &order_reference).await?;
    Ok(Json(ReleaseResponse { order_reference, released }))
}
