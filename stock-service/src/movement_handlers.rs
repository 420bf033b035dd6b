use axum::extract::{Query, State};
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use sqlx::query_as;
use uuid::Uuid;

use crate::app::AppState;
use crate::ledger::{self, MovementRecord, MovementType, NewMovement};
use crate::stock::ShoeSize;

#[derive(Debug, Deserialize)]
pub struct CreateMovementRequest {
    pub product_id: Uuid,
    pub size: ShoeSize,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub reason: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order_reference: Option<String>,
    #[serde(default)]
    pub supplier_reference: Option<String>,
    #[serde(default)]
    pub unit_cost: Option<BigDecimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Manual ledger entry (restocks, adjustments, losses...). Holds are
/// managed by the reservation endpoints, not recorded by hand.
pub async fn create_movement(
    State(state): State<AppState>,
    Json(payload): Json<CreateMovementRequest>,
) -> Result<Json<MovementRecord>, ApiError> {
    if matches!(payload.movement_type, MovementType::Reservation | MovementType::Release) {
        return Err(ApiError::BadRequest {
            code: "invalid_movement_type",
            trace_id: None,
            message: Some("reservation and release entries are recorded by the reservation endpoints".into()),
        });
    }

    let input = NewMovement {
        product_id: payload.product_id,
        size: payload.size,
        movement_type: payload.movement_type,
        quantity: payload.quantity,
        reason: payload.reason,
        reference: None,
        date: payload.date,
        order_reference: payload.order_reference,
        supplier_reference: payload.supplier_reference,
        unit_cost: payload.unit_cost,
        notes: payload.notes,
        is_automated: false,
    };
    // Reject malformed input before touching the database.
    ledger::validate_movement(&input)?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|err| ApiError::internal(err, None))?;
    let record = ledger::append_movement(&mut tx, &state.metrics, &state.config, input).await?;
    tx.commit().await.map_err(|err| ApiError::internal(err, None))?;

    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct MovementFilter {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub size: Option<ShoeSize>,
    #[serde(default)]
    pub movement_type: Option<MovementType>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MovementRow {
    pub id: Uuid,
    pub reference: String,
    pub date: DateTime<Utc>,
    pub movement_type: String,
    pub product_id: Uuid,
    pub size: String,
    pub quantity: i32,
    pub stock_before: i32,
    pub stock_after: i32,
    pub reason: String,
    pub order_reference: Option<String>,
    pub supplier_reference: Option<String>,
    pub unit_cost: Option<BigDecimal>,
    pub total_cost: Option<BigDecimal>,
    pub notes: Option<String>,
    pub is_automated: bool,
}

pub async fn list_movements(
    State(state): State<AppState>,
    Query(filter): Query<MovementFilter>,
) -> Result<Json<Vec<MovementRow>>, ApiError> {
    let limit = filter.limit.unwrap_or(100).clamp(1, 500);
    let rows = query_as::<_, MovementRow>(
        "SELECT id, reference, date, movement_type, product_id, size, quantity, stock_before, \
         stock_after, reason, order_reference, supplier_reference, unit_cost, total_cost, notes, \
         is_automated \
         FROM stock_movements \
         WHERE ($1::uuid IS NULL OR product_id = $1) \
         AND ($2::text IS NULL OR size = $2) \
         AND ($3::text IS NULL OR movement_type = $3) \
         ORDER BY date DESC, created_at DESC LIMIT $4",
    )
    .bind(filter.product_id)
    .bind(filter.size.map(|s| s.as_str()))
    .bind(filter.movement_type.map(|t| t.as_str()))
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    Ok(Json(rows))
}
