use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, Row};
use uuid::Uuid;

use crate::alerts::{ActionTaken, AlertType};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub unresolved: Option<bool>,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub alert_type: Option<AlertType>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AlertRow {
    pub id: Uuid,
    pub alert_reference: String,
    pub alert_type: String,
    pub priority: String,
    pub product_id: Uuid,
    pub size: String,
    pub current_stock: i32,
    pub threshold: Option<i32>,
    pub suggested_quantity: Option<i32>,
    pub message: String,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub action_taken: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<Vec<AlertRow>>, ApiError> {
    let rows = query_as::<_, AlertRow>(
        "SELECT id, alert_reference, alert_type, priority, product_id, size, current_stock, \
         threshold, suggested_quantity, message, is_resolved, resolved_at, resolved_by, \
         resolution_notes, action_taken, created_at \
         FROM stock_alerts \
         WHERE ($1::boolean IS NULL OR is_resolved <> $1) \
         AND ($2::uuid IS NULL OR product_id = $2) \
         AND ($3::text IS NULL OR alert_type = $3) \
         ORDER BY created_at DESC",
    )
    .bind(filter.unresolved)
    .bind(filter.product_id)
    .bind(filter.alert_type.map(|t| t.as_str()))
    .fetch_all(&state.db)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ResolveAlertRequest {
    pub action_taken: ActionTaken,
    #[serde(default)]
    pub resolution_notes: Option<String>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

/// Resolution is terminal: a resolved alert is never reopened, a recurring
/// condition opens a fresh one.
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(payload): Json<ResolveAlertRequest>,
) -> Result<Json<AlertRow>, ApiError> {
    let resolved = query_as::<_, AlertRow>(
        "UPDATE stock_alerts SET is_resolved = TRUE, resolved_at = NOW(), action_taken = $2, \
         resolution_notes = $3, resolved_by = $4 \
         WHERE id = $1 AND NOT is_resolved \
         RETURNING id, alert_reference, alert_type, priority, product_id, size, current_stock, \
         threshold, suggested_quantity, message, is_resolved, resolved_at, resolved_by, \
         resolution_notes, action_taken, created_at",
    )
    .bind(alert_id)
    .bind(payload.action_taken.as_str())
    .bind(&payload.resolution_notes)
    .bind(&payload.resolved_by)
    .fetch_optional(&state.db)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    match resolved {
        Some(row) => {
            state.metrics.alerts_resolved.inc();
            tracing::info!(
                alert_id = %alert_id,
                action_taken = payload.action_taken.as_str(),
                "Stock alert resolved"
            );
            Ok(Json(row))
        }
        None => {
            let exists = query("SELECT is_resolved FROM stock_alerts WHERE id = $1")
                .bind(alert_id)
                .fetch_optional(&state.db)
                .await
                .map_err(|err| ApiError::internal(err, None))?;
            match exists {
                Some(row) if row.get::<bool, _>("is_resolved") => Err(ApiError::conflict(
                    "already_resolved",
                    Some("Resolved alerts are terminal; a recurring condition opens a new alert".into()),
                )),
                _ => Err(ApiError::not_found("unknown_alert")),
            }
        }
    }
}
