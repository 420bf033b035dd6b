use axum::extract::State;
use axum::Json;
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use sqlx::{query, Row};
use uuid::Uuid;

use crate::alerts;
use crate::app::AppState;
use crate::error::StockError;
use crate::ledger::MovementType;

/// Sum of ledger quantities that affect physical stock. Replaying every
/// entry for a (product, size) must reproduce the live `stock` value.
pub fn stock_effect<'a, I>(entries: I) -> i32
where
    I: IntoIterator<Item = &'a (MovementType, i32)>,
{
    entries
        .into_iter()
        .filter(|(movement_type, _)| movement_type.affects_stock())
        .map(|(_, quantity)| quantity)
        .sum()
}

#[derive(Debug, Serialize)]
pub struct VariantDrift {
    pub product_id: Uuid,
    pub size: String,
    pub live_stock: i32,
    pub ledger_stock: i32,
    pub drift: i32,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationSummary {
    pub variants_checked: usize,
    pub drifts: Vec<VariantDrift>,
    pub history_rebuilt: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub rebuild_history: bool,
}

/// Replay the ledger for every size variant (optionally scoped to one
/// product) and flag live counters that no longer match. Read-only with
/// respect to `stock`: drift becomes a critical alert, never a silent fix.
pub async fn run_reconciliation(
    state: &AppState,
    request: &ReconcileRequest,
) -> Result<ReconciliationSummary, StockError> {
    let started = std::time::Instant::now();

    let variants = query(
        "SELECT ps.product_id, ps.size, ps.stock, p.title FROM product_sizes ps \
         JOIN products p ON p.id = ps.product_id \
         WHERE $1::uuid IS NULL OR ps.product_id = $1 \
         ORDER BY ps.product_id, ps.size",
    )
    .bind(request.product_id)
    .fetch_all(&state.db)
    .await?;

    let mut drifts = Vec::new();
    let variants_checked = variants.len();
    for row in &variants {
        let product_id: Uuid = row.get("product_id");
        let size: String = row.get("size");
        let live_stock: i32 = row.get("stock");
        let title: String = row.get("title");

        let ledger_row = query(
            "SELECT COALESCE(SUM(quantity), 0) AS total FROM stock_movements \
             WHERE product_id = $1 AND size = $2 \
             AND movement_type NOT IN ('reservation', 'release')",
        )
        .bind(product_id)
        .bind(&size)
        .fetch_one(&state.db)
        .await?;
        let ledger_stock: i64 = ledger_row.get("total");
        let ledger_stock = ledger_stock as i32;

        if ledger_stock != live_stock {
            state.metrics.reconciliation_drift.inc();
            tracing::warn!(
                product_id = %product_id,
                size = %size,
                live_stock,
                ledger_stock,
                "Ledger drift detected"
            );
            let draft = alerts::drift_draft(&title, &size, live_stock, ledger_stock);
            let mut tx = state.db.begin().await?;
            alerts::open_alert(&mut tx, &state.metrics, product_id, &size, &draft).await?;
            tx.commit().await?;
            drifts.push(VariantDrift {
                product_id,
                size,
                live_stock,
                ledger_stock,
                drift: live_stock - ledger_stock,
            });
        }
    }

    if request.rebuild_history {
        rebuild_history(state, request.product_id).await?;
    }

    state
        .metrics
        .reconciliation_duration_seconds
        .observe(started.elapsed().as_secs_f64());

    Ok(ReconciliationSummary {
        variants_checked,
        drifts,
        history_rebuilt: request.rebuild_history,
    })
}

/// Rebuild the per-product history projection from the authoritative
/// ledger.
async fn rebuild_history(state: &AppState, product_id: Option<Uuid>) -> Result<(), StockError> {
    let mut tx = state.db.begin().await?;
    query("DELETE FROM product_stock_history WHERE $1::uuid IS NULL OR product_id = $1")
        .bind(product_id)
        .execute(&mut *tx)
        .await?;
    query(
        "INSERT INTO product_stock_history (product_id, date, movement_type, size, quantity, reason, reference) \
         SELECT product_id, date, movement_type, size, quantity, reason, \
                COALESCE(order_reference, supplier_reference, reference) \
         FROM stock_movements \
         WHERE $1::uuid IS NULL OR product_id = $1 \
         ORDER BY date, created_at",
    )
    .bind(product_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    tracing::info!("Stock history projection rebuilt from the ledger");
    Ok(())
}

pub async fn reconcile_stock(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconciliationSummary>, ApiError> {
    let summary = run_reconciliation(&state, &request).await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_do_not_count_toward_stock() {
        let entries = vec![
            (MovementType::Initial, 10),
            (MovementType::Reservation, 3),
            (MovementType::Sale, -3),
            (MovementType::Release, 3),
            (MovementType::Restock, 20),
            (MovementType::Loss, -1),
        ];
        assert_eq!(stock_effect(&entries), 26);
    }

    #[test]
    fn conservation_matches_scenario_b() {
        // stock 10, reserve 3, confirm: one sale entry of -3 on top of the
        // initial 10 leaves 7.
        let entries = vec![
            (MovementType::Initial, 10),
            (MovementType::Reservation, 3),
            (MovementType::Sale, -3),
        ];
        assert_eq!(stock_effect(&entries), 7);
    }

    #[test]
    fn empty_ledger_sums_to_zero() {
        assert_eq!(stock_effect(&[]), 0);
    }
}
