use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use common_observability::StockMetrics;
use serde::{Deserialize, Serialize};
use sqlx::{query, Postgres, Row, Transaction};
use std::fmt;
use uuid::Uuid;

use crate::alerts;
use crate::app::StockConfig;
use crate::error::StockError;
use crate::stock::{clamped_sub, derive_stock, DerivedStock, ShoeSize, StockLevels};

/// Every way stock can move. `Reservation` and `Release` record holds: they
/// never touch the physical `stock` counter, only `reserved_stock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Restock,
    Sale,
    Return,
    Adjustment,
    Reservation,
    Release,
    Loss,
    Sample,
    Initial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantitySign {
    Positive,
    Negative,
    Any,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Restock => "restock",
            MovementType::Sale => "sale",
            MovementType::Return => "return",
            MovementType::Adjustment => "adjustment",
            MovementType::Reservation => "reservation",
            MovementType::Release => "release",
            MovementType::Loss => "loss",
            MovementType::Sample => "sample",
            MovementType::Initial => "initial",
        }
    }

    /// Whether an entry of this type changes the physical `stock` counter.
    pub fn affects_stock(&self) -> bool {
        !matches!(self, MovementType::Reservation | MovementType::Release)
    }

    pub fn expected_sign(&self) -> QuantitySign {
        match self {
            MovementType::Restock
            | MovementType::Return
            | MovementType::Initial
            | MovementType::Reservation
            | MovementType::Release => QuantitySign::Positive,
            MovementType::Sale | MovementType::Loss | MovementType::Sample => QuantitySign::Negative,
            MovementType::Adjustment => QuantitySign::Any,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for one ledger append. `stock_before`/`stock_after` are never part
/// of the input; they are snapshotted from current state at append time.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub size: ShoeSize,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub reason: String,
    pub reference: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub order_reference: Option<String>,
    pub supplier_reference: Option<String>,
    pub unit_cost: Option<BigDecimal>,
    pub notes: Option<String>,
    pub is_automated: bool,
}

impl NewMovement {
    pub fn new(
        product_id: Uuid,
        size: ShoeSize,
        movement_type: MovementType,
        quantity: i32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            size,
            movement_type,
            quantity,
            reason: reason.into(),
            reference: None,
            date: None,
            order_reference: None,
            supplier_reference: None,
            unit_cost: None,
            notes: None,
            is_automated: false,
        }
    }

    pub fn automated(mut self) -> Self {
        self.is_automated = true;
        self
    }

    pub fn with_order_reference(mut self, order_reference: impl Into<String>) -> Self {
        self.order_reference = Some(order_reference.into());
        self
    }
}

/// A recorded, immutable ledger entry.
#[derive(Debug, Clone, Serialize)]
pub struct MovementRecord {
    pub id: Uuid,
    pub reference: String,
    pub date: DateTime<Utc>,
    pub movement_type: MovementType,
    pub product_id: Uuid,
    pub size: ShoeSize,
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

pub fn generate_reference(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let tail = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{millis}-{}", &tail[..6])
}

pub fn validate_movement(input: &NewMovement) -> Result<(), StockError> {
    if input.reason.trim().is_empty() {
        return Err(StockError::MissingReason);
    }
    if input.quantity == 0 {
        return Err(StockError::InvalidMovement {
            movement_type: input.movement_type,
            quantity: input.quantity,
        });
    }
    let sign_ok = match input.movement_type.expected_sign() {
        QuantitySign::Positive => input.quantity > 0,
        QuantitySign::Negative => input.quantity < 0,
        QuantitySign::Any => true,
    };
    if !sign_ok {
        return Err(StockError::InvalidMovement {
            movement_type: input.movement_type,
            quantity: input.quantity,
        });
    }
    Ok(())
}

pub(crate) struct LockedVariant {
    pub title: String,
    pub stock: i32,
    pub reserved_stock: i32,
    pub low_stock_threshold: i32,
}

impl LockedVariant {
    pub fn levels(&self) -> StockLevels {
        StockLevels {
            stock: self.stock,
            reserved_stock: self.reserved_stock,
            low_stock_threshold: self.low_stock_threshold,
        }
    }
}

/// Row-lock the size variant for the rest of the transaction. All
/// reads feeding a stock decision go through this lock so that concurrent
/// mutations of the same (product, size) are serialized.
pub(crate) async fn lock_variant(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
    size: ShoeSize,
) -> Result<LockedVariant, StockError> {
    let product = query("SELECT title FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some(product) = product else {
        return Err(StockError::UnknownProduct(product_id));
    };
    let title: String = product.get("title");

    let row = query(
        "SELECT stock, reserved_stock, low_stock_threshold FROM product_sizes \
         WHERE product_id = $1 AND size = $2 FOR UPDATE",
    )
    .bind(product_id)
    .bind(size.as_str())
    .fetch_optional(&mut **tx)
    .await?;
    let Some(row) = row else {
        return Err(StockError::UnknownSize { product: product_id, size });
    };

    Ok(LockedVariant {
        title,
        stock: row.get("stock"),
        reserved_stock: row.get("reserved_stock"),
        low_stock_threshold: row.get("low_stock_threshold"),
    })
}

pub(crate) async fn set_reserved(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
    size: ShoeSize,
    reserved: i32,
) -> Result<(), StockError> {
    query("UPDATE product_sizes SET reserved_stock = $3, updated_at = NOW() WHERE product_id = $1 AND size = $2")
        .bind(product_id)
        .bind(size.as_str())
        .bind(reserved)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Write derived fields back to the variant and evaluate alerts. The final
/// step of every stock mutation.
pub(crate) async fn persist_accounting(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    cfg: &StockConfig,
    product_id: Uuid,
    title: &str,
    size: ShoeSize,
    levels: StockLevels,
) -> Result<DerivedStock, StockError> {
    let derived = derive_stock(levels);
    if derived.invariant_violated {
        metrics.invariant_violations.inc();
        tracing::warn!(
            product_id = %product_id,
            size = %size,
            stock = levels.stock,
            reserved = levels.reserved_stock,
            "Reserved stock exceeds physical stock; available clamped to 0"
        );
    }

    let suggestion = if derived.is_out_of_stock || derived.is_low_stock {
        let sold = sold_last_30_days(tx, product_id, size).await?;
        Some(alerts::suggested_restock_quantity(
            levels.low_stock_threshold,
            sold,
            cfg.restock_lead_time_days,
        ))
    } else {
        None
    };

    query(
        "UPDATE product_sizes SET stock = $3, available_stock = $4, is_low_stock = $5, \
         is_out_of_stock = $6, suggested_restock_quantity = $7, updated_at = NOW() \
         WHERE product_id = $1 AND size = $2",
    )
    .bind(product_id)
    .bind(size.as_str())
    .bind(levels.stock)
    .bind(derived.available_stock)
    .bind(derived.is_low_stock)
    .bind(derived.is_out_of_stock)
    .bind(suggestion)
    .execute(&mut **tx)
    .await?;

    let assessment = alerts::assess_variant(title, size, levels, derived, suggestion, cfg.overstock_multiplier);
    alerts::apply_assessment(tx, metrics, product_id, size, assessment).await?;

    Ok(derived)
}

/// Re-run accounting and alerts for a variant without recording a movement
/// (used after administrative edits such as a threshold change).
pub async fn reassess_variant(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    cfg: &StockConfig,
    product_id: Uuid,
    size: ShoeSize,
) -> Result<DerivedStock, StockError> {
    let variant = lock_variant(tx, product_id, size).await?;
    let levels = variant.levels();
    persist_accounting(tx, metrics, cfg, product_id, &variant.title, size, levels).await
}

async fn sold_last_30_days(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
    size: ShoeSize,
) -> Result<i32, StockError> {
    let row = query(
        "SELECT COALESCE(SUM(-quantity), 0) AS sold FROM stock_movements \
         WHERE product_id = $1 AND size = $2 AND movement_type = 'sale' \
         AND date > NOW() - INTERVAL '30 days'",
    )
    .bind(product_id)
    .bind(size.as_str())
    .fetch_one(&mut **tx)
    .await?;
    let sold: i64 = row.get("sold");
    Ok(sold.clamp(0, i32::MAX as i64) as i32)
}

/// Append one entry to the ledger: snapshot before/after, insert the entry,
/// write the result back to the variant, project into the product history,
/// re-run accounting and evaluate alerts. The only sanctioned way `stock`
/// changes.
pub async fn append_movement(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    cfg: &StockConfig,
    input: NewMovement,
) -> Result<MovementRecord, StockError> {
    validate_movement(&input)?;

    let variant = lock_variant(tx, input.product_id, input.size).await?;
    let stock_before = variant.stock;
    let stock_after = if input.movement_type.affects_stock() {
        let after = stock_before + input.quantity;
        if after < 0 {
            return Err(StockError::InsufficientStock {
                product: input.product_id,
                size: input.size,
                requested: -input.quantity,
                available: stock_before,
            });
        }
        after
    } else {
        stock_before
    };

    let record = MovementRecord {
        id: Uuid::new_v4(),
        reference: input
            .reference
            .clone()
            .unwrap_or_else(|| generate_reference("MOV")),
        date: input.date.unwrap_or_else(Utc::now),
        movement_type: input.movement_type,
        product_id: input.product_id,
        size: input.size,
        quantity: input.quantity,
        stock_before,
        stock_after,
        reason: input.reason.clone(),
        order_reference: input.order_reference.clone(),
        supplier_reference: input.supplier_reference.clone(),
        unit_cost: input.unit_cost.clone(),
        total_cost: input
            .unit_cost
            .as_ref()
            .map(|unit| common_money::movement_total_cost(input.quantity, unit)),
        notes: input.notes.clone(),
        is_automated: input.is_automated,
    };

    query(
        "INSERT INTO stock_movements (id, reference, date, movement_type, product_id, size, \
         quantity, stock_before, stock_after, reason, order_reference, supplier_reference, \
         unit_cost, total_cost, notes, is_automated) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(record.id)
    .bind(&record.reference)
    .bind(record.date)
    .bind(record.movement_type.as_str())
    .bind(record.product_id)
    .bind(record.size.as_str())
    .bind(record.quantity)
    .bind(record.stock_before)
    .bind(record.stock_after)
    .bind(&record.reason)
    .bind(&record.order_reference)
    .bind(&record.supplier_reference)
    .bind(&record.unit_cost)
    .bind(&record.total_cost)
    .bind(&record.notes)
    .bind(record.is_automated)
    .execute(&mut **tx)
    .await?;

    // Denormalized per-product projection; the ledger stays authoritative.
    let history_reference = record
        .order_reference
        .clone()
        .or_else(|| record.supplier_reference.clone())
        .unwrap_or_else(|| record.reference.clone());
    query(
        "INSERT INTO product_stock_history (product_id, date, movement_type, size, quantity, reason, reference) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(record.product_id)
    .bind(record.date)
    .bind(record.movement_type.as_str())
    .bind(record.size.as_str())
    .bind(record.quantity)
    .bind(&record.reason)
    .bind(&history_reference)
    .execute(&mut **tx)
    .await?;

    let levels = StockLevels {
        stock: stock_after,
        reserved_stock: variant.reserved_stock,
        low_stock_threshold: variant.low_stock_threshold,
    };
    persist_accounting(tx, metrics, cfg, input.product_id, &variant.title, input.size, levels).await?;

    metrics
        .movements_appended
        .with_label_values(&[record.movement_type.as_str()])
        .inc();
    tracing::info!(
        reference = %record.reference,
        movement_type = %record.movement_type,
        product_id = %record.product_id,
        size = %record.size,
        quantity = record.quantity,
        stock_before = record.stock_before,
        stock_after = record.stock_after,
        "Stock movement recorded"
    );

    Ok(record)
}

/// Place a hold for an unconfirmed order. Bounded by availability at the
/// time of the attempt; fails fast with `InsufficientStock` otherwise.
pub async fn reserve_stock(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    cfg: &StockConfig,
    product_id: Uuid,
    size: ShoeSize,
    quantity: i32,
    order_reference: &str,
) -> Result<(), StockError> {
    if quantity <= 0 {
        return Err(StockError::InvalidMovement {
            movement_type: MovementType::Reservation,
            quantity,
        });
    }
    let variant = lock_variant(tx, product_id, size).await?;
    let derived = derive_stock(variant.levels());
    if quantity > derived.available_stock {
        metrics.reservations_rejected.inc();
        return Err(StockError::InsufficientStock {
            product: product_id,
            size,
            requested: quantity,
            available: derived.available_stock,
        });
    }

    set_reserved(tx, product_id, size, variant.reserved_stock + quantity).await?;
    append_movement(
        tx,
        metrics,
        cfg,
        NewMovement::new(
            product_id,
            size,
            MovementType::Reservation,
            quantity,
            format!("Hold placed for order {order_reference}"),
        )
        .automated()
        .with_order_reference(order_reference),
    )
    .await?;
    Ok(())
}

/// Release a hold without touching `stock` (cancellation of an unconfirmed
/// order). The subtraction clamps at 0 if the counters had drifted.
pub async fn release_hold(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    cfg: &StockConfig,
    product_id: Uuid,
    size: ShoeSize,
    quantity: i32,
    order_reference: &str,
    reason: String,
) -> Result<(), StockError> {
    let variant = lock_variant(tx, product_id, size).await?;
    set_reserved(tx, product_id, size, clamped_sub(variant.reserved_stock, quantity)).await?;
    append_movement(
        tx,
        metrics,
        cfg,
        NewMovement::new(product_id, size, MovementType::Release, quantity, reason)
            .automated()
            .with_order_reference(order_reference),
    )
    .await?;
    Ok(())
}

/// Convert a hold into an actual sale on order confirmation: the hold is
/// released and `stock` is decremented through a `sale` ledger entry.
pub async fn convert_hold_to_sale(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    cfg: &StockConfig,
    product_id: Uuid,
    size: ShoeSize,
    quantity: i32,
    order_reference: &str,
) -> Result<MovementRecord, StockError> {
    let variant = lock_variant(tx, product_id, size).await?;
    set_reserved(tx, product_id, size, clamped_sub(variant.reserved_stock, quantity)).await?;
    append_movement(
        tx,
        metrics,
        cfg,
        NewMovement::new(
            product_id,
            size,
            MovementType::Sale,
            -quantity,
            format!("Sale - order {order_reference}"),
        )
        .automated()
        .with_order_reference(order_reference),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(movement_type: MovementType, quantity: i32) -> NewMovement {
        NewMovement::new(Uuid::new_v4(), ShoeSize::Eu42, movement_type, quantity, "unit test")
    }

    #[test]
    fn hold_types_do_not_affect_stock() {
        assert!(!MovementType::Reservation.affects_stock());
        assert!(!MovementType::Release.affects_stock());
        for t in [
            MovementType::Restock,
            MovementType::Sale,
            MovementType::Return,
            MovementType::Adjustment,
            MovementType::Loss,
            MovementType::Sample,
            MovementType::Initial,
        ] {
            assert!(t.affects_stock(), "{t} should affect stock");
        }
    }

    #[test]
    fn sign_conventions() {
        assert!(validate_movement(&movement(MovementType::Sale, -3)).is_ok());
        assert!(validate_movement(&movement(MovementType::Sale, 3)).is_err());
        assert!(validate_movement(&movement(MovementType::Restock, 20)).is_ok());
        assert!(validate_movement(&movement(MovementType::Restock, -20)).is_err());
        assert!(validate_movement(&movement(MovementType::Loss, -1)).is_ok());
        assert!(validate_movement(&movement(MovementType::Adjustment, -2)).is_ok());
        assert!(validate_movement(&movement(MovementType::Adjustment, 2)).is_ok());
        assert!(validate_movement(&movement(MovementType::Reservation, 4)).is_ok());
        assert!(validate_movement(&movement(MovementType::Reservation, -4)).is_err());
    }

    #[test]
    fn zero_quantity_and_empty_reason_are_rejected() {
        assert!(matches!(
            validate_movement(&movement(MovementType::Restock, 0)),
            Err(StockError::InvalidMovement { .. })
        ));
        let mut m = movement(MovementType::Restock, 5);
        m.reason = "   ".into();
        assert!(matches!(validate_movement(&m), Err(StockError::MissingReason)));
    }

    #[test]
    fn reference_format() {
        let reference = generate_reference("MOV");
        let parts: Vec<&str> = reference.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "MOV");
        assert!(parts[1].parse::<i64>().is_ok(), "timestamp segment: {reference}");
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn movement_type_serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&MovementType::Sale).unwrap(), "\"sale\"");
        assert_eq!(
            serde_json::from_str::<MovementType>("\"restock\"").unwrap(),
            MovementType::Restock
        );
    }
}
