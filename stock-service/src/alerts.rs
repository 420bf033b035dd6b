use common_observability::StockMetrics;
use serde::{Deserialize, Serialize};
use sqlx::{query, Postgres, Transaction};
use std::fmt;
use uuid::Uuid;

use crate::error::StockError;
use crate::ledger::generate_reference;
use crate::stock::{DerivedStock, ShoeSize, StockLevels};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    OutOfStock,
    Overstock,
    RestockSuggestion,
    StockDrift,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::OutOfStock => "out_of_stock",
            AlertType::Overstock => "overstock",
            AlertType::RestockSuggestion => "restock_suggestion",
            AlertType::StockDrift => "stock_drift",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Critical => "critical",
            AlertPriority::High => "high",
            AlertPriority::Medium => "medium",
            AlertPriority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    Restocked,
    Discontinued,
    ThresholdAdjusted,
    FalseAlert,
    WaitingSupplier,
    Other,
}

impl ActionTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTaken::Restocked => "restocked",
            ActionTaken::Discontinued => "discontinued",
            ActionTaken::ThresholdAdjusted => "threshold_adjusted",
            ActionTaken::FalseAlert => "false_alert",
            ActionTaken::WaitingSupplier => "waiting_supplier",
            ActionTaken::Other => "other",
        }
    }
}

/// An alert the generator wants open for a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub current_stock: i32,
    pub threshold: Option<i32>,
    pub suggested_quantity: Option<i32>,
    pub message: String,
}

/// An open alert the generator wants auto-resolved for a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoResolve {
    pub alert_type: AlertType,
    pub action_taken: ActionTaken,
    pub notes: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct VariantAssessment {
    pub open: Vec<AlertDraft>,
    pub resolve: Vec<AutoResolve>,
}

/// `high` once the variant has eaten through half its threshold.
pub fn low_stock_priority(available: i32, threshold: i32) -> AlertPriority {
    if available <= (threshold + 1) / 2 {
        AlertPriority::High
    } else {
        AlertPriority::Medium
    }
}

/// Sale velocity over the trailing 30 days when there is one, otherwise the
/// fixed heuristic of three thresholds.
pub fn suggested_restock_quantity(threshold: i32, sold_last_30_days: i32, lead_time_days: i32) -> i32 {
    if sold_last_30_days > 0 {
        let daily = f64::from(sold_last_30_days) / 30.0;
        let projected = (daily * f64::from(lead_time_days.max(1))).ceil() as i32;
        projected.max(threshold)
    } else {
        threshold * 3
    }
}

/// Decide which alerts should be open and which should auto-resolve for the
/// variant's current state. Pure; persistence happens in
/// [`apply_assessment`].
pub fn assess_variant(
    title: &str,
    size: ShoeSize,
    levels: StockLevels,
    derived: DerivedStock,
    suggestion: Option<i32>,
    overstock_multiplier: i32,
) -> VariantAssessment {
    let mut assessment = VariantAssessment::default();
    let available = derived.available_stock;
    let threshold = levels.low_stock_threshold;

    if derived.is_out_of_stock {
        assessment.open.push(AlertDraft {
            alert_type: AlertType::OutOfStock,
            priority: AlertPriority::Critical,
            current_stock: available,
            threshold: Some(threshold),
            suggested_quantity: None,
            message: format!("Out of stock: {title} size {size}"),
        });
    } else if derived.is_low_stock {
        assessment.open.push(AlertDraft {
            alert_type: AlertType::LowStock,
            priority: low_stock_priority(available, threshold),
            current_stock: available,
            threshold: Some(threshold),
            suggested_quantity: None,
            message: format!("Low stock: {title} size {size} ({available} left)"),
        });
    }

    if derived.is_out_of_stock || derived.is_low_stock {
        assessment.open.push(AlertDraft {
            alert_type: AlertType::RestockSuggestion,
            priority: AlertPriority::Medium,
            current_stock: available,
            threshold: Some(threshold),
            suggested_quantity: suggestion,
            message: format!("Restock suggested: {title} size {size}"),
        });
    } else {
        for alert_type in [AlertType::LowStock, AlertType::OutOfStock, AlertType::RestockSuggestion] {
            assessment.resolve.push(AutoResolve {
                alert_type,
                action_taken: ActionTaken::Restocked,
                notes: "Stock replenished automatically",
            });
        }
    }

    let overstocked = threshold > 0 && available >= overstock_multiplier * threshold;
    if overstocked {
        assessment.open.push(AlertDraft {
            alert_type: AlertType::Overstock,
            priority: AlertPriority::Low,
            current_stock: available,
            threshold: Some(threshold),
            suggested_quantity: None,
            message: format!("Overstock: {title} size {size} ({available} available for threshold {threshold})"),
        });
    } else {
        assessment.resolve.push(AutoResolve {
            alert_type: AlertType::Overstock,
            action_taken: ActionTaken::Other,
            notes: "Overstock condition cleared",
        });
    }

    // Never auto-resolved; someone has to look at the counters.
    if derived.invariant_violated {
        assessment.open.push(AlertDraft {
            alert_type: AlertType::StockDrift,
            priority: AlertPriority::Critical,
            current_stock: available,
            threshold: None,
            suggested_quantity: None,
            message: format!(
                "Reserved stock exceeds physical stock: {title} size {size} (stock {}, reserved {})",
                levels.stock, levels.reserved_stock
            ),
        });
    }

    assessment
}

/// Drift detected by a reconciliation pass.
pub fn drift_draft(title: &str, size: &str, live_stock: i32, ledger_stock: i32) -> AlertDraft {
    AlertDraft {
        alert_type: AlertType::StockDrift,
        priority: AlertPriority::Critical,
        current_stock: live_stock,
        threshold: None,
        suggested_quantity: None,
        message: format!(
            "Ledger drift: {title} size {size} (live stock {live_stock}, ledger replay {ledger_stock})"
        ),
    }
}

/// Insert an alert unless an unresolved one of the same (product, size,
/// type) already exists. Duplicate attempts are silent no-ops. Returns
/// whether a new alert was opened.
pub async fn open_alert(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    product_id: Uuid,
    size: &str,
    draft: &AlertDraft,
) -> Result<bool, StockError> {
    let reference_prefix = format!("ALERT-{}", draft.alert_type.as_str().to_uppercase());
    let result = query(
        "INSERT INTO stock_alerts (id, alert_reference, alert_type, priority, product_id, size, \
         current_stock, threshold, suggested_quantity, message) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         ON CONFLICT (product_id, size, alert_type) WHERE NOT is_resolved DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(generate_reference(&reference_prefix))
    .bind(draft.alert_type.as_str())
    .bind(draft.priority.as_str())
    .bind(product_id)
    .bind(size)
    .bind(draft.current_stock)
    .bind(draft.threshold)
    .bind(draft.suggested_quantity)
    .bind(&draft.message)
    .execute(&mut **tx)
    .await?;

    let opened = result.rows_affected() > 0;
    if opened {
        metrics
            .alerts_opened
            .with_label_values(&[draft.alert_type.as_str()])
            .inc();
        tracing::info!(
            product_id = %product_id,
            size = %size,
            alert_type = %draft.alert_type,
            priority = draft.priority.as_str(),
            "Stock alert opened"
        );
    }
    Ok(opened)
}

/// Persist an assessment: open missing alerts, auto-resolve recovered ones.
pub async fn apply_assessment(
    tx: &mut Transaction<'_, Postgres>,
    metrics: &StockMetrics,
    product_id: Uuid,
    size: ShoeSize,
    assessment: VariantAssessment,
) -> Result<(), StockError> {
    for draft in &assessment.open {
        open_alert(tx, metrics, product_id, size.as_str(), draft).await?;
    }

    for auto in &assessment.resolve {
        let result = query(
            "UPDATE stock_alerts SET is_resolved = TRUE, resolved_at = NOW(), action_taken = $3, \
             resolution_notes = $4 \
             WHERE product_id = $1 AND size = $2 AND alert_type = $5 AND NOT is_resolved",
        )
        .bind(product_id)
        .bind(size.as_str())
        .bind(auto.action_taken.as_str())
        .bind(auto.notes)
        .bind(auto.alert_type.as_str())
        .execute(&mut **tx)
        .await?;
        let resolved = result.rows_affected();
        if resolved > 0 {
            metrics.alerts_resolved.inc_by(resolved);
            tracing::info!(
                product_id = %product_id,
                size = %size,
                alert_type = %auto.alert_type,
                "Stock alert auto-resolved"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::derive_stock;

    fn assess(stock: i32, reserved: i32, threshold: i32) -> VariantAssessment {
        let levels = StockLevels { stock, reserved_stock: reserved, low_stock_threshold: threshold };
        let derived = derive_stock(levels);
        let suggestion = if derived.is_out_of_stock || derived.is_low_stock {
            Some(suggested_restock_quantity(threshold, 0, 14))
        } else {
            None
        };
        assess_variant("Origin Stone White", ShoeSize::Eu40, levels, derived, suggestion, 10)
    }

    fn open_types(assessment: &VariantAssessment) -> Vec<AlertType> {
        assessment.open.iter().map(|d| d.alert_type).collect()
    }

    #[test]
    fn fully_reserved_variant_opens_a_critical_out_of_stock_alert() {
        let assessment = assess(5, 5, 5);
        let out = assessment
            .open
            .iter()
            .find(|d| d.alert_type == AlertType::OutOfStock)
            .expect("out_of_stock alert");
        assert_eq!(out.priority, AlertPriority::Critical);
        assert_eq!(out.current_stock, 0);
        assert!(open_types(&assessment).contains(&AlertType::RestockSuggestion));
    }

    #[test]
    fn low_stock_priority_splits_at_half_threshold() {
        assert_eq!(low_stock_priority(3, 5), AlertPriority::High);
        assert_eq!(low_stock_priority(4, 5), AlertPriority::Medium);
        assert_eq!(low_stock_priority(2, 4), AlertPriority::High);
        assert_eq!(low_stock_priority(3, 4), AlertPriority::Medium);
    }

    #[test]
    fn low_stock_alert_carries_remaining_units() {
        let assessment = assess(4, 0, 5);
        let low = assessment
            .open
            .iter()
            .find(|d| d.alert_type == AlertType::LowStock)
            .expect("low_stock alert");
        assert_eq!(low.priority, AlertPriority::Medium);
        assert!(low.message.contains("(4 left)"));
    }

    #[test]
    fn recovered_variant_resolves_threshold_alerts() {
        let assessment = assess(20, 0, 5);
        assert!(assessment.open.is_empty());
        let resolved: Vec<AlertType> = assessment.resolve.iter().map(|r| r.alert_type).collect();
        assert!(resolved.contains(&AlertType::LowStock));
        assert!(resolved.contains(&AlertType::OutOfStock));
        assert!(resolved.contains(&AlertType::RestockSuggestion));
        let restocked = assessment
            .resolve
            .iter()
            .find(|r| r.alert_type == AlertType::LowStock)
            .unwrap();
        assert_eq!(restocked.action_taken, ActionTaken::Restocked);
    }

    #[test]
    fn overstock_fires_above_the_multiplier() {
        let assessment = assess(60, 0, 5);
        assert!(open_types(&assessment).contains(&AlertType::Overstock));
        let not_over = assess(49, 0, 5);
        assert!(!open_types(&not_over).contains(&AlertType::Overstock));
    }

    #[test]
    fn invariant_violation_opens_stock_drift() {
        let assessment = assess(2, 7, 5);
        let drift = assessment
            .open
            .iter()
            .find(|d| d.alert_type == AlertType::StockDrift)
            .expect("stock_drift alert");
        assert_eq!(drift.priority, AlertPriority::Critical);
    }

    #[test]
    fn suggestion_prefers_sale_velocity() {
        // No sales: fixed heuristic.
        assert_eq!(suggested_restock_quantity(5, 0, 14), 15);
        // 30 sold over 30 days = 1/day; 14-day lead time => 14.
        assert_eq!(suggested_restock_quantity(5, 30, 14), 14);
        // Velocity result is floored at the threshold.
        assert_eq!(suggested_restock_quantity(10, 3, 14), 10);
    }
}
