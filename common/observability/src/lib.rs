use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};

#[derive(Clone)]
pub struct StockMetrics {
    pub registry: Registry,
    pub movements_appended: IntCounterVec,
    pub reservations_rejected: IntCounter,
    pub alerts_opened: IntCounterVec,
    pub alerts_resolved: IntCounter,
    pub invariant_violations: IntCounter,
    pub reconciliation_drift: IntCounter,
    pub reconciliation_duration_seconds: Histogram,
    pub http_errors_total: IntCounterVec,
}

impl StockMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let movements_appended = IntCounterVec::new(
            prometheus::Opts::new(
                "stock_movements_appended_total",
                "Ledger entries appended, by movement type",
            ),
            &["type"],
        ).unwrap();
        let reservations_rejected = IntCounter::new(
            "stock_reservations_rejected_total",
            "Reservation attempts rejected for insufficient stock",
        ).unwrap();
        let alerts_opened = IntCounterVec::new(
            prometheus::Opts::new(
                "stock_alerts_opened_total",
                "Stock alerts opened, by alert type",
            ),
            &["type"],
        ).unwrap();
        let alerts_resolved = IntCounter::new(
            "stock_alerts_resolved_total",
            "Stock alerts resolved (manually or automatically)",
        ).unwrap();
        let invariant_violations = IntCounter::new(
            "stock_invariant_violations_total",
            "Occurrences of reserved_stock exceeding stock",
        ).unwrap();
        let reconciliation_drift = IntCounter::new(
            "stock_reconciliation_drift_total",
            "Size variants whose live stock diverged from the ledger replay",
        ).unwrap();
        let reconciliation_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "stock_reconciliation_duration_seconds",
                "Duration of a ledger reconciliation pass",
            ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0])
        ).unwrap();
        let http_errors_total = IntCounterVec::new(
            prometheus::Opts::new(
                "http_errors_total",
                "Count of HTTP error responses emitted (status >= 400)",
            ),
            &["service", "code", "status"],
        ).unwrap();
        let _ = registry.register(Box::new(movements_appended.clone()));
        let _ = registry.register(Box::new(reservations_rejected.clone()));
        let _ = registry.register(Box::new(alerts_opened.clone()));
        let _ = registry.register(Box::new(alerts_resolved.clone()));
        let _ = registry.register(Box::new(invariant_violations.clone()));
        let _ = registry.register(Box::new(reconciliation_drift.clone()));
        let _ = registry.register(Box::new(reconciliation_duration_seconds.clone()));
        let _ = registry.register(Box::new(http_errors_total.clone()));
        StockMetrics {
            registry,
            movements_appended,
            reservations_rejected,
            alerts_opened,
            alerts_resolved,
            invariant_violations,
            reconciliation_drift,
            reconciliation_duration_seconds,
            http_errors_total,
        }
    }
}

impl Default for StockMetrics {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_collision() {
        let metrics = StockMetrics::new();
        metrics.movements_appended.with_label_values(&["sale"]).inc();
        metrics.alerts_opened.with_label_values(&["low_stock"]).inc();
        let families = metrics.registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "stock_movements_appended_total"));
        assert!(families.iter().any(|f| f.get_name() == "http_errors_total"));
    }
}
