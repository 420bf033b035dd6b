use bigdecimal::BigDecimal;
use bigdecimal::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::Once;

/// Normalize a monetary value to 2 decimal places (banker's rounding not applied; BigDecimal uses plain rounding when reducing scale)
pub fn normalize_scale(value: &BigDecimal) -> BigDecimal {
    // Set scale to 2 using with_scale, which truncates/extends with zeros.
    value.with_scale(2)
}

/// Compare two monetary values allowing a tolerance (in cents) after normalization.
pub fn nearly_equal(a: &BigDecimal, b: &BigDecimal, cents_tolerance: i64) -> bool {
    let na = normalize_scale(a);
    let nb = normalize_scale(b);
    // Convert difference to cents integer to avoid floating comparison.
    let diff = (na - nb).with_scale(2);
    let cents = diff.to_f64().unwrap_or(0.0) * 100.0;
    cents.abs() <= cents_tolerance as f64
}

static ROUNDING_MODE_LOGGED: Once = Once::new();

/// Log the process-wide rounding convention exactly once at startup.
pub fn log_rounding_mode_once() {
    ROUNDING_MODE_LOGGED.call_once(|| {
        tracing::info!(mode = "truncate-to-2dp", "Monetary rounding mode");
    });
}

/// Cost of a ledger movement: |quantity| * unit_cost, normalized.
pub fn movement_total_cost(quantity: i32, unit_cost: &BigDecimal) -> BigDecimal {
    let units = BigDecimal::from(quantity.unsigned_abs() as u64);
    normalize_scale(&(units * unit_cost))
}

/// Total for one order line: quantity * unit_price, normalized.
pub fn line_total(quantity: i32, unit_price: &BigDecimal) -> BigDecimal {
    normalize_scale(&(BigDecimal::from(quantity) * unit_price))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: BigDecimal,
    pub total: BigDecimal,
}

/// Derive subtotal and final total from line totals plus shipping, tax and discount.
pub fn order_totals(
    line_totals: &[BigDecimal],
    shipping_cost: &BigDecimal,
    tax_amount: &BigDecimal,
    discount_amount: &BigDecimal,
) -> OrderTotals {
    let subtotal: BigDecimal = line_totals.iter().fold(BigDecimal::from(0), |acc, t| acc + t);
    let subtotal = normalize_scale(&subtotal);
    let total = normalize_scale(&(&subtotal + shipping_cost + tax_amount - discount_amount));
    OrderTotals { subtotal, total }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedMoney(BigDecimal);

impl NormalizedMoney {
    pub fn new(raw: BigDecimal) -> Self {
        Self(normalize_scale(&raw))
    }
    pub fn inner(&self) -> &BigDecimal { &self.0 }
}

impl From<BigDecimal> for NormalizedMoney {
    fn from(value: BigDecimal) -> Self { Self::new(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::parse_bytes(s.as_bytes(), 10).unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_scale(&dec("12.3456")).to_string(), "12.34");
    }

    #[test]
    fn test_nearly_equal() {
        assert!(nearly_equal(&dec("10.001"), &dec("10.009"), 1)); // 1 cent tolerance
    }

    #[test]
    fn movement_cost_uses_absolute_quantity() {
        // A sale of 3 units at 42.50 costs the same as a restock of 3.
        assert_eq!(movement_total_cost(-3, &dec("42.50")), dec("127.50"));
        assert_eq!(movement_total_cost(3, &dec("42.50")), dec("127.50"));
    }

    #[test]
    fn line_total_is_quantity_times_unit_price() {
        assert_eq!(line_total(2, &dec("89.90")), dec("179.80"));
    }

    #[test]
    fn order_totals_combine_shipping_tax_discount() {
        let lines = vec![dec("179.80"), dec("42.50")];
        let totals = order_totals(&lines, &dec("4.90"), &dec("0.00"), &dec("10.00"));
        assert_eq!(totals.subtotal, dec("222.30"));
        assert_eq!(totals.total, dec("217.20"));
    }

    #[test]
    fn order_totals_empty_items() {
        let totals = order_totals(&[], &dec("0.00"), &dec("0.00"), &dec("0.00"));
        assert_eq!(totals.subtotal, dec("0.00"));
        assert_eq!(totals.total, dec("0.00"));
    }

    proptest::proptest! {
        #[test]
        fn normalize_is_idempotent(cents in -1_000_000i64..1_000_000i64) {
            let v = BigDecimal::from(cents) / BigDecimal::from(100);
            let once = normalize_scale(&v);
            proptest::prop_assert_eq!(normalize_scale(&once), once.clone());
        }

        #[test]
        fn movement_cost_never_negative(q in -500i32..500i32, cents in 0i64..100_000i64) {
            let unit = BigDecimal::from(cents) / BigDecimal::from(100);
            let cost = movement_total_cost(q, &unit);
            proptest::prop_assert!(cost >= BigDecimal::from(0));
        }
    }
}
