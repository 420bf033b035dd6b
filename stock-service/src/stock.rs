use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed size run carried by every product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShoeSize {
    #[serde(rename = "36")] Eu36,
    #[serde(rename = "37")] Eu37,
    #[serde(rename = "38")] Eu38,
    #[serde(rename = "39")] Eu39,
    #[serde(rename = "40")] Eu40,
    #[serde(rename = "41")] Eu41,
    #[serde(rename = "42")] Eu42,
    #[serde(rename = "43")] Eu43,
    #[serde(rename = "44")] Eu44,
    #[serde(rename = "45")] Eu45,
    #[serde(rename = "46")] Eu46,
}

pub const ALL_SIZES: [ShoeSize; 11] = [
    ShoeSize::Eu36,
    ShoeSize::Eu37,
    ShoeSize::Eu38,
    ShoeSize::Eu39,
    ShoeSize::Eu40,
    ShoeSize::Eu41,
    ShoeSize::Eu42,
    ShoeSize::Eu43,
    ShoeSize::Eu44,
    ShoeSize::Eu45,
    ShoeSize::Eu46,
];

impl ShoeSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShoeSize::Eu36 => "36",
            ShoeSize::Eu37 => "37",
            ShoeSize::Eu38 => "38",
            ShoeSize::Eu39 => "39",
            ShoeSize::Eu40 => "40",
            ShoeSize::Eu41 => "41",
            ShoeSize::Eu42 => "42",
            ShoeSize::Eu43 => "43",
            ShoeSize::Eu44 => "44",
            ShoeSize::Eu45 => "45",
            ShoeSize::Eu46 => "46",
        }
    }
}

impl fmt::Display for ShoeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShoeSize {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_SIZES.iter().copied().find(|v| v.as_str() == s).ok_or(())
    }
}

/// Authoritative counters of one size variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevels {
    pub stock: i32,
    pub reserved_stock: i32,
    pub low_stock_threshold: i32,
}

/// Output of the accounting engine; never stored as anything but a
/// recomputation of `StockLevels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedStock {
    pub available_stock: i32,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    /// reserved_stock > stock: a prior bug left the counters inconsistent.
    /// Available is clamped to 0; the counters are not auto-corrected.
    pub invariant_violated: bool,
}

/// The accounting engine. Runs as the final step of every mutation to
/// `stock` or `reserved_stock`, per size variant, before persisting.
pub fn derive_stock(levels: StockLevels) -> DerivedStock {
    let available = (levels.stock - levels.reserved_stock).max(0);
    DerivedStock {
        available_stock: available,
        is_out_of_stock: available <= 0,
        is_low_stock: available > 0 && available <= levels.low_stock_threshold,
        invariant_violated: levels.reserved_stock > levels.stock,
    }
}

/// Subtraction on a reservation counter. Clamps at 0 when a prior state
/// violated `reserved_stock <= stock`.
pub fn clamped_sub(current: i32, delta: i32) -> i32 {
    (current - delta).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sizes_round_trip_through_strings() {
        for size in ALL_SIZES {
            assert_eq!(ShoeSize::from_str(size.as_str()), Ok(size));
        }
        assert!(ShoeSize::from_str("35").is_err());
        assert!(ShoeSize::from_str("47").is_err());
    }

    #[test]
    fn plain_availability() {
        let d = derive_stock(StockLevels { stock: 10, reserved_stock: 3, low_stock_threshold: 5 });
        assert_eq!(d.available_stock, 7);
        assert!(!d.is_low_stock);
        assert!(!d.is_out_of_stock);
        assert!(!d.invariant_violated);
    }

    #[test]
    fn fully_reserved_is_out_of_stock() {
        let d = derive_stock(StockLevels { stock: 5, reserved_stock: 5, low_stock_threshold: 5 });
        assert_eq!(d.available_stock, 0);
        assert!(d.is_out_of_stock);
        assert!(!d.is_low_stock);
    }

    #[test]
    fn low_stock_band_is_half_open() {
        let at_threshold = derive_stock(StockLevels { stock: 5, reserved_stock: 0, low_stock_threshold: 5 });
        assert!(at_threshold.is_low_stock);
        let above = derive_stock(StockLevels { stock: 6, reserved_stock: 0, low_stock_threshold: 5 });
        assert!(!above.is_low_stock);
        let empty = derive_stock(StockLevels { stock: 0, reserved_stock: 0, low_stock_threshold: 5 });
        assert!(!empty.is_low_stock);
        assert!(empty.is_out_of_stock);
    }

    #[test]
    fn over_reservation_clamps_available_and_flags_violation() {
        let d = derive_stock(StockLevels { stock: 2, reserved_stock: 7, low_stock_threshold: 5 });
        assert_eq!(d.available_stock, 0);
        assert!(d.is_out_of_stock);
        assert!(d.invariant_violated);
    }

    #[test]
    fn clamped_sub_never_goes_negative() {
        assert_eq!(clamped_sub(3, 5), 0);
        assert_eq!(clamped_sub(5, 3), 2);
        assert_eq!(clamped_sub(0, 1), 0);
    }

    proptest! {
        #[test]
        fn available_is_clamped_difference(stock in 0i32..10_000, reserved in 0i32..10_000, threshold in 0i32..100) {
            let d = derive_stock(StockLevels { stock, reserved_stock: reserved, low_stock_threshold: threshold });
            prop_assert_eq!(d.available_stock, (stock - reserved).max(0));
        }

        #[test]
        fn flags_are_mutually_exclusive(stock in 0i32..10_000, reserved in 0i32..10_000, threshold in 0i32..100) {
            let d = derive_stock(StockLevels { stock, reserved_stock: reserved, low_stock_threshold: threshold });
            prop_assert!(!(d.is_low_stock && d.is_out_of_stock));
            prop_assert_eq!(d.is_out_of_stock, d.available_stock <= 0);
            prop_assert_eq!(d.is_low_stock, d.available_stock > 0 && d.available_stock <= threshold);
        }
    }
}
