pub mod alert_handlers;
pub mod alerts;
pub mod app;
pub mod error;
pub mod ledger;
pub mod movement_handlers;
pub mod order_trigger;
pub mod product_handlers;
pub mod reconciliation;
pub mod reservation_handlers;
pub mod stock;

pub use app::{build_router, AppState, StockConfig};
pub use error::StockError;

pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 5;
