use crate::ledger::MovementType;
use crate::stock::ShoeSize;
use common_http_errors::ApiError;
use uuid::Uuid;

/// Domain error taxonomy for the stock subsystem. Nothing here is fatal to
/// the host process; every variant maps onto a reported HTTP condition.
#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("insufficient stock for product {product} size {size}: requested {requested}, available {available}")]
    InsufficientStock {
        product: Uuid,
        size: ShoeSize,
        requested: i32,
        available: i32,
    },
    #[error("unknown product {0}")]
    UnknownProduct(Uuid),
    #[error("product {product} has no size {size}")]
    UnknownSize { product: Uuid, size: ShoeSize },
    #[error("invalid quantity {quantity} for movement type {movement_type}")]
    InvalidMovement {
        movement_type: MovementType,
        quantity: i32,
    },
    #[error("a movement reason is required")]
    MissingReason,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        match &err {
            StockError::InsufficientStock { .. } => {
                ApiError::conflict("insufficient_stock", Some(err.to_string()))
            }
            StockError::UnknownProduct(_) => ApiError::not_found("unknown_product"),
            StockError::UnknownSize { .. } => ApiError::not_found("unknown_size"),
            StockError::InvalidMovement { .. } => ApiError::BadRequest {
                code: "invalid_movement",
                trace_id: None,
                message: Some(err.to_string()),
            },
            StockError::MissingReason => ApiError::bad_request("missing_reason", None),
            StockError::Db(e) => ApiError::internal(e, None),
        }
    }
}
