use std::env;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    middleware,
    routing::{get, patch, post},
    Router,
};
use common_observability::StockMetrics;
use prometheus::{Encoder, TextEncoder};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::alert_handlers::{list_alerts, resolve_alert};
use crate::movement_handlers::{create_movement, list_movements};
use crate::order_trigger::ingest_order_event;
use crate::product_handlers::{create_product, get_product, list_stock, update_size_threshold};
use crate::reconciliation::reconcile_stock;
use crate::reservation_handlers::{create_reservation, release_reservation};
use crate::DEFAULT_LOW_STOCK_THRESHOLD;

#[derive(Clone)]
pub struct StockConfig {
    pub default_low_stock_threshold: i32,
    pub overstock_multiplier: i32,
    pub restock_lead_time_days: i32,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            default_low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            overstock_multiplier: 10,
            restock_lead_time_days: 14,
        }
    }
}

impl StockConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_low_stock_threshold: env_i32(
                "LOW_STOCK_DEFAULT_THRESHOLD",
                defaults.default_low_stock_threshold,
            ),
            overstock_multiplier: env_i32("OVERSTOCK_MULTIPLIER", defaults.overstock_multiplier),
            restock_lead_time_days: env_i32("RESTOCK_LEAD_TIME_DAYS", defaults.restock_lead_time_days),
        }
    }
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|v| *v >= 0)
        .unwrap_or(default)
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: StockConfig,
    pub metrics: Arc<StockMetrics>,
}

pub async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).to_string())
}

async fn error_metrics_mw(
    State(metrics): State<Arc<StockMetrics>>,
    req: axum::http::Request<Body>,
    next: middleware::Next,
) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        metrics
            .http_errors_total
            .with_label_values(&["stock-service", code, status.as_str()])
            .inc();
    }
    resp
}

pub fn build_router(state: AppState) -> Router {
    let allowed_origins = [
        "http://localhost:3000",
        "http://localhost:3001",
        "http://localhost:5173",
    ];

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    let metrics = state.metrics.clone();
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/products", post(create_product))
        .route("/products/:product_id", get(get_product))
        .route("/products/:product_id/sizes/:size", patch(update_size_threshold))
        .route("/stock", get(list_stock))
        .route("/stock/movements", post(create_movement).get(list_movements))
        .route("/stock/reservations", post(create_reservation))
        .route(
            "/stock/reservations/:order_reference",
            axum::routing::delete(release_reservation),
        )
        .route("/stock/alerts", get(list_alerts))
        .route("/stock/alerts/:alert_id/resolve", post(resolve_alert))
        .route("/stock/reconciliations", post(reconcile_stock))
        .route("/orders/events", post(ingest_order_event))
        .with_state(state)
        .layer(middleware::from_fn_with_state(metrics, error_metrics_mw))
        .layer(cors)
}
