use axum::extract::{Path, Query, State};
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, query_scalar, Row};
use std::collections::HashSet;
use uuid::Uuid;

use crate::app::AppState;
use crate::ledger::{self, MovementType, NewMovement};
use crate::stock::ShoeSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Origin,
    Move,
    Limited,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Origin => "origin",
            Collection::Move => "move",
            Collection::Limited => "limited",
        }
    }
}

/// URL slug from a product title: lowercase, alphanumeric runs joined by
/// single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[derive(Debug, Deserialize)]
pub struct NewSizeVariant {
    pub size: ShoeSize,
    #[serde(default)]
    pub stock: i32,
    pub low_stock_threshold: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub title: String,
    pub slug: Option<String>,
    pub collection: Collection,
    pub price: BigDecimal,
    pub sizes: Vec<NewSizeVariant>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SizeVariantRow {
    pub size: String,
    pub stock: i32,
    pub reserved_stock: i32,
    pub available_stock: i32,
    pub low_stock_threshold: i32,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    pub suggested_restock_quantity: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub collection: Collection,
    pub price: BigDecimal,
    pub sizes: Vec<SizeVariantRow>,
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::bad_request("missing_title", None));
    }
    if payload.sizes.is_empty() {
        return Err(ApiError::BadRequest {
            code: "missing_sizes",
            trace_id: None,
            message: Some("A product needs at least one size variant".into()),
        });
    }
    if payload.price < BigDecimal::from(0) {
        return Err(ApiError::bad_request("invalid_price", None));
    }
    let mut seen = HashSet::new();
    for variant in &payload.sizes {
        if !seen.insert(variant.size) {
            return Err(ApiError::BadRequest {
                code: "duplicate_size",
                trace_id: None,
                message: Some(format!("Size {} appears more than once", variant.size)),
            });
        }
        if variant.stock < 0 {
            return Err(ApiError::bad_request("invalid_stock", None));
        }
        if variant.low_stock_threshold.is_some_and(|t| t < 0) {
            return Err(ApiError::bad_request("invalid_threshold", None));
        }
    }

    let slug = payload
        .slug
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| slugify(&payload.title));

    let existing = query_scalar::<_, i32>("SELECT 1 FROM products WHERE slug = $1")
        .bind(&slug)
        .fetch_optional(&state.db)
        .await
        .map_err(|err| ApiError::internal(err, None))?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "slug_exists",
            Some(format!("A product with slug {slug} already exists")),
        ));
    }

    let product_id = Uuid::new_v4();
    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|err| ApiError::internal(err, None))?;

    query("INSERT INTO products (id, title, slug, collection, price) VALUES ($1, $2, $3, $4, $5)")
        .bind(product_id)
        .bind(payload.title.trim())
        .bind(&slug)
        .bind(payload.collection.as_str())
        .bind(&payload.price)
        .execute(&mut *tx)
        .await
        .map_err(|err| ApiError::internal(err, None))?;

    for variant in &payload.sizes {
        let threshold = variant
            .low_stock_threshold
            .unwrap_or(state.config.default_low_stock_threshold);
        query(
            "INSERT INTO product_sizes (product_id, size, stock, low_stock_threshold, is_out_of_stock) \
             VALUES ($1, $2, 0, $3, TRUE)",
        )
        .bind(product_id)
        .bind(variant.size.as_str())
        .bind(threshold)
        .execute(&mut *tx)
        .await
        .map_err(|err| ApiError::internal(err, None))?;
    }

    // Opening stock enters through the ledger like any other movement.
    for variant in &payload.sizes {
        if variant.stock > 0 {
            ledger::append_movement(
                &mut tx,
                &state.metrics,
                &state.config,
                NewMovement::new(
                    product_id,
                    variant.size,
                    MovementType::Initial,
                    variant.stock,
                    "Opening inventory",
                ),
            )
            .await?;
        } else {
            ledger::reassess_variant(&mut tx, &state.metrics, &state.config, product_id, variant.size)
                .await?;
        }
    }

    let sizes = query_as::<_, SizeVariantRow>(
        "SELECT size, stock, reserved_stock, available_stock, low_stock_threshold, \
         is_low_stock, is_out_of_stock, suggested_restock_quantity \
         FROM product_sizes WHERE product_id = $1 ORDER BY size",
    )
    .bind(product_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    tx.commit().await.map_err(|err| ApiError::internal(err, None))?;

    tracing::info!(product_id = %product_id, slug = %slug, sizes = sizes.len(), "Product created");
    Ok(Json(ProductResponse {
        id: product_id,
        title: payload.title.trim().to_string(),
        slug,
        collection: payload.collection,
        price: payload.price,
        sizes,
    }))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct HistoryRow {
    pub date: DateTime<Utc>,
    pub movement_type: String,
    pub size: String,
    pub quantity: i32,
    pub reason: String,
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct ProductDetailResponse {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub collection: String,
    pub price: BigDecimal,
    pub sizes: Vec<SizeVariantRow>,
    pub stock_history: Vec<HistoryRow>,
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ProductDetailResponse>, ApiError> {
    let product = query("SELECT title, slug, collection, price FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|err| ApiError::internal(err, None))?;
    let Some(product) = product else {
        return Err(ApiError::not_found("unknown_product"));
    };

    let sizes = query_as::<_, SizeVariantRow>(
        "SELECT size, stock, reserved_stock, available_stock, low_stock_threshold, \
         is_low_stock, is_out_of_stock, suggested_restock_quantity \
         FROM product_sizes WHERE product_id = $1 ORDER BY size",
    )
    .bind(product_id)
    .fetch_all(&state.db)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    let stock_history = query_as::<_, HistoryRow>(
        "SELECT date, movement_type, size, quantity, reason, reference \
         FROM product_stock_history WHERE product_id = $1 ORDER BY id DESC LIMIT 20",
    )
    .bind(product_id)
    .fetch_all(&state.db)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    Ok(Json(ProductDetailResponse {
        id: product_id,
        title: product.get("title"),
        slug: product.get("slug"),
        collection: product.get("collection"),
        price: product.get("price"),
        sizes,
        stock_history,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSizeRequest {
    pub low_stock_threshold: i32,
}

pub async fn update_size_threshold(
    State(state): State<AppState>,
    Path((product_id, size)): Path<(Uuid, String)>,
    Json(payload): Json<UpdateSizeRequest>,
) -> Result<Json<SizeVariantRow>, ApiError> {
    let Ok(size) = size.parse::<ShoeSize>() else {
        return Err(ApiError::bad_request("invalid_size", None));
    };
    if payload.low_stock_threshold < 0 {
        return Err(ApiError::bad_request("invalid_threshold", None));
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|err| ApiError::internal(err, None))?;
    query(
        "UPDATE product_sizes SET low_stock_threshold = $3, updated_at = NOW() \
         WHERE product_id = $1 AND size = $2",
    )
    .bind(product_id)
    .bind(size.as_str())
    .bind(payload.low_stock_threshold)
    .execute(&mut *tx)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    // Raises unknown_product / unknown_size when nothing matched, and
    // re-runs accounting + alerts against the new threshold otherwise.
    ledger::reassess_variant(&mut tx, &state.metrics, &state.config, product_id, size).await?;

    let row = query_as::<_, SizeVariantRow>(
        "SELECT size, stock, reserved_stock, available_stock, low_stock_threshold, \
         is_low_stock, is_out_of_stock, suggested_restock_quantity \
         FROM product_sizes WHERE product_id = $1 AND size = $2",
    )
    .bind(product_id)
    .bind(size.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    tx.commit().await.map_err(|err| ApiError::internal(err, None))?;
    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct StockFilter {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub low_only: Option<bool>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StockRow {
    pub product_id: Uuid,
    pub title: String,
    pub size: String,
    pub stock: i32,
    pub reserved_stock: i32,
    pub available_stock: i32,
    pub low_stock_threshold: i32,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    pub suggested_restock_quantity: Option<i32>,
}

pub async fn list_stock(
    State(state): State<AppState>,
    Query(filter): Query<StockFilter>,
) -> Result<Json<Vec<StockRow>>, ApiError> {
    let rows = query_as::<_, StockRow>(
        "SELECT ps.product_id, p.title, ps.size, ps.stock, ps.reserved_stock, ps.available_stock, \
         ps.low_stock_threshold, ps.is_low_stock, ps.is_out_of_stock, ps.suggested_restock_quantity \
         FROM product_sizes ps JOIN products p ON p.id = ps.product_id \
         WHERE ($1::uuid IS NULL OR ps.product_id = $1) \
         AND (NOT $2::boolean OR ps.is_low_stock OR ps.is_out_of_stock) \
         ORDER BY p.title, ps.size",
    )
    .bind(filter.product_id)
    .bind(filter.low_only.unwrap_or(false))
    .fetch_all(&state.db)
    .await
    .map_err(|err| ApiError::internal(err, None))?;

    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_mirrors_title_normalization() {
        assert_eq!(slugify("Origin Stone White"), "origin-stone-white");
        assert_eq!(slugify("  Move -- Coastal  "), "move-coastal");
        assert_eq!(slugify("Limited #42!"), "limited-42");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn collection_serde_round_trip() {
        assert_eq!(serde_json::to_string(&Collection::Move).unwrap(), "\"move\"");
        assert_eq!(
            serde_json::from_str::<Collection>("\"limited\"").unwrap(),
            Collection::Limited
        );
    }
}
