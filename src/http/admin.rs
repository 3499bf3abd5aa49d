//! Back-office API. Every handler takes [`AdminAuth`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{
    ApprovalStatus, Category, Order, OrderStatus, PaymentStatus, Product, ProductDetails, RefundStatus, StockTransition, Variant,
};
use crate::domain::value_objects::{Money, Sku, TenantId};
use crate::error::{CommerceError, Result};
use crate::http::extract::{AdminAuth, Tenant, ValidJson};
use crate::http::AppState;
use crate::services::analytics::{CategorySales, DailySales, Dashboard, DateRange, ProductSales};
use crate::services::catalog::{CategoryInput, Review};
use crate::services::inventory::LowStockProduct;
use crate::store::{OrderFilter, Page, Paginated, ProductFilter};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/products/:id/approve", post(approve_product))
        .route("/products/:id/reject", post(reject_product))
        .route("/products/:id/request-changes", post(request_changes))
        .route("/products/:id/resubmit", post(resubmit_product))
        .route("/products/:id/activate", post(activate_product))
        .route("/products/:id/deactivate", post(deactivate_product))
        .route("/products/:id/stock", post(adjust_stock))
        .route("/categories", post(create_category))
        .route("/categories/:id", put(update_category).delete(delete_category))
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/payment", put(update_payment))
        .route("/orders/:id/refund", post(request_refund).put(update_refund))
        .route("/inventory/low-stock", get(low_stock))
        .route("/analytics/dashboard", get(dashboard))
        .route("/analytics/sales", get(sales))
        .route("/analytics/top-products", get(top_products))
        .route("/analytics/categories", get(category_sales))
}

// ---- products ----

#[derive(Debug, Deserialize)]
pub struct AdminProductParams {
    pub approval: Option<ApprovalStatus>,
    pub active: Option<bool>,
    pub featured: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VariantBody {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(max = 50))]
    pub color: Option<String>,
    #[validate(length(max = 50))]
    pub size: Option<String>,
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stock: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductBody {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,
    #[validate(length(max = 100))]
    pub brand: Option<String>,
    pub category_id: Option<Uuid>,
    pub base_price: Decimal,
    pub compare_at_price: Option<Decimal>,
    /// Defaults to the store currency.
    pub currency: Option<String>,
    #[validate]
    pub variants: Vec<VariantBody>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_featured: bool,
}

impl ProductBody {
    fn into_details(self, default_currency: &str) -> Result<ProductDetails> {
        let currency = self.currency.as_deref().unwrap_or(default_currency).to_string();
        let money = |amount: Decimal| Money::new(amount, &currency);
        let variants = self.variants.into_iter()
            .map(|v| -> Result<Variant> { Ok(Variant { sku: Sku::new(v.sku)?, color: v.color, size: v.size, price: v.price.map(money), stock: v.stock }) })
            .collect::<Result<Vec<_>>>()?;
        Ok(ProductDetails {
            name: self.name,
            description: self.description,
            brand: self.brand,
            category_id: self.category_id,
            base_price: money(self.base_price),
            compare_at_price: self.compare_at_price.map(money),
            variants,
            tags: self.tags,
            images: self.images,
            is_featured: self.is_featured,
        })
    }
}

async fn list_products(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<AdminProductParams>) -> Result<Json<Paginated<Product>>> {
    let filter = ProductFilter { approval: p.approval, active: p.active, featured: p.featured, ..ProductFilter::default() };
    Ok(Json(s.catalog.products(&t, &filter, Page::new(p.page, p.per_page)).await?))
}

async fn get_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    Ok(Json(s.catalog.product(&t, id).await?))
}

async fn create_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, ValidJson(b): ValidJson<ProductBody>) -> Result<(StatusCode, Json<Product>)> {
    let details = b.into_details(&s.config.pricing.currency)?;
    Ok((StatusCode::CREATED, Json(s.catalog.create_product(&t, details).await?)))
}

async fn update_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, ValidJson(b): ValidJson<ProductBody>) -> Result<Json<Product>> {
    let details = b.into_details(&s.config.pricing.currency)?;
    Ok(Json(s.catalog.update_product(&t, id, details).await?))
}

async fn delete_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<StatusCode> {
    s.catalog.delete_product(&t, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewBody {
    #[validate(length(min = 1, max = 1000))]
    pub note: String,
}

async fn review(s: &AppState, t: &TenantId, id: Uuid, review: Review) -> Result<Json<Product>> {
    Ok(Json(s.catalog.review_product(t, id, review).await?))
}

async fn approve_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    review(&s, &t, id, Review::Approve).await
}

async fn reject_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, ValidJson(b): ValidJson<ReviewBody>) -> Result<Json<Product>> {
    review(&s, &t, id, Review::Reject(b.note)).await
}

async fn request_changes(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, ValidJson(b): ValidJson<ReviewBody>) -> Result<Json<Product>> {
    review(&s, &t, id, Review::RequestChanges(b.note)).await
}

async fn resubmit_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    review(&s, &t, id, Review::Resubmit).await
}

async fn activate_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    Ok(Json(s.catalog.set_product_active(&t, id, true).await?))
}

async fn deactivate_product(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    Ok(Json(s.catalog.set_product_active(&t, id, false).await?))
}

/// Largest single manual stock correction, in either direction.
const MAX_STOCK_DELTA: i64 = 1_000_000;
const MIN_STOCK_DELTA: i64 = -MAX_STOCK_DELTA;

#[derive(Debug, Deserialize, Validate)]
pub struct StockBody {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(range(min = "MIN_STOCK_DELTA", max = "MAX_STOCK_DELTA"))]
    pub delta: i64,
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

async fn adjust_stock(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, ValidJson(b): ValidJson<StockBody>) -> Result<Json<StockTransition>> {
    Ok(Json(s.inventory.adjust(&t, id, Sku::new(b.sku)?, b.delta, b.reason.as_deref()).await?))
}

// ---- categories ----

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

impl From<CategoryBody> for CategoryInput {
    fn from(b: CategoryBody) -> Self {
        Self { name: b.name, description: b.description, parent_id: b.parent_id, sort_order: b.sort_order, is_active: b.is_active }
    }
}

async fn create_category(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, ValidJson(b): ValidJson<CategoryBody>) -> Result<(StatusCode, Json<Category>)> {
    Ok((StatusCode::CREATED, Json(s.catalog.create_category(&t, b.into()).await?)))
}

async fn update_category(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, ValidJson(b): ValidJson<CategoryBody>) -> Result<Json<Category>> {
    Ok(Json(s.catalog.update_category(&t, id, b.into()).await?))
}

async fn delete_category(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<StatusCode> {
    s.catalog.delete_category(&t, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- orders ----

#[derive(Debug, Deserialize)]
pub struct AdminOrderParams {
    pub status: Option<OrderStatus>,
    pub email: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_orders(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<AdminOrderParams>) -> Result<Json<Paginated<Order>>> {
    let filter = OrderFilter { status: p.status, email: p.email };
    Ok(Json(s.orders.list(&t, &filter, Page::new(p.page, p.per_page)).await?))
}

async fn get_order(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.orders.get(&t, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody<S> { pub status: S, pub note: Option<String> }

async fn update_order_status(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, Json(b): Json<StatusBody<OrderStatus>>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_status(&t, id, b.status, b.note).await?))
}

async fn update_payment(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, Json(b): Json<StatusBody<PaymentStatus>>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_payment(&t, id, b.status, b.note).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundBody {
    /// The whole refundable balance when absent.
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[serde(default)]
    pub restock: bool,
}

async fn request_refund(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, ValidJson(b): ValidJson<RefundBody>) -> Result<Json<Order>> {
    Ok(Json(s.orders.request_refund(&t, id, b.amount, b.reason, b.restock).await?))
}

async fn update_refund(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, Json(b): Json<StatusBody<RefundStatus>>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_refund(&t, id, b.status, b.note).await?))
}

// ---- inventory & analytics ----

#[derive(Debug, Deserialize)]
pub struct LowStockParams { pub threshold: Option<u32> }

async fn low_stock(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<LowStockParams>) -> Result<Json<Vec<LowStockProduct>>> {
    let threshold = p.threshold.unwrap_or(s.config.low_stock_threshold);
    Ok(Json(s.inventory.low_stock(&t, threshold).await?))
}

#[derive(Debug, Deserialize)]
pub struct RangeParams { pub from: Option<String>, pub to: Option<String>, pub limit: Option<usize> }

impl RangeParams {
    fn range(&self) -> Result<DateRange> { DateRange::parse(self.from.as_deref(), self.to.as_deref(), Utc::now()) }
}

async fn dashboard(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<RangeParams>) -> Result<Json<Dashboard>> {
    Ok(Json(s.analytics.dashboard(&t, p.range()?).await?))
}

async fn sales(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<RangeParams>) -> Result<Json<Vec<DailySales>>> {
    let range = p.range()?;
    if range.to - range.from > chrono::Duration::days(366) {
        return Err(CommerceError::InvalidInput("sales range is limited to one year".into()));
    }
    Ok(Json(s.analytics.sales(&t, range).await?))
}

async fn top_products(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<RangeParams>) -> Result<Json<Vec<ProductSales>>> {
    Ok(Json(s.analytics.top_products(&t, p.range()?, p.limit.unwrap_or(10)).await?))
}

async fn category_sales(_: AdminAuth, State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<RangeParams>) -> Result<Json<Vec<CategorySales>>> {
    Ok(Json(s.analytics.categories(&t, p.range()?).await?))
}
