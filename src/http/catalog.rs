//! Storefront catalog: products, categories and search.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::aggregates::{CategoryNode, Product};
use crate::error::Result;
use crate::http::extract::Tenant;
use crate::http::AppState;
use crate::services::catalog::CategoryView;
use crate::services::search::{SearchParams, SearchResults, Suggestion};
use crate::store::{Page, Paginated};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/products", get(list_products))
        .route("/api/v1/products/:id", get(get_product))
        .route("/api/v1/products/slug/:slug", get(get_product_by_slug))
        .route("/api/v1/categories", get(list_categories))
        .route("/api/v1/categories/:id", get(get_category))
        .route("/api/v1/search", get(search))
        .route("/api/v1/search/autocomplete", get(autocomplete))
}

#[derive(Debug, Deserialize)]
pub struct ProductListParams {
    pub category: Option<String>,
    pub featured: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_products(State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<ProductListParams>) -> Result<Json<Paginated<Product>>> {
    let page = Page::new(p.page, p.per_page);
    Ok(Json(s.catalog.storefront_products(&t, p.category.as_deref(), p.featured, page).await?))
}

async fn get_product(State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    Ok(Json(s.catalog.storefront_product(&t, id).await?))
}

async fn get_product_by_slug(State(s): State<AppState>, Tenant(t): Tenant, Path(slug): Path<String>) -> Result<Json<Product>> {
    Ok(Json(s.catalog.storefront_product_by_slug(&t, &slug).await?))
}

async fn list_categories(State(s): State<AppState>, Tenant(t): Tenant) -> Result<Json<Vec<CategoryNode>>> {
    Ok(Json(s.catalog.nested_categories(&t).await?))
}

/// `:id` may also be a slug.
async fn get_category(State(s): State<AppState>, Tenant(t): Tenant, Path(key): Path<String>) -> Result<Json<CategoryView>> {
    Ok(Json(s.catalog.category_view(&t, &key).await?))
}

async fn search(State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<SearchParams>) -> Result<Json<SearchResults>> {
    Ok(Json(s.search.search(&t, &p).await?))
}

#[derive(Debug, Deserialize)]
pub struct AutocompleteParams { #[serde(default)] pub q: String, pub limit: Option<usize> }

async fn autocomplete(State(s): State<AppState>, Tenant(t): Tenant, Query(p): Query<AutocompleteParams>) -> Result<Json<Vec<Suggestion>>> {
    Ok(Json(s.search.autocomplete(&t, &p.q, p.limit).await?))
}
