//! REST surface.
//!
//! Storefront routes live under `/api/v1`, back-office routes under
//! `/api/v1/admin`. Every route except `/health` is tenant scoped.

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::services::{
    AnalyticsService, CartService, CatalogService, EventPublisher, InventoryService, OrderService, SearchService,
};
use crate::store::Store;

pub mod admin;
pub mod cart;
pub mod catalog;
pub mod extract;
pub mod orders;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub catalog: CatalogService,
    pub carts: CartService,
    pub orders: OrderService,
    pub inventory: InventoryService,
    pub search: SearchService,
    pub analytics: AnalyticsService,
}

impl AppState {
    /// Wires every service onto one store and event publisher.
    pub fn new(store: Arc<dyn Store>, config: Config, events: EventPublisher) -> Self {
        let inventory = InventoryService::new(store.clone(), events.clone());
        Self {
            catalog: CatalogService::new(store.clone(), events.clone()),
            carts: CartService::new(store.clone(), config.pricing.currency.clone()),
            orders: OrderService::new(store.clone(), inventory.clone(), events, config.pricing.clone()),
            search: SearchService::new(store.clone()),
            analytics: AnalyticsService::new(store.clone(), inventory.clone(), config.low_stock_threshold),
            inventory,
            config: Arc::new(config),
            store,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(catalog::routes())
        .merge(cart::routes())
        .merge(orders::routes())
        .nest("/api/v1/admin", admin::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(s): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": "storehub", "storage": s.store.backend() }))
}
