//! Session carts and checkout.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Address, Cart, Order};
use crate::domain::value_objects::Sku;
use crate::error::{CommerceError, Result};
use crate::http::extract::{Tenant, ValidJson};
use crate::http::AppState;
use crate::services::orders::CheckoutRequest;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/cart/:session", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/:session/items", post(add_item))
        .route("/api/v1/cart/:session/items/:product_id/:sku", put(update_item).delete(remove_item))
        .route("/api/v1/checkout/:session", post(checkout))
}

fn session_id(raw: &str) -> Result<&str> {
    let s = raw.trim();
    if s.is_empty() || s.len() > 128 { return Err(CommerceError::InvalidInput("session id must be 1-128 characters".into())); }
    Ok(s)
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemBody {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(range(min = 1, max = 99))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemBody {
    #[validate(range(max = 99))]
    pub quantity: u32,
}

async fn get_cart(State(s): State<AppState>, Tenant(t): Tenant, Path(session): Path<String>) -> Result<Json<Cart>> {
    Ok(Json(s.carts.get(&t, session_id(&session)?).await?))
}

async fn clear_cart(State(s): State<AppState>, Tenant(t): Tenant, Path(session): Path<String>) -> Result<StatusCode> {
    s.carts.clear(&t, session_id(&session)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_item(State(s): State<AppState>, Tenant(t): Tenant, Path(session): Path<String>, ValidJson(b): ValidJson<AddItemBody>) -> Result<(StatusCode, Json<Cart>)> {
    let cart = s.carts.add_item(&t, session_id(&session)?, b.product_id, Sku::new(b.sku)?, b.quantity).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

async fn update_item(
    State(s): State<AppState>, Tenant(t): Tenant, Path((session, product_id, sku)): Path<(String, Uuid, String)>, ValidJson(b): ValidJson<UpdateItemBody>,
) -> Result<Json<Cart>> {
    Ok(Json(s.carts.update_item(&t, session_id(&session)?, product_id, Sku::new(sku)?, b.quantity).await?))
}

async fn remove_item(State(s): State<AppState>, Tenant(t): Tenant, Path((session, product_id, sku)): Path<(String, Uuid, String)>) -> Result<Json<Cart>> {
    Ok(Json(s.carts.remove_item(&t, session_id(&session)?, product_id, Sku::new(sku)?).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 120))]
    pub customer_name: Option<String>,
    #[validate]
    pub shipping_address: Address,
    #[validate]
    pub billing_address: Option<Address>,
}

async fn checkout(State(s): State<AppState>, Tenant(t): Tenant, Path(session): Path<String>, ValidJson(b): ValidJson<CheckoutBody>) -> Result<(StatusCode, Json<Order>)> {
    let req = CheckoutRequest { email: b.email, customer_name: b.customer_name, shipping_address: b.shipping_address, billing_address: b.billing_address };
    let order = s.orders.checkout(&t, session_id(&session)?, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}
