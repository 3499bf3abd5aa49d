//! Customer order lookup and cancellation, authorised by the order email.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::error::Result;
use crate::http::extract::Tenant;
use crate::http::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
}

#[derive(Debug, Deserialize)]
pub struct EmailParam { pub email: String }

async fn get_order(State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, Query(q): Query<EmailParam>) -> Result<Json<Order>> {
    Ok(Json(s.orders.get_for_customer(&t, id, &q.email).await?))
}

async fn cancel_order(State(s): State<AppState>, Tenant(t): Tenant, Path(id): Path<Uuid>, Query(q): Query<EmailParam>) -> Result<Json<Order>> {
    Ok(Json(s.orders.cancel_for_customer(&t, id, &q.email).await?))
}
