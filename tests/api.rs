use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use storehub::config::Config;
use storehub::http::{app, AppState};
use storehub::services::EventPublisher;
use storehub::store::{MemoryStore, Store};

const TOKEN: &str = "test-admin-token";

fn test_app() -> Router {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    app(AppState::new(store, Config::for_memory(TOKEN), EventPublisher::disabled()))
}

struct Call<'a> { method: Method, uri: &'a str, tenant: Option<&'a str>, admin: bool, body: Option<Value> }

impl<'a> Call<'a> {
    fn get(uri: &'a str) -> Self { Self { method: Method::GET, uri, tenant: Some("acme"), admin: false, body: None } }
    fn post(uri: &'a str, body: Value) -> Self { Self { method: Method::POST, body: Some(body), ..Self::get(uri) } }
    fn put(uri: &'a str, body: Value) -> Self { Self { method: Method::PUT, body: Some(body), ..Self::get(uri) } }
    fn delete(uri: &'a str) -> Self { Self { method: Method::DELETE, ..Self::get(uri) } }
    fn admin(mut self) -> Self { self.admin = true; self }
    fn tenant(mut self, tenant: Option<&'a str>) -> Self { self.tenant = tenant; self }

    async fn send(self, app: &Router) -> (StatusCode, Value) {
        let mut req = Request::builder().method(self.method).uri(self.uri);
        if let Some(t) = self.tenant { req = req.header("x-tenant-id", t); }
        if self.admin { req = req.header(header::AUTHORIZATION, format!("Bearer {TOKEN}")); }
        let req = match self.body {
            Some(b) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(b.to_string())).unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, body)
    }
}

fn product_body(name: &str, stock: u32, category_id: Option<&str>) -> Value {
    json!({
        "name": name,
        "description": "Classic cotton shirt",
        "brand": "Acme",
        "category_id": category_id,
        "base_price": "30.00",
        "variants": [{ "sku": format!("{}-m", &name[..3]), "color": "White", "size": "M", "stock": stock }],
        "tags": ["cotton"]
    })
}

fn checkout_body(email: &str) -> Value {
    json!({
        "email": email,
        "customer_name": "Ada Lovelace",
        "shipping_address": { "name": "Ada Lovelace", "street1": "1 Main St", "city": "London", "zip": "N1 9GU", "country": "GB" }
    })
}

/// Creates and approves a product, returning its id and first SKU.
async fn live_product(app: &Router, name: &str, stock: u32, category_id: Option<&str>) -> (String, String) {
    let (status, p) = Call::post("/api/v1/admin/products", product_body(name, stock, category_id)).admin().send(app).await;
    assert_eq!(status, StatusCode::CREATED, "{p}");
    let id = p["id"].as_str().unwrap().to_string();
    let (status, _) = Call::post(&format!("/api/v1/admin/products/{id}/approve"), json!({})).admin().send(app).await;
    assert_eq!(status, StatusCode::OK);
    (id, p["variants"][0]["sku"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn health_needs_no_tenant() {
    let (status, body) = Call::get("/health").tenant(None).send(&test_app()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn tenant_header_is_required() {
    let app = test_app();
    let (status, body) = Call::get("/api/v1/products").tenant(None).send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_tenant");
    let (status, _) = Call::get("/api/v1/products").tenant(Some("Not A Tenant!")).send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let app = test_app();
    let (status, body) = Call::get("/api/v1/admin/products").send(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn pending_products_stay_off_the_storefront() {
    let app = test_app();
    let (_, p) = Call::post("/api/v1/admin/products", product_body("Oxford Shirt", 5, None)).admin().send(&app).await;
    assert_eq!(p["approval"]["status"], "pending");
    let (_, list) = Call::get("/api/v1/products").send(&app).await;
    assert_eq!(list["total"], 0);

    let id = p["id"].as_str().unwrap();
    Call::post(&format!("/api/v1/admin/products/{id}/approve"), json!({})).admin().send(&app).await;
    let (_, list) = Call::get("/api/v1/products").send(&app).await;
    assert_eq!(list["total"], 1);
    let (status, _) = Call::get("/api/v1/products/slug/oxford-shirt").send(&app).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let app = test_app();
    let (id, _) = live_product(&app, "Oxford Shirt", 5, None).await;
    let (status, _) = Call::get(&format!("/api/v1/products/{id}")).tenant(Some("globex")).send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = Call::get("/api/v1/products").tenant(Some("globex")).send(&app).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn category_tree_and_filter() {
    let app = test_app();
    let (status, men) = Call::post("/api/v1/admin/categories", json!({ "name": "Men" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::CREATED);
    let men_id = men["id"].as_str().unwrap();
    let (_, shirts) = Call::post("/api/v1/admin/categories", json!({ "name": "Shirts", "parent_id": men_id })).admin().send(&app).await;
    assert_eq!(shirts["level"], 2);
    live_product(&app, "Oxford Shirt", 5, shirts["id"].as_str()).await;
    live_product(&app, "Loafer", 5, None).await;

    let (_, tree) = Call::get("/api/v1/categories").send(&app).await;
    assert_eq!(tree[0]["name"], "Men");
    assert_eq!(tree[0]["children"][0]["slug"], "shirts");

    let (_, view) = Call::get("/api/v1/categories/shirts").send(&app).await;
    assert_eq!(view["breadcrumb"].as_array().unwrap().len(), 2);

    let (_, list) = Call::get("/api/v1/products?category=men").send(&app).await;
    assert_eq!(list["total"], 1);

    let (status, _) = Call::delete(&format!("/api/v1/admin/categories/{men_id}")).admin().send(&app).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn checkout_flow_moves_stock_and_feeds_analytics() {
    let app = test_app();
    let (id, sku) = live_product(&app, "Oxford Shirt", 2, None).await;

    let (status, cart) = Call::post("/api/v1/cart/s1/items", json!({ "product_id": id, "sku": sku, "quantity": 2 })).send(&app).await;
    assert_eq!(status, StatusCode::CREATED, "{cart}");
    assert_eq!(cart["subtotal"]["amount"], "60.00");

    let (status, order) = Call::post("/api/v1/checkout/s1", checkout_body("ada@example.com")).send(&app).await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "pending");
    assert_eq!(order["shipping"]["amount"], "0");
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
    let order_id = order["id"].as_str().unwrap().to_string();

    // Sold out: the product leaves the storefront.
    let (status, _) = Call::get(&format!("/api/v1/products/{id}")).send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, cart) = Call::get("/api/v1/cart/s1").send(&app).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 0);

    let (status, _) = Call::get(&format!("/api/v1/orders/{order_id}?email=someone@else.com")).send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = Call::get(&format!("/api/v1/orders/{order_id}?email=ada@example.com")).send(&app).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = Call::put(&format!("/api/v1/admin/orders/{order_id}/payment"), json!({ "status": "paid" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    let (_, dash) = Call::get("/api/v1/admin/analytics/dashboard").admin().send(&app).await;
    assert_eq!(dash["summary"]["orders"], 1);
    assert_eq!(dash["top_products"][0]["quantity"], 2);
    assert_eq!(dash["low_stock_products"], 1);

    // Cancelling restocks and brings the product back.
    let (status, cancelled) = Call::post(&format!("/api/v1/orders/{order_id}/cancel?email=ada@example.com"), json!({})).send(&app).await;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert_eq!(cancelled["status"], "cancelled");
    let (_, product) = Call::get(&format!("/api/v1/products/{id}")).send(&app).await;
    assert_eq!(product["variants"][0]["stock"], 2);
}

#[tokio::test]
async fn cart_rejects_more_than_stock() {
    let app = test_app();
    let (id, sku) = live_product(&app, "Oxford Shirt", 1, None).await;
    let (status, body) = Call::post("/api/v1/cart/s1/items", json!({ "product_id": id, "sku": sku, "quantity": 2 })).send(&app).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "insufficient_stock");
}

#[tokio::test]
async fn invalid_bodies_are_rejected() {
    let app = test_app();
    let (status, body) = Call::post("/api/v1/checkout/s1", checkout_body("not-an-email")).send(&app).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");
    let (status, _) = Call::post("/api/v1/checkout/s1", checkout_body("ada@example.com")).send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_order_transition_conflicts() {
    let app = test_app();
    let (id, sku) = live_product(&app, "Oxford Shirt", 5, None).await;
    Call::post("/api/v1/cart/s1/items", json!({ "product_id": id, "sku": sku, "quantity": 1 })).send(&app).await;
    let (_, order) = Call::post("/api/v1/checkout/s1", checkout_body("ada@example.com")).send(&app).await;
    let order_id = order["id"].as_str().unwrap();
    let (status, _) = Call::put(&format!("/api/v1/admin/orders/{order_id}/status"), json!({ "status": "shipped" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, body) = Call::put(&format!("/api/v1/admin/orders/{order_id}/status"), json!({ "status": "confirmed", "note": "ok" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history"][0]["to"], "confirmed");
}

#[tokio::test]
async fn search_suggests_spelling() {
    let app = test_app();
    live_product(&app, "Oxford Shirt", 5, None).await;
    let (_, hits) = Call::get("/api/v1/search?q=oxford&sort=price_asc").send(&app).await;
    assert_eq!(hits["total"], 1);
    assert_eq!(hits["facets"]["brands"][0]["value"], "Acme");
    let (_, miss) = Call::get("/api/v1/search?q=oxfrod").send(&app).await;
    assert_eq!(miss["total"], 0);
    assert_eq!(miss["suggestions"][0], "oxford");
    let (_, complete) = Call::get("/api/v1/search/autocomplete?q=shi").send(&app).await;
    assert_eq!(complete[0]["text"], "Oxford Shirt");
}

async fn stock_of(app: &Router, id: &str) -> Value {
    let (_, p) = Call::get(&format!("/api/v1/admin/products/{id}")).admin().send(app).await;
    p["variants"][0]["stock"].clone()
}

/// Places and pays for an order of `quantity` units from session `s1`.
async fn paid_order(app: &Router, id: &str, sku: &str, quantity: u32) -> String {
    Call::post("/api/v1/cart/s1/items", json!({ "product_id": id, "sku": sku, "quantity": quantity })).send(app).await;
    let (status, order) = Call::post("/api/v1/checkout/s1", checkout_body("ada@example.com")).send(app).await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    let order_id = order["id"].as_str().unwrap().to_string();
    let (status, _) = Call::put(&format!("/api/v1/admin/orders/{order_id}/payment"), json!({ "status": "paid" })).admin().send(app).await;
    assert_eq!(status, StatusCode::OK);
    order_id
}

#[tokio::test]
async fn admin_stock_adjustment() {
    let app = test_app();
    let (id, sku) = live_product(&app, "Oxford Shirt", 2, None).await;
    let uri = format!("/api/v1/admin/products/{id}/stock");

    let (status, t) = Call::post(&uri, json!({ "sku": sku, "delta": -2, "reason": "recount" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK, "{t}");
    assert_eq!(t["current"], 0);
    assert_eq!(t["activation"], "deactivated");
    let (status, t) = Call::post(&uri, json!({ "sku": sku, "delta": 7 })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((t["current"].clone(), t["total_stock"].clone()), (json!(7), json!(7)));

    let (status, body) = Call::post(&uri, json!({ "sku": sku, "delta": -8 })).admin().send(&app).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "insufficient_stock");
    let (status, _) = Call::post(&uri, json!({ "sku": sku, "delta": 1 })).send(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(stock_of(&app, &id).await, 7);
}

#[tokio::test]
async fn out_of_range_stock_delta_is_rejected() {
    let app = test_app();
    let (id, sku) = live_product(&app, "Oxford Shirt", 2, None).await;
    let uri = format!("/api/v1/admin/products/{id}/stock");
    for delta in [json!(1_000_001), json!(-1_000_001), json!(i64::MAX), json!(i64::MIN)] {
        let (status, body) = Call::post(&uri, json!({ "sku": sku, "delta": delta })).admin().send(&app).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{delta}: {body}");
    }
    let (status, _) = Call::post(&uri, json!({ "sku": sku, "delta": 1_000_000 })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock_of(&app, &id).await, 1_000_002);
}

#[tokio::test]
async fn cancel_and_restocking_refund_return_stock_once() {
    let app = test_app();
    let (id, sku) = live_product(&app, "Oxford Shirt", 5, None).await;
    let order_id = paid_order(&app, &id, &sku, 2).await;
    assert_eq!(stock_of(&app, &id).await, 3);

    let (status, _) = Call::put(&format!("/api/v1/admin/orders/{order_id}/status"), json!({ "status": "cancelled" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock_of(&app, &id).await, 5);

    let refund = format!("/api/v1/admin/orders/{order_id}/refund");
    let (status, body) = Call::post(&refund, json!({ "reason": "cancelled", "restock": true })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    Call::put(&refund, json!({ "status": "processing" })).admin().send(&app).await;
    let (status, order) = Call::put(&refund, json!({ "status": "completed" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK, "{order}");
    assert_eq!(order["payment_status"], "refunded");
    assert_eq!(stock_of(&app, &id).await, 5);
}

#[tokio::test]
async fn partial_refund_cannot_restock() {
    let app = test_app();
    let (id, sku) = live_product(&app, "Oxford Shirt", 5, None).await;
    let order_id = paid_order(&app, &id, &sku, 2).await;
    let refund = format!("/api/v1/admin/orders/{order_id}/refund");
    let (status, _) = Call::post(&refund, json!({ "amount": "10.00", "reason": "scratch", "restock": true })).admin().send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = Call::post(&refund, json!({ "amount": "10.00", "reason": "scratch" })).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock_of(&app, &id).await, 3);
}

#[tokio::test]
async fn currency_change_between_cart_and_checkout_conflicts() {
    let app = test_app();
    let mut body = product_body("Oxford Shirt", 5, None);
    body["currency"] = json!("EUR");
    let (status, p) = Call::post("/api/v1/admin/products", body.clone()).admin().send(&app).await;
    assert_eq!(status, StatusCode::CREATED, "{p}");
    let id = p["id"].as_str().unwrap().to_string();
    let sku = p["variants"][0]["sku"].as_str().unwrap().to_string();
    Call::post(&format!("/api/v1/admin/products/{id}/approve"), json!({})).admin().send(&app).await;

    let (status, cart) = Call::post("/api/v1/cart/s1/items", json!({ "product_id": id, "sku": sku, "quantity": 1 })).send(&app).await;
    assert_eq!(status, StatusCode::CREATED, "{cart}");
    assert_eq!(cart["subtotal"]["currency"], "EUR");

    body["currency"] = json!("USD");
    let (status, _) = Call::put(&format!("/api/v1/admin/products/{id}"), body).admin().send(&app).await;
    assert_eq!(status, StatusCode::OK);

    let (status, err) = Call::post("/api/v1/checkout/s1", checkout_body("ada@example.com")).send(&app).await;
    assert_eq!(status, StatusCode::CONFLICT, "{err}");
    assert_eq!(stock_of(&app, &id).await, 5);
    let (_, orders) = Call::get("/api/v1/admin/orders").admin().send(&app).await;
    assert_eq!(orders["total"], 0);
}
