//! Persistence boundary.
//!
//! Aggregates are stored whole, as documents, next to the handful of columns
//! needed to filter them. Two backends implement [`Store`]: Postgres for
//! deployments and an in-memory map for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{ApprovalStatus, Cart, Category, Order, OrderStatus, Product, StockTransition};
use crate::domain::value_objects::{Sku, TenantId};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Why stock moves; drives the product's sales counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockReason { Sale, Return, Adjustment }

#[derive(Clone, Debug, PartialEq)]
pub struct StockChange { pub product_id: Uuid, pub sku: Sku, pub delta: i64, pub reason: StockReason }

impl StockChange {
    /// The change that undoes this one.
    pub fn reversed(&self) -> Self {
        let reason = match self.reason { StockReason::Sale => StockReason::Return, StockReason::Return => StockReason::Sale, r => r };
        Self { product_id: self.product_id, sku: self.sku.clone(), delta: -self.delta, reason }
    }

    /// Read-modify-write step shared by every backend.
    pub fn apply_to(&self, product: &mut Product) -> Result<StockTransition> {
        let transition = product.adjust_variant_stock(&self.sku, self.delta)?;
        let qty = u32::try_from(self.delta.unsigned_abs()).unwrap_or(u32::MAX);
        match self.reason {
            StockReason::Sale => product.record_sale(qty),
            StockReason::Return => product.reverse_sale(qty),
            StockReason::Adjustment => {}
        }
        Ok(transition)
    }
}

/// Edit applied to a product while the backend holds it locked.
pub type ProductUpdate = Box<dyn FnOnce(&mut Product) -> Result<()> + Send>;

#[derive(Clone, Debug, Default)]
pub struct ProductFilter {
    pub category_ids: Option<Vec<Uuid>>,
    pub visible_only: bool,
    pub approval: Option<ApprovalStatus>,
    pub active: Option<bool>,
    pub featured: Option<bool>,
}

impl ProductFilter {
    pub fn storefront() -> Self { Self { visible_only: true, ..Self::default() } }

    pub fn matches(&self, p: &Product) -> bool {
        if self.visible_only && !p.is_visible() { return false; }
        if let Some(ids) = &self.category_ids {
            if !p.category_id().is_some_and(|c| ids.contains(&c)) { return false; }
        }
        self.approval.map_or(true, |a| p.approval().status == a)
            && self.active.map_or(true, |a| p.is_active() == a)
            && self.featured.map_or(true, |f| p.is_featured() == f)
    }
}

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub email: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, o: &Order) -> bool {
        self.status.map_or(true, |s| o.status() == s)
            && self.email.as_deref().map_or(true, |e| o.email().eq_ignore_ascii_case(e))
    }
}

/// One-based page request, clamped to 1..=100 items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page { pub page: u32, pub per_page: u32 }

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), per_page: per_page.unwrap_or(20).clamp(1, 100) }
    }
    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }
    pub fn limit(&self) -> u64 { u64::from(self.per_page) }

    /// The slice of `items` this page covers.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset() as usize).take(self.per_page as usize).collect()
    }
}

impl Default for Page { fn default() -> Self { Self::new(None, None) } }

#[derive(Debug, Serialize)]
pub struct Paginated<T> { pub data: Vec<T>, pub total: u64, pub page: u32, pub per_page: u32 }

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, page: Page) -> Self { Self { data, total, page: page.page, per_page: page.per_page } }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    fn backend(&self) -> &'static str;

    async fn insert_product(&self, product: &Product) -> Result<()>;
    async fn get_product(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Product>>;
    async fn get_product_by_slug(&self, tenant: &TenantId, slug: &str) -> Result<Option<Product>>;
    /// Loads, edits and writes one product with no stock change slipping in
    /// between. The returned product still carries the events the edit raised.
    async fn update_product(&self, tenant: &TenantId, id: Uuid, update: ProductUpdate) -> Result<Product>;
    async fn delete_product(&self, tenant: &TenantId, id: Uuid) -> Result<bool>;
    /// Newest first.
    async fn list_products(&self, tenant: &TenantId, filter: &ProductFilter, page: Page) -> Result<Paginated<Product>>;
    async fn find_products(&self, tenant: &TenantId, filter: &ProductFilter) -> Result<Vec<Product>>;
    async fn product_slug_exists(&self, tenant: &TenantId, slug: &str) -> Result<bool>;

    /// Applies every change or none of them. Backends that cannot guarantee
    /// this return [`CommerceError::TransactionsUnsupported`](crate::CommerceError::TransactionsUnsupported)
    /// without touching any product.
    async fn apply_stock_changes(&self, tenant: &TenantId, changes: &[StockChange]) -> Result<Vec<StockTransition>>;

    async fn insert_category(&self, category: &Category) -> Result<()>;
    async fn get_category(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Category>>;
    async fn list_categories(&self, tenant: &TenantId) -> Result<Vec<Category>>;
    async fn save_category(&self, category: &Category) -> Result<()>;
    async fn delete_category(&self, tenant: &TenantId, id: Uuid) -> Result<bool>;
    async fn category_slug_exists(&self, tenant: &TenantId, slug: &str) -> Result<bool>;

    async fn get_cart(&self, tenant: &TenantId, session_id: &str) -> Result<Option<Cart>>;
    async fn save_cart(&self, cart: &Cart) -> Result<()>;
    async fn delete_cart(&self, tenant: &TenantId, session_id: &str) -> Result<()>;

    async fn insert_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Order>>;
    /// Writes the order only while the stored copy is still at
    /// `expected_version`; otherwise `Conflict`.
    async fn save_order(&self, order: &Order, expected_version: u64) -> Result<()>;
    /// Newest first.
    async fn list_orders(&self, tenant: &TenantId, filter: &OrderFilter, page: Page) -> Result<Paginated<Order>>;
    /// Orders created in `[from, to)`.
    async fn orders_between(&self, tenant: &TenantId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamps() {
        assert_eq!(Page::new(Some(0), Some(500)), Page { page: 1, per_page: 100 });
        let p = Page::new(Some(3), Some(10));
        assert_eq!(p.offset(), 20);
        assert_eq!(p.slice((0..25).collect()), vec![20, 21, 22, 23, 24]);
    }

    #[test]
    fn test_reversed_change_flips_sale() {
        let c = StockChange { product_id: Uuid::nil(), sku: Sku::new("A").unwrap(), delta: -2, reason: StockReason::Sale };
        let r = c.reversed();
        assert_eq!((r.delta, r.reason), (2, StockReason::Return));
    }
}
