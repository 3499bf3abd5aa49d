//! In-memory [`Store`] used by tests and `STORAGE=memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderFilter, Page, Paginated, ProductFilter, ProductUpdate, StockChange, Store};
use crate::domain::aggregates::{Cart, Category, Order, Product, StockTransition};
use crate::domain::value_objects::TenantId;
use crate::error::{CommerceError, Result};

#[derive(Default)]
struct Tables {
    products: HashMap<Uuid, Product>,
    categories: HashMap<Uuid, Category>,
    carts: HashMap<(TenantId, String), Cart>,
    orders: HashMap<Uuid, Order>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    transactions: bool,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

impl MemoryStore {
    pub fn new() -> Self { Self { tables: RwLock::new(Tables::default()), transactions: true } }

    /// A store that rejects atomic batches, like a standalone document
    /// database without replica set support.
    pub fn without_transactions() -> Self { Self { transactions: false, ..Self::new() } }
}

/// Events belong to the caller that raised them, never to the stored copy.
fn stored_product(product: &Product) -> Product {
    let mut copy = product.clone();
    copy.take_events();
    copy
}

fn stored_order(order: &Order) -> Order {
    let mut copy = order.clone();
    copy.take_events();
    copy
}

fn newest_first<T>(items: &mut [T], created: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created(item)));
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str { "memory" }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.products.values().any(|p| p.tenant_id() == product.tenant_id() && p.slug() == product.slug()) {
            return Err(CommerceError::Conflict(format!("slug {} already in use", product.slug())));
        }
        t.products.insert(product.id(), stored_product(product));
        Ok(())
    }

    async fn get_product(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).filter(|p| p.tenant_id() == tenant).cloned())
    }

    async fn get_product_by_slug(&self, tenant: &TenantId, slug: &str) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.values().find(|p| p.tenant_id() == tenant && p.slug().as_str() == slug).cloned())
    }

    async fn update_product(&self, tenant: &TenantId, id: Uuid, update: ProductUpdate) -> Result<Product> {
        let mut t = self.tables.write().await;
        let mut product = t.products.get(&id).filter(|p| p.tenant_id() == tenant).cloned().ok_or(CommerceError::NotFound("Product"))?;
        update(&mut product)?;
        if t.products.values().any(|p| p.id() != id && p.tenant_id() == tenant && p.slug() == product.slug()) {
            return Err(CommerceError::Conflict(format!("slug {} already in use", product.slug())));
        }
        t.products.insert(id, stored_product(&product));
        Ok(product)
    }

    async fn delete_product(&self, tenant: &TenantId, id: Uuid) -> Result<bool> {
        let mut t = self.tables.write().await;
        if t.products.get(&id).is_some_and(|p| p.tenant_id() == tenant) {
            t.products.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_products(&self, tenant: &TenantId, filter: &ProductFilter, page: Page) -> Result<Paginated<Product>> {
        let all = self.find_products(tenant, filter).await?;
        let total = all.len() as u64;
        Ok(Paginated::new(page.slice(all), total, page))
    }

    async fn find_products(&self, tenant: &TenantId, filter: &ProductFilter) -> Result<Vec<Product>> {
        let t = self.tables.read().await;
        let mut found: Vec<Product> = t.products.values().filter(|p| p.tenant_id() == tenant && filter.matches(p)).cloned().collect();
        newest_first(&mut found, |p| p.created_at());
        Ok(found)
    }

    async fn product_slug_exists(&self, tenant: &TenantId, slug: &str) -> Result<bool> {
        Ok(self.get_product_by_slug(tenant, slug).await?.is_some())
    }

    async fn apply_stock_changes(&self, tenant: &TenantId, changes: &[StockChange]) -> Result<Vec<StockTransition>> {
        if !self.transactions { return Err(CommerceError::TransactionsUnsupported); }
        let mut t = self.tables.write().await;
        // Stage on copies so a failing line leaves every product untouched.
        let mut staged: HashMap<Uuid, Product> = HashMap::new();
        let mut transitions = Vec::with_capacity(changes.len());
        for change in changes {
            if !staged.contains_key(&change.product_id) {
                let product = t.products.get(&change.product_id).filter(|p| p.tenant_id() == tenant).ok_or(CommerceError::NotFound("Product"))?;
                staged.insert(change.product_id, product.clone());
            }
            let product = staged.get_mut(&change.product_id).ok_or(CommerceError::NotFound("Product"))?;
            transitions.push(change.apply_to(product)?);
        }
        for (id, mut product) in staged {
            product.take_events();
            t.products.insert(id, product);
        }
        Ok(transitions)
    }

    async fn insert_category(&self, category: &Category) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.categories.values().any(|c| c.tenant_id == category.tenant_id && c.slug == category.slug) {
            return Err(CommerceError::Conflict(format!("slug {} already in use", category.slug)));
        }
        t.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn get_category(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Category>> {
        Ok(self.tables.read().await.categories.get(&id).filter(|c| &c.tenant_id == tenant).cloned())
    }

    async fn list_categories(&self, tenant: &TenantId) -> Result<Vec<Category>> {
        let t = self.tables.read().await;
        let mut cats: Vec<Category> = t.categories.values().filter(|c| &c.tenant_id == tenant).cloned().collect();
        cats.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.sort_order.cmp(&b.sort_order)).then_with(|| a.name.cmp(&b.name)));
        Ok(cats)
    }

    async fn save_category(&self, category: &Category) -> Result<()> {
        let mut t = self.tables.write().await;
        match t.categories.get_mut(&category.id) {
            Some(existing) if existing.tenant_id == category.tenant_id => { *existing = category.clone(); Ok(()) }
            _ => Err(CommerceError::NotFound("Category")),
        }
    }

    async fn delete_category(&self, tenant: &TenantId, id: Uuid) -> Result<bool> {
        let mut t = self.tables.write().await;
        if t.categories.get(&id).is_some_and(|c| &c.tenant_id == tenant) {
            t.categories.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn category_slug_exists(&self, tenant: &TenantId, slug: &str) -> Result<bool> {
        Ok(self.tables.read().await.categories.values().any(|c| &c.tenant_id == tenant && c.slug.as_str() == slug))
    }

    async fn get_cart(&self, tenant: &TenantId, session_id: &str) -> Result<Option<Cart>> {
        Ok(self.tables.read().await.carts.get(&(tenant.clone(), session_id.to_string())).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        let key = (cart.tenant_id().clone(), cart.session_id().to_string());
        self.tables.write().await.carts.insert(key, cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, tenant: &TenantId, session_id: &str) -> Result<()> {
        self.tables.write().await.carts.remove(&(tenant.clone(), session_id.to_string()));
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.orders.values().any(|o| o.tenant_id() == order.tenant_id() && o.order_number() == order.order_number()) {
            return Err(CommerceError::Conflict(format!("order number {} already in use", order.order_number())));
        }
        t.orders.insert(order.id(), stored_order(order));
        Ok(())
    }

    async fn get_order(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).filter(|o| o.tenant_id() == tenant).cloned())
    }

    async fn save_order(&self, order: &Order, expected_version: u64) -> Result<()> {
        let mut t = self.tables.write().await;
        match t.orders.get_mut(&order.id()) {
            Some(existing) if existing.tenant_id() == order.tenant_id() => {
                if existing.version() != expected_version {
                    return Err(CommerceError::Conflict("order was changed by another request".into()));
                }
                *existing = stored_order(order);
                Ok(())
            }
            _ => Err(CommerceError::NotFound("Order")),
        }
    }

    async fn list_orders(&self, tenant: &TenantId, filter: &OrderFilter, page: Page) -> Result<Paginated<Order>> {
        let t = self.tables.read().await;
        let mut found: Vec<Order> = t.orders.values().filter(|o| o.tenant_id() == tenant && filter.matches(o)).cloned().collect();
        newest_first(&mut found, |o| o.created_at());
        let total = found.len() as u64;
        Ok(Paginated::new(page.slice(found), total, page))
    }

    async fn orders_between(&self, tenant: &TenantId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
        let t = self.tables.read().await;
        let mut found: Vec<Order> = t.orders.values()
            .filter(|o| o.tenant_id() == tenant && o.created_at() >= from && o.created_at() < to)
            .cloned()
            .collect();
        found.sort_by_key(|o| o.created_at());
        Ok(found)
    }
}
