//! Postgres [`Store`] backed by `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, PgConnection, PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::{OrderFilter, Page, Paginated, ProductFilter, ProductUpdate, StockChange, Store};
use crate::domain::aggregates::{Cart, Category, Order, Product, StockTransition};
use crate::domain::value_objects::TenantId;
use crate::error::{CommerceError, Result};

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Connects and brings the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| CommerceError::Storage(e.to_string()))?;
        info!("Database migrations applied");
        Ok(Self { pool })
    }
}

fn version_column(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| CommerceError::Storage(format!("order version {version} out of range")))
}

async fn write_product<'e>(exec: impl PgExecutor<'e>, p: &Product) -> Result<u64> {
    let done = sqlx::query(
        "UPDATE products SET slug = $3, category_id = $4, is_active = $5, is_featured = $6, approval_status = $7, doc = $8, updated_at = $9 \
         WHERE tenant_id = $1 AND id = $2",
    )
    .bind(p.tenant_id().as_str()).bind(p.id()).bind(p.slug().as_str()).bind(p.category_id()).bind(p.is_active())
    .bind(p.is_featured()).bind(p.approval().status.as_str()).bind(Json(p)).bind(p.updated_at())
    .execute(exec).await?;
    Ok(done.rows_affected())
}

/// Row-locks one product until the surrounding transaction ends.
async fn lock_product(conn: &mut PgConnection, tenant: &TenantId, id: Uuid) -> Result<Product> {
    let Json(product) = sqlx::query_scalar::<_, Json<Product>>("SELECT doc FROM products WHERE tenant_id = $1 AND id = $2 FOR UPDATE")
        .bind(tenant.as_str()).bind(id)
        .fetch_optional(conn).await?
        .ok_or(CommerceError::NotFound("Product"))?;
    Ok(product)
}

fn push_product_filter(qb: &mut QueryBuilder<'_, Postgres>, tenant: &TenantId, filter: &ProductFilter) {
    qb.push(" WHERE tenant_id = ").push_bind(tenant.as_str().to_string());
    if filter.visible_only {
        qb.push(" AND is_active AND approval_status = 'approved'");
    }
    if let Some(ids) = &filter.category_ids {
        qb.push(" AND category_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(approval) = filter.approval {
        qb.push(" AND approval_status = ").push_bind(approval.as_str());
    }
    if let Some(active) = filter.active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(featured) = filter.featured {
        qb.push(" AND is_featured = ").push_bind(featured);
    }
}

fn push_order_filter(qb: &mut QueryBuilder<'_, Postgres>, tenant: &TenantId, filter: &OrderFilter) {
    qb.push(" WHERE tenant_id = ").push_bind(tenant.as_str().to_string());
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(email) = &filter.email {
        qb.push(" AND email = ").push_bind(email.trim().to_lowercase());
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str { "postgres" }

    async fn insert_product(&self, p: &Product) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, tenant_id, slug, category_id, is_active, is_featured, approval_status, doc, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(p.id()).bind(p.tenant_id().as_str()).bind(p.slug().as_str()).bind(p.category_id()).bind(p.is_active())
        .bind(p.is_featured()).bind(p.approval().status.as_str()).bind(Json(p)).bind(p.created_at()).bind(p.updated_at())
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_product(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Product>> {
        let doc = sqlx::query_scalar::<_, Json<Product>>("SELECT doc FROM products WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str()).bind(id).fetch_optional(&self.pool).await?;
        Ok(doc.map(|d| d.0))
    }

    async fn get_product_by_slug(&self, tenant: &TenantId, slug: &str) -> Result<Option<Product>> {
        let doc = sqlx::query_scalar::<_, Json<Product>>("SELECT doc FROM products WHERE tenant_id = $1 AND slug = $2")
            .bind(tenant.as_str()).bind(slug).fetch_optional(&self.pool).await?;
        Ok(doc.map(|d| d.0))
    }

    async fn update_product(&self, tenant: &TenantId, id: Uuid, update: ProductUpdate) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        let mut product = lock_product(&mut *tx, tenant, id).await?;
        update(&mut product)?;
        write_product(&mut *tx, &product).await?;
        tx.commit().await?;
        Ok(product)
    }

    async fn delete_product(&self, tenant: &TenantId, id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM products WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str()).bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_products(&self, tenant: &TenantId, filter: &ProductFilter, page: Page) -> Result<Paginated<Product>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM products");
        push_product_filter(&mut qb, tenant, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(page.limit() as i64).push(" OFFSET ").push_bind(page.offset() as i64);
        let docs = qb.build_query_scalar::<Json<Product>>().fetch_all(&self.pool).await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products");
        push_product_filter(&mut count, tenant, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(Paginated::new(docs.into_iter().map(|d| d.0).collect(), total.max(0) as u64, page))
    }

    async fn find_products(&self, tenant: &TenantId, filter: &ProductFilter) -> Result<Vec<Product>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM products");
        push_product_filter(&mut qb, tenant, filter);
        qb.push(" ORDER BY created_at DESC");
        let docs = qb.build_query_scalar::<Json<Product>>().fetch_all(&self.pool).await?;
        Ok(docs.into_iter().map(|d| d.0).collect())
    }

    async fn product_slug_exists(&self, tenant: &TenantId, slug: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE tenant_id = $1 AND slug = $2)")
            .bind(tenant.as_str()).bind(slug).fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn apply_stock_changes(&self, tenant: &TenantId, changes: &[StockChange]) -> Result<Vec<StockTransition>> {
        let mut tx = self.pool.begin().await?;
        let mut transitions = Vec::with_capacity(changes.len());
        for change in changes {
            let mut product = lock_product(&mut *tx, tenant, change.product_id).await?;
            transitions.push(change.apply_to(&mut product)?);
            write_product(&mut *tx, &product).await?;
        }
        // Dropping `tx` on an early return rolls everything back.
        tx.commit().await?;
        Ok(transitions)
    }

    async fn insert_category(&self, c: &Category) -> Result<()> {
        sqlx::query(
            "INSERT INTO categories (id, tenant_id, parent_id, slug, level, doc, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(c.id).bind(c.tenant_id.as_str()).bind(c.parent_id).bind(c.slug.as_str()).bind(u8::from(c.level) as i16)
        .bind(Json(c)).bind(c.created_at).bind(c.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_category(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Category>> {
        let doc = sqlx::query_scalar::<_, Json<Category>>("SELECT doc FROM categories WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str()).bind(id).fetch_optional(&self.pool).await?;
        Ok(doc.map(|d| d.0))
    }

    async fn list_categories(&self, tenant: &TenantId) -> Result<Vec<Category>> {
        let docs = sqlx::query_scalar::<_, Json<Category>>("SELECT doc FROM categories WHERE tenant_id = $1 ORDER BY level, slug")
            .bind(tenant.as_str()).fetch_all(&self.pool).await?;
        Ok(docs.into_iter().map(|d| d.0).collect())
    }

    async fn save_category(&self, c: &Category) -> Result<()> {
        let done = sqlx::query("UPDATE categories SET parent_id = $3, slug = $4, level = $5, doc = $6, updated_at = $7 WHERE tenant_id = $1 AND id = $2")
            .bind(c.tenant_id.as_str()).bind(c.id).bind(c.parent_id).bind(c.slug.as_str()).bind(u8::from(c.level) as i16)
            .bind(Json(c)).bind(c.updated_at)
            .execute(&self.pool).await?;
        if done.rows_affected() == 0 { return Err(CommerceError::NotFound("Category")); }
        Ok(())
    }

    async fn delete_category(&self, tenant: &TenantId, id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM categories WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str()).bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn category_slug_exists(&self, tenant: &TenantId, slug: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE tenant_id = $1 AND slug = $2)")
            .bind(tenant.as_str()).bind(slug).fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn get_cart(&self, tenant: &TenantId, session_id: &str) -> Result<Option<Cart>> {
        let doc = sqlx::query_scalar::<_, Json<Cart>>("SELECT doc FROM carts WHERE tenant_id = $1 AND session_id = $2")
            .bind(tenant.as_str()).bind(session_id).fetch_optional(&self.pool).await?;
        Ok(doc.map(|d| d.0))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        sqlx::query(
            "INSERT INTO carts (tenant_id, session_id, doc, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (tenant_id, session_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at",
        )
        .bind(cart.tenant_id().as_str()).bind(cart.session_id()).bind(Json(cart)).bind(cart.updated_at())
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_cart(&self, tenant: &TenantId, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM carts WHERE tenant_id = $1 AND session_id = $2")
            .bind(tenant.as_str()).bind(session_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_order(&self, o: &Order) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders (id, tenant_id, order_number, email, status, payment_status, version, doc, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(o.id()).bind(o.tenant_id().as_str()).bind(o.order_number()).bind(o.email()).bind(o.status().as_str())
        .bind(o.payment_status().as_str()).bind(version_column(o.version())?).bind(Json(o)).bind(o.created_at()).bind(o.updated_at())
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_order(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Order>> {
        let doc = sqlx::query_scalar::<_, Json<Order>>("SELECT doc FROM orders WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str()).bind(id).fetch_optional(&self.pool).await?;
        Ok(doc.map(|d| d.0))
    }

    async fn save_order(&self, o: &Order, expected_version: u64) -> Result<()> {
        let done = sqlx::query(
            "UPDATE orders SET status = $3, payment_status = $4, doc = $5, updated_at = $6, version = $7 \
             WHERE tenant_id = $1 AND id = $2 AND version = $8",
        )
        .bind(o.tenant_id().as_str()).bind(o.id()).bind(o.status().as_str()).bind(o.payment_status().as_str())
        .bind(Json(o)).bind(o.updated_at()).bind(version_column(o.version())?).bind(version_column(expected_version)?)
        .execute(&self.pool).await?;
        if done.rows_affected() > 0 { return Ok(()); }
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE tenant_id = $1 AND id = $2)")
            .bind(o.tenant_id().as_str()).bind(o.id()).fetch_one(&self.pool).await?;
        if exists { Err(CommerceError::Conflict("order was changed by another request".into())) } else { Err(CommerceError::NotFound("Order")) }
    }

    async fn list_orders(&self, tenant: &TenantId, filter: &OrderFilter, page: Page) -> Result<Paginated<Order>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM orders");
        push_order_filter(&mut qb, tenant, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(page.limit() as i64).push(" OFFSET ").push_bind(page.offset() as i64);
        let docs = qb.build_query_scalar::<Json<Order>>().fetch_all(&self.pool).await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
        push_order_filter(&mut count, tenant, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(Paginated::new(docs.into_iter().map(|d| d.0).collect(), total.max(0) as u64, page))
    }

    async fn orders_between(&self, tenant: &TenantId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
        let docs = sqlx::query_scalar::<_, Json<Order>>(
            "SELECT doc FROM orders WHERE tenant_id = $1 AND created_at >= $2 AND created_at < $3 ORDER BY created_at",
        )
        .bind(tenant.as_str()).bind(from).bind(to)
        .fetch_all(&self.pool).await?;
        Ok(docs.into_iter().map(|d| d.0).collect())
    }
}
