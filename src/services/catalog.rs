//! Products and categories: admin management and storefront reads.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{Category, CategoryError, CategoryLevel, CategoryNode, CategoryTree, Product, ProductDetails};
use crate::domain::value_objects::{Slug, TenantId};
use crate::error::{CommerceError, Result};
use crate::services::events::EventPublisher;
use crate::store::{Page, Paginated, ProductFilter, ProductUpdate, Store};

#[derive(Debug, Clone, Default)]
pub struct CategoryInput {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CategoryView {
    #[serde(flatten)]
    pub category: Category,
    pub breadcrumb: Vec<Category>,
    pub children: Vec<Category>,
}

/// Reviewer actions on a product's approval state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Review { Approve, Reject(String), RequestChanges(String), Resubmit }

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self { Self { store, events } }

    // ---- storefront ----

    /// Visible products, optionally limited to a category (id or slug, descendants included).
    pub async fn storefront_products(&self, tenant: &TenantId, category: Option<&str>, featured: Option<bool>, page: Page) -> Result<Paginated<Product>> {
        let mut filter = ProductFilter { featured, ..ProductFilter::storefront() };
        if let Some(key) = category {
            let tree = self.category_tree(tenant).await?;
            let root = tree.resolve(key).ok_or(CommerceError::NotFound("Category"))?;
            filter.category_ids = Some(tree.descendants_inclusive(root.id));
        }
        self.store.list_products(tenant, &filter, page).await
    }

    pub async fn storefront_product(&self, tenant: &TenantId, id: Uuid) -> Result<Product> {
        self.store.get_product(tenant, id).await?.filter(Product::is_visible).ok_or(CommerceError::NotFound("Product"))
    }

    pub async fn storefront_product_by_slug(&self, tenant: &TenantId, slug: &str) -> Result<Product> {
        self.store.get_product_by_slug(tenant, slug).await?.filter(Product::is_visible).ok_or(CommerceError::NotFound("Product"))
    }

    // ---- products ----

    pub async fn product(&self, tenant: &TenantId, id: Uuid) -> Result<Product> {
        self.store.get_product(tenant, id).await?.ok_or(CommerceError::NotFound("Product"))
    }

    pub async fn products(&self, tenant: &TenantId, filter: &ProductFilter, page: Page) -> Result<Paginated<Product>> {
        self.store.list_products(tenant, filter, page).await
    }

    /// New products start pending review.
    pub async fn create_product(&self, tenant: &TenantId, details: ProductDetails) -> Result<Product> {
        self.ensure_category(tenant, details.category_id).await?;
        let slug = self.free_product_slug(tenant, &details.name, None).await?;
        let mut product = Product::create(tenant.clone(), slug, details)?;
        self.store.insert_product(&product).await?;
        info!(%tenant, product_id = %product.id(), slug = %product.slug(), "product created");
        self.events.publish(tenant, product.take_events()).await;
        Ok(product)
    }

    /// Stock and sales counters come from the locked row, never from the
    /// copy read to pick a slug.
    pub async fn update_product(&self, tenant: &TenantId, id: Uuid, details: ProductDetails) -> Result<Product> {
        let current = self.product(tenant, id).await?;
        self.ensure_category(tenant, details.category_id).await?;
        let slug = if details.name.trim() != current.name() {
            Some(self.free_product_slug(tenant, &details.name, Some(current.slug())).await?)
        } else {
            None
        };
        let update: ProductUpdate = Box::new(move |p: &mut Product| -> Result<()> {
            if let Some(slug) = slug { p.rename_slug(slug); }
            Ok(p.revise(details)?)
        });
        let mut product = self.store.update_product(tenant, id, update).await?;
        self.events.publish(tenant, product.take_events()).await;
        Ok(product)
    }

    pub async fn delete_product(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        if !self.store.delete_product(tenant, id).await? { return Err(CommerceError::NotFound("Product")); }
        info!(%tenant, product_id = %id, "product deleted");
        Ok(())
    }

    pub async fn review_product(&self, tenant: &TenantId, id: Uuid, review: Review) -> Result<Product> {
        let update: ProductUpdate = Box::new(move |p: &mut Product| -> Result<()> {
            match &review {
                Review::Approve => p.approve()?,
                Review::Reject(reason) => p.reject(reason)?,
                Review::RequestChanges(notes) => p.request_changes(notes)?,
                Review::Resubmit => p.resubmit()?,
            }
            Ok(())
        });
        let mut product = self.store.update_product(tenant, id, update).await?;
        info!(%tenant, product_id = %id, approval = product.approval().status.as_str(), "product reviewed");
        self.events.publish(tenant, product.take_events()).await;
        Ok(product)
    }

    pub async fn set_product_active(&self, tenant: &TenantId, id: Uuid, active: bool) -> Result<Product> {
        let update: ProductUpdate = Box::new(move |p: &mut Product| -> Result<()> { p.set_active(active); Ok(()) });
        let mut product = self.store.update_product(tenant, id, update).await?;
        product.take_events();
        Ok(product)
    }

    async fn ensure_category(&self, tenant: &TenantId, id: Option<Uuid>) -> Result<()> {
        match id {
            Some(id) if self.store.get_category(tenant, id).await?.is_none() => {
                Err(CommerceError::InvalidInput(format!("category {id} does not exist")))
            }
            _ => Ok(()),
        }
    }

    /// `current` is the slug the product already owns, which it may keep.
    async fn free_product_slug(&self, tenant: &TenantId, name: &str, current: Option<&Slug>) -> Result<Slug> {
        let base = Slug::from_name(name).ok_or_else(|| CommerceError::InvalidInput("name must contain letters or digits".into()))?;
        let mut candidate = base.clone();
        let mut n = 1;
        while current != Some(&candidate) && self.store.product_slug_exists(tenant, candidate.as_str()).await? {
            n += 1;
            candidate = base.with_suffix(n);
        }
        Ok(candidate)
    }

    // ---- categories ----

    pub async fn category_tree(&self, tenant: &TenantId) -> Result<CategoryTree> {
        Ok(CategoryTree::new(self.store.list_categories(tenant).await?))
    }

    /// Active categories as a nested tree.
    pub async fn nested_categories(&self, tenant: &TenantId) -> Result<Vec<CategoryNode>> {
        let active = self.store.list_categories(tenant).await?.into_iter().filter(|c| c.is_active).collect();
        Ok(CategoryTree::new(active).nested())
    }

    pub async fn category_view(&self, tenant: &TenantId, key: &str) -> Result<CategoryView> {
        let tree = self.category_tree(tenant).await?;
        let category = tree.resolve(key).ok_or(CommerceError::NotFound("Category"))?;
        Ok(CategoryView {
            category: category.clone(),
            breadcrumb: tree.path(category.id).into_iter().cloned().collect(),
            children: tree.children(category.id).into_iter().cloned().collect(),
        })
    }

    pub async fn create_category(&self, tenant: &TenantId, input: CategoryInput) -> Result<Category> {
        let slug = self.free_category_slug(tenant, &input.name, None).await?;
        let mut category = match input.parent_id {
            None => Category::root(tenant.clone(), input.name.trim(), slug),
            Some(pid) => {
                let parent = self.store.get_category(tenant, pid).await?.ok_or(CommerceError::NotFound("Parent category"))?;
                Category::child_of(&parent, input.name.trim(), slug)?
            }
        };
        category.description = input.description;
        category.sort_order = input.sort_order.unwrap_or(0);
        category.is_active = input.is_active.unwrap_or(true);
        self.store.insert_category(&category).await?;
        info!(%tenant, category_id = %category.id, level = u8::from(category.level), "category created");
        Ok(category)
    }

    /// Updates a category. Moving it under another parent re-levels its whole
    /// subtree and fails when the subtree would exceed three levels.
    pub async fn update_category(&self, tenant: &TenantId, id: Uuid, input: CategoryInput) -> Result<Category> {
        let tree = self.category_tree(tenant).await?;
        let mut category = tree.get(id).cloned().ok_or(CommerceError::NotFound("Category"))?;
        let mut moved = vec![];

        if input.parent_id != category.parent_id {
            let base = match input.parent_id {
                None => 0,
                Some(pid) => {
                    if tree.is_within(pid, id) { return Err(CategoryError::CyclicParent.into()); }
                    u8::from(tree.get(pid).ok_or(CommerceError::NotFound("Parent category"))?.level)
                }
            };
            let own_depth = tree.path(id).len();
            for sub_id in tree.descendants_inclusive(id) {
                let Some(sub) = tree.get(sub_id) else { continue };
                let relative = tree.path(sub_id).len() - own_depth;
                let level = u8::try_from(usize::from(base) + 1 + relative).ok()
                    .and_then(|l| CategoryLevel::try_from(l).ok())
                    .ok_or(CategoryError::TooDeep)?;
                if sub_id == id {
                    category.level = level;
                } else if sub.level != level {
                    let mut sub = sub.clone();
                    sub.level = level;
                    sub.touch();
                    moved.push(sub);
                }
            }
            category.parent_id = input.parent_id;
        }

        if input.name.trim() != category.name {
            category.slug = self.free_category_slug(tenant, &input.name, Some(&category.slug)).await?;
            category.name = input.name.trim().to_string();
        }
        category.description = input.description;
        if let Some(order) = input.sort_order { category.sort_order = order; }
        if let Some(active) = input.is_active { category.is_active = active; }
        category.touch();

        self.store.save_category(&category).await?;
        for sub in &moved { self.store.save_category(sub).await?; }
        Ok(category)
    }

    /// Only leaf categories without products can be deleted.
    pub async fn delete_category(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        let tree = self.category_tree(tenant).await?;
        if tree.get(id).is_none() { return Err(CommerceError::NotFound("Category")); }
        if tree.has_children(id) { return Err(CategoryError::HasChildren.into()); }
        let filter = ProductFilter { category_ids: Some(vec![id]), ..ProductFilter::default() };
        let in_use = self.store.find_products(tenant, &filter).await?.len();
        if in_use > 0 {
            return Err(CommerceError::Conflict(format!("category is still assigned to {in_use} product(s)")));
        }
        self.store.delete_category(tenant, id).await?;
        info!(%tenant, category_id = %id, "category deleted");
        Ok(())
    }

    async fn free_category_slug(&self, tenant: &TenantId, name: &str, current: Option<&Slug>) -> Result<Slug> {
        let base = Slug::from_name(name).ok_or_else(|| CommerceError::InvalidInput("name must contain letters or digits".into()))?;
        let mut candidate = base.clone();
        let mut n = 1;
        while current != Some(&candidate) && self.store.category_slug_exists(tenant, candidate.as_str()).await? {
            n += 1;
            candidate = base.with_suffix(n);
        }
        Ok(candidate)
    }
}
