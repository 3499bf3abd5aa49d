//! Shopping cart operations.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartItem, Product};
use crate::domain::value_objects::{Money, Sku, TenantId};
use crate::error::{CommerceError, Result};
use crate::store::Store;

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
    currency: String,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>, currency: impl Into<String>) -> Self { Self { store, currency: currency.into() } }

    /// The session's cart, or an empty one when none has been saved yet.
    pub async fn get(&self, tenant: &TenantId, session: &str) -> Result<Cart> {
        Ok(self.store.get_cart(tenant, session).await?.unwrap_or_else(|| Cart::new(tenant.clone(), session, &self.currency)))
    }

    pub async fn add_item(&self, tenant: &TenantId, session: &str, product_id: Uuid, sku: Sku, quantity: u32) -> Result<Cart> {
        let product = self.purchasable(tenant, product_id).await?;
        let mut cart = self.get(tenant, session).await?;
        let wanted = cart.quantity_of(product_id, &sku).saturating_add(quantity);
        let unit_price = ensure_stock(&product, &sku, wanted)?;
        cart.add_item(CartItem { product_id, sku, name: product.name().to_string(), quantity, unit_price })?;
        self.store.save_cart(&cart).await?;
        debug!(%tenant, session, %product_id, "cart item added");
        Ok(cart)
    }

    pub async fn update_item(&self, tenant: &TenantId, session: &str, product_id: Uuid, sku: Sku, quantity: u32) -> Result<Cart> {
        let mut cart = self.get(tenant, session).await?;
        if quantity > 0 {
            let product = self.purchasable(tenant, product_id).await?;
            ensure_stock(&product, &sku, quantity)?;
        }
        cart.update_quantity(product_id, &sku, quantity)?;
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn remove_item(&self, tenant: &TenantId, session: &str, product_id: Uuid, sku: Sku) -> Result<Cart> {
        let mut cart = self.get(tenant, session).await?;
        cart.remove_item(product_id, &sku)?;
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn clear(&self, tenant: &TenantId, session: &str) -> Result<()> {
        self.store.delete_cart(tenant, session).await
    }

    async fn purchasable(&self, tenant: &TenantId, product_id: Uuid) -> Result<Product> {
        self.store.get_product(tenant, product_id).await?.filter(Product::is_visible).ok_or(CommerceError::NotFound("Product"))
    }
}

/// Checks the variant can cover `wanted` units and returns its unit price.
pub(crate) fn ensure_stock(product: &Product, sku: &Sku, wanted: u32) -> Result<Money> {
    let variant = product.variant(sku).ok_or(CommerceError::NotFound("Variant"))?;
    if variant.stock < wanted {
        return Err(CommerceError::InsufficientStock { sku: sku.to_string(), requested: u64::from(wanted), available: variant.stock });
    }
    Ok(product.price_of(variant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::tests::{details, variant};
    use crate::domain::value_objects::Slug;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    fn tenant() -> TenantId { TenantId::parse("acme").unwrap() }

    async fn setup(approved: bool) -> (CartService, Product) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut p = Product::create(tenant(), Slug::from_name("Tee").unwrap(), details("Tee", vec![variant("A", 3)])).unwrap();
        if approved { p.approve().unwrap(); }
        store.insert_product(&p).await.unwrap();
        (CartService::new(store, "USD"), p)
    }

    #[tokio::test]
    async fn test_add_and_merge_respects_stock() {
        let (carts, p) = setup(true).await;
        let sku = Sku::new("A").unwrap();
        let cart = carts.add_item(&tenant(), "s1", p.id(), sku.clone(), 2).await.unwrap();
        assert_eq!(cart.subtotal().amount(), Decimal::new(5000, 2));
        let err = carts.add_item(&tenant(), "s1", p.id(), sku.clone(), 2).await.unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientStock { requested: 4, available: 3, .. }));
        let cart = carts.update_item(&tenant(), "s1", p.id(), sku.clone(), 3).await.unwrap();
        assert_eq!(cart.items()[0].quantity, 3);
        let cart = carts.remove_item(&tenant(), "s1", p.id(), sku).await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_unapproved_products_cannot_be_added() {
        let (carts, p) = setup(false).await;
        let err = carts.add_item(&tenant(), "s1", p.id(), Sku::new("A").unwrap(), 1).await.unwrap_err();
        assert!(matches!(err, CommerceError::NotFound("Product")));
    }
}
