//! Stock keeping.
//!
//! Multi-line changes are handed to the store as one atomic batch. When the
//! backend cannot run transactions the batch is replayed line by line, and
//! lines already written are compensated if a later one fails.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Activation, LineItem, Product, StockTransition};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::{Sku, TenantId};
use crate::error::{CommerceError, Result};
use crate::services::events::EventPublisher;
use crate::store::{ProductFilter, ProductUpdate, StockChange, StockReason, Store};

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowStockVariant { pub sku: Sku, pub color: Option<String>, pub size: Option<String>, pub stock: u32 }

#[derive(Debug, Clone, Serialize)]
pub struct LowStockProduct { pub product_id: Uuid, pub name: String, pub is_active: bool, pub total_stock: u32, pub variants: Vec<LowStockVariant> }

impl InventoryService {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self { Self { store, events } }

    /// Takes the ordered quantities out of stock.
    pub async fn reserve_for_order(&self, tenant: &TenantId, lines: &[LineItem]) -> Result<Vec<StockTransition>> {
        let changes = lines_to_changes(lines, -1, StockReason::Sale);
        self.apply(tenant, &changes).await
    }

    /// Puts the quantities of a cancelled or returned order back.
    pub async fn restock_for_order(&self, tenant: &TenantId, lines: &[LineItem]) -> Result<Vec<StockTransition>> {
        let changes = lines_to_changes(lines, 1, StockReason::Return);
        self.apply(tenant, &changes).await
    }

    /// Manual correction of a single variant.
    pub async fn adjust(&self, tenant: &TenantId, product_id: Uuid, sku: Sku, delta: i64, reason: Option<&str>) -> Result<StockTransition> {
        if delta == 0 { return Err(CommerceError::InvalidInput("delta must not be zero".into())); }
        let change = StockChange { product_id, sku, delta, reason: StockReason::Adjustment };
        let transition = self.apply(tenant, std::slice::from_ref(&change)).await?.pop()
            .ok_or(CommerceError::Storage("stock adjustment produced no result".into()))?;
        info!(%tenant, %product_id, sku = %transition.sku, delta, stock = transition.current, reason = reason.unwrap_or("-"), "stock adjusted");
        Ok(transition)
    }

    /// Products with at least one variant at or below `threshold`, lowest stock first.
    pub async fn low_stock(&self, tenant: &TenantId, threshold: u32) -> Result<Vec<LowStockProduct>> {
        let products = self.store.find_products(tenant, &ProductFilter::default()).await?;
        let mut report: Vec<LowStockProduct> = products.iter().filter_map(|p| {
            let variants: Vec<LowStockVariant> = p.variants().iter().filter(|v| v.stock <= threshold)
                .map(|v| LowStockVariant { sku: v.sku.clone(), color: v.color.clone(), size: v.size.clone(), stock: v.stock })
                .collect();
            (!variants.is_empty()).then(|| LowStockProduct {
                product_id: p.id(), name: p.name().to_string(), is_active: p.is_active(), total_stock: p.total_stock(), variants,
            })
        }).collect();
        report.sort_by(|a, b| a.total_stock.cmp(&b.total_stock).then_with(|| a.name.cmp(&b.name)));
        Ok(report)
    }

    async fn apply(&self, tenant: &TenantId, changes: &[StockChange]) -> Result<Vec<StockTransition>> {
        if changes.is_empty() { return Ok(vec![]); }
        let transitions = match self.store.apply_stock_changes(tenant, changes).await {
            Err(CommerceError::TransactionsUnsupported) => {
                warn!(backend = self.store.backend(), "transactions unsupported, applying stock changes one by one");
                self.apply_sequentially(tenant, changes).await?
            }
            other => other?,
        };
        self.announce(tenant, &transitions).await;
        Ok(transitions)
    }

    async fn apply_sequentially(&self, tenant: &TenantId, changes: &[StockChange]) -> Result<Vec<StockTransition>> {
        let mut applied: Vec<&StockChange> = vec![];
        let mut transitions = vec![];
        for change in changes {
            match self.apply_one(tenant, change).await {
                Ok(t) => { applied.push(change); transitions.push(t); }
                Err(e) => {
                    self.compensate(tenant, &applied).await;
                    return Err(e);
                }
            }
        }
        Ok(transitions)
    }

    /// One change as a locked single-product update. Events raised on the
    /// product are dropped; `announce` publishes from the transitions instead.
    async fn apply_one(&self, tenant: &TenantId, change: &StockChange) -> Result<StockTransition> {
        let (tx, rx) = oneshot::channel();
        let step = change.clone();
        let update: ProductUpdate = Box::new(move |p: &mut Product| -> Result<()> {
            let _ = tx.send(step.apply_to(p)?);
            Ok(())
        });
        let mut product = self.store.update_product(tenant, change.product_id, update).await?;
        product.take_events();
        rx.await.map_err(|_| CommerceError::Storage("stock update finished without a transition".into()))
    }

    async fn compensate(&self, tenant: &TenantId, applied: &[&StockChange]) {
        for change in applied.iter().rev() {
            let reverse = change.reversed();
            if let Err(e) = self.apply_one(tenant, &reverse).await {
                error!(error = %e, product_id = %change.product_id, sku = %change.sku, "failed to roll back stock change");
            }
        }
    }

    async fn announce(&self, tenant: &TenantId, transitions: &[StockTransition]) {
        self.events.publish(tenant, stock_events(transitions)).await;
    }
}

fn stock_events(transitions: &[StockTransition]) -> Vec<DomainEvent> {
    let mut events = vec![];
    for t in transitions {
        match t.activation {
            Activation::Deactivated => {
                info!(product_id = %t.product_id, "product out of stock, deactivated");
                events.push(DomainEvent::Product(ProductEvent::OutOfStock { product_id: t.product_id }));
            }
            Activation::Reactivated => {
                info!(product_id = %t.product_id, "product back in stock, reactivated");
                events.push(DomainEvent::Product(ProductEvent::BackInStock { product_id: t.product_id, total_stock: t.total_stock }));
            }
            Activation::Unchanged => {}
        }
    }
    events
}

fn lines_to_changes(lines: &[LineItem], sign: i64, reason: StockReason) -> Vec<StockChange> {
    lines.iter().map(|l| StockChange { product_id: l.product_id, sku: l.sku.clone(), delta: sign * i64::from(l.quantity), reason }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::tests::{details, variant};
    use crate::domain::aggregates::Product;
    use crate::domain::value_objects::{Money, Slug};
    use crate::store::MemoryStore;

    fn tenant() -> TenantId { TenantId::parse("acme").unwrap() }

    async fn seeded(store: Arc<dyn Store>, stock_a: u32, stock_b: u32) -> Product {
        let mut p = Product::create(tenant(), Slug::from_name("Tee").unwrap(), details("Tee", vec![variant("A", stock_a), variant("B", stock_b)])).unwrap();
        p.approve().unwrap();
        store.insert_product(&p).await.unwrap();
        p
    }

    fn line(p: &Product, sku: &str, qty: u32) -> LineItem {
        LineItem { product_id: p.id(), sku: Sku::new(sku).unwrap(), name: p.name().into(), category_id: None, quantity: qty, unit_price: Money::default(), total: Money::default() }
    }

    fn service(store: Arc<dyn Store>) -> InventoryService { InventoryService::new(store, EventPublisher::disabled()) }

    #[tokio::test]
    async fn test_reserve_and_restock() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let p = seeded(store.clone(), 2, 1).await;
        let inv = service(store.clone());

        let out = inv.reserve_for_order(&tenant(), &[line(&p, "A", 2), line(&p, "B", 1)]).await.unwrap();
        assert_eq!(out.last().unwrap().activation, Activation::Deactivated);
        let stored = store.get_product(&tenant(), p.id()).await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert_eq!(stored.sales_count(), 3);

        let out = inv.restock_for_order(&tenant(), &[line(&p, "A", 1)]).await.unwrap();
        assert_eq!(out[0].activation, Activation::Reactivated);
        let stored = store.get_product(&tenant(), p.id()).await.unwrap().unwrap();
        assert!(stored.is_visible());
        assert_eq!(stored.sales_count(), 2);
    }

    #[tokio::test]
    async fn test_fallback_applies_without_transactions() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::without_transactions());
        let p = seeded(store.clone(), 5, 5).await;
        service(store.clone()).reserve_for_order(&tenant(), &[line(&p, "A", 2), line(&p, "B", 3)]).await.unwrap();
        let stored = store.get_product(&tenant(), p.id()).await.unwrap().unwrap();
        assert_eq!(stored.total_stock(), 5);
    }

    #[tokio::test]
    async fn test_fallback_compensates_on_failure() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::without_transactions());
        let p = seeded(store.clone(), 5, 1).await;
        let err = service(store.clone()).reserve_for_order(&tenant(), &[line(&p, "A", 2), line(&p, "B", 3)]).await.unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientStock { .. }));
        let stored = store.get_product(&tenant(), p.id()).await.unwrap().unwrap();
        assert_eq!(stored.variant(&Sku::new("A").unwrap()).unwrap().stock, 5);
        assert_eq!(stored.sales_count(), 0);
    }

    #[tokio::test]
    async fn test_adjust_and_low_stock() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let p = seeded(store.clone(), 10, 2).await;
        let inv = service(store.clone());
        assert!(inv.adjust(&tenant(), p.id(), Sku::new("A").unwrap(), 0, None).await.is_err());
        let t = inv.adjust(&tenant(), p.id(), Sku::new("A").unwrap(), -7, Some("recount")).await.unwrap();
        assert_eq!(t.current, 3);

        let report = inv.low_stock(&tenant(), 3).await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].variants.len(), 2);
        assert!(inv.low_stock(&tenant(), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_back_in_stock_reports_product_total() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let p = seeded(store.clone(), 0, 4).await;
        let inv = service(store.clone());
        inv.reserve_for_order(&tenant(), &[line(&p, "B", 4)]).await.unwrap();
        let out = inv.restock_for_order(&tenant(), &[line(&p, "B", 1), line(&p, "A", 2)]).await.unwrap();
        assert_eq!((out[0].current, out[0].total_stock), (1, 1));
        assert_eq!((out[1].current, out[1].total_stock), (2, 3));
        let events = stock_events(&out);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DomainEvent::Product(ProductEvent::BackInStock { total_stock: 1, .. })));
    }

    #[tokio::test]
    async fn test_fallback_drains_product_events() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::without_transactions());
        let p = seeded(store.clone(), 1, 0).await;
        service(store.clone()).reserve_for_order(&tenant(), &[line(&p, "A", 1)]).await.unwrap();
        let mut stored = store.get_product(&tenant(), p.id()).await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert!(stored.take_events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_variant_is_not_found() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let p = seeded(store.clone(), 1, 1).await;
        let err = service(store).adjust(&tenant(), p.id(), Sku::new("Z").unwrap(), 1, None).await.unwrap_err();
        assert!(matches!(err, CommerceError::NotFound("Variant")));
    }
}
