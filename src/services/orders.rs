//! Checkout and the order lifecycle.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::domain::aggregates::{
    generate_order_number, Address, LineItem, Order, OrderStatus, PaymentStatus, Product, RefundStatus,
};
use crate::domain::value_objects::{Money, TenantId};
use crate::error::{CommerceError, Result};
use crate::services::cart::ensure_stock;
use crate::services::events::EventPublisher;
use crate::services::inventory::InventoryService;
use crate::store::{OrderFilter, Page, Paginated, Store};

/// Attempts at drawing an unused order number.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub email: String,
    pub customer_name: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Charges { pub subtotal: Money, pub shipping: Money, pub tax: Money, pub total: Money }

/// Flat-rate shipping, waived at the free-shipping threshold, plus tax on the subtotal.
pub fn compute_charges(subtotal: &Money, pricing: &PricingConfig) -> Charges {
    let currency = subtotal.currency();
    let shipping = if subtotal.is_zero() || subtotal.amount() >= pricing.free_shipping_threshold {
        Money::zero(currency)
    } else {
        Money::new(pricing.shipping_flat_fee, currency)
    };
    let tax = subtotal.percent(pricing.tax_rate);
    let total = Money::new(subtotal.amount() + shipping.amount() + tax.amount(), currency);
    Charges { subtotal: subtotal.clone(), shipping, tax, total }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    inventory: InventoryService,
    events: EventPublisher,
    pricing: PricingConfig,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, inventory: InventoryService, events: EventPublisher, pricing: PricingConfig) -> Self {
        Self { store, inventory, events, pricing }
    }

    /// Turns the session's cart into a pending order, taking its items out of stock.
    pub async fn checkout(&self, tenant: &TenantId, session: &str, req: CheckoutRequest) -> Result<Order> {
        let cart = self.store.get_cart(tenant, session).await?.filter(|c| !c.is_empty())
            .ok_or_else(|| CommerceError::InvalidInput("Cart is empty".into()))?;

        let mut lines = Vec::with_capacity(cart.item_count());
        for item in cart.items() {
            let product = self.store.get_product(tenant, item.product_id).await?.filter(Product::is_visible)
                .ok_or_else(|| CommerceError::Conflict(format!("{} is no longer available", item.name)))?;
            let unit_price = ensure_stock(&product, &item.sku, item.quantity)?;
            lines.push(LineItem {
                product_id: product.id(), sku: item.sku.clone(), name: product.name().to_string(), category_id: product.category_id(),
                quantity: item.quantity, total: unit_price.multiply(item.quantity), unit_price,
            });
        }

        let mut order = Order::create(tenant.clone(), generate_order_number(Utc::now()), req.email, cart.subtotal().currency());
        // A line re-priced in another currency than the cart fails here, before any stock moves.
        for line in lines { order.add_item(line)?; }
        let charges = compute_charges(order.subtotal(), &self.pricing);
        order.set_charges(charges.shipping, charges.tax)?;
        order.set_customer(req.customer_name, req.shipping_address, req.billing_address);
        order.place()?;

        self.inventory.reserve_for_order(tenant, order.items()).await?;
        if let Err(e) = self.insert_with_fresh_number(&mut order).await {
            error!(error = %e, "order could not be stored, returning reserved stock");
            if let Err(restock) = self.inventory.restock_for_order(tenant, order.items()).await {
                error!(error = %restock, order_number = order.order_number(), "failed to return reserved stock");
            }
            return Err(e);
        }
        self.store.delete_cart(tenant, session).await?;
        info!(%tenant, order_number = order.order_number(), total = %order.total(), "order placed");
        self.events.publish(tenant, order.take_events()).await;
        Ok(order)
    }

    async fn insert_with_fresh_number(&self, order: &mut Order) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.store.insert_order(order).await {
                Err(CommerceError::Conflict(_)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    warn!(order_number = order.order_number(), "order number collision, drawing a new one");
                    order.renumber(generate_order_number(Utc::now()));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn get(&self, tenant: &TenantId, id: Uuid) -> Result<Order> {
        self.store.get_order(tenant, id).await?.ok_or(CommerceError::NotFound("Order"))
    }

    /// Customer lookup; the email must match the order's.
    pub async fn get_for_customer(&self, tenant: &TenantId, id: Uuid, email: &str) -> Result<Order> {
        let order = self.get(tenant, id).await?;
        if !order.email().eq_ignore_ascii_case(email.trim()) { return Err(CommerceError::NotFound("Order")); }
        Ok(order)
    }

    pub async fn list(&self, tenant: &TenantId, filter: &OrderFilter, page: Page) -> Result<Paginated<Order>> {
        self.store.list_orders(tenant, filter, page).await
    }

    /// Customers may cancel until the order starts processing.
    pub async fn cancel_for_customer(&self, tenant: &TenantId, id: Uuid, email: &str) -> Result<Order> {
        let order = self.get_for_customer(tenant, id, email).await?;
        if !matches!(order.status(), OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(CommerceError::Conflict(format!("An order that is {} can no longer be cancelled", order.status().as_str())));
        }
        self.update_status(tenant, id, OrderStatus::Cancelled, Some("Cancelled by customer".into())).await
    }

    /// Admin status change. Cancelling returns the items to stock unless a
    /// refund already did.
    pub async fn update_status(&self, tenant: &TenantId, id: Uuid, to: OrderStatus, note: Option<String>) -> Result<Order> {
        let mut order = self.get(tenant, id).await?;
        order.transition(to, note)?;
        let restock = to == OrderStatus::Cancelled && order.claim_restock();
        self.persist(&mut order).await?;
        if restock { self.return_stock(tenant, &order).await?; }
        info!(%tenant, order_number = order.order_number(), status = to.as_str(), "order status updated");
        self.events.publish(tenant, order.take_events()).await;
        Ok(order)
    }

    pub async fn update_payment(&self, tenant: &TenantId, id: Uuid, to: PaymentStatus, note: Option<String>) -> Result<Order> {
        let mut order = self.get(tenant, id).await?;
        order.set_payment_status(to, note)?;
        self.persist(&mut order).await?;
        self.events.publish(tenant, order.take_events()).await;
        Ok(order)
    }

    /// Opens a refund; without an amount the whole refundable balance is requested.
    pub async fn request_refund(&self, tenant: &TenantId, id: Uuid, amount: Option<Decimal>, reason: String, restock: bool) -> Result<Order> {
        let mut order = self.get(tenant, id).await?;
        let amount = match amount {
            Some(a) => Money::new(a, order.total().currency()),
            None => order.refundable(),
        };
        order.request_refund(amount, reason, restock)?;
        self.persist(&mut order).await?;
        self.events.publish(tenant, order.take_events()).await;
        Ok(order)
    }

    /// Advances the open refund. Completing a refund flagged for restock puts
    /// the items back, once per order.
    pub async fn update_refund(&self, tenant: &TenantId, id: Uuid, to: RefundStatus, note: Option<String>) -> Result<Order> {
        let mut order = self.get(tenant, id).await?;
        order.set_refund_status(to, note)?;
        let restock = to == RefundStatus::Completed && order.refund().restock && order.claim_restock();
        self.persist(&mut order).await?;
        if restock { self.return_stock(tenant, &order).await?; }
        self.events.publish(tenant, order.take_events()).await;
        Ok(order)
    }

    /// Writes the order unless another request changed it since it was loaded.
    async fn persist(&self, order: &mut Order) -> Result<()> {
        let expected = order.next_version();
        self.store.save_order(order, expected).await
    }

    /// Called only once the restock claim is stored.
    async fn return_stock(&self, tenant: &TenantId, order: &Order) -> Result<()> {
        if let Err(e) = self.inventory.restock_for_order(tenant, order.items()).await {
            error!(error = %e, order_number = order.order_number(), "order saved but its items were not returned to stock");
            return Err(e);
        }
        Ok(())
    }
}
