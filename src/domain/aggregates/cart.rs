//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, Quantity, Sku, TenantId};

/// Upper bound on the quantity of a single cart line.
pub const MAX_LINE_QUANTITY: u32 = 99;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    tenant_id: TenantId,
    session_id: String,
    items: Vec<CartItem>,
    subtotal: Money,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub sku: Sku,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
    fn is(&self, product_id: Uuid, sku: &Sku) -> bool { self.product_id == product_id && &self.sku == sku }
}

impl Cart {
    pub fn new(tenant_id: TenantId, session_id: impl Into<String>, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            tenant_id, session_id: session_id.into(), items: vec![], subtotal: Money::zero(currency),
            currency: currency.to_uppercase(), created_at: now, updated_at: now,
        }
    }

    pub fn tenant_id(&self) -> &TenantId { &self.tenant_id }
    pub fn session_id(&self) -> &str { &self.session_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Quantity already held for a product variant.
    pub fn quantity_of(&self, product_id: Uuid, sku: &Sku) -> u32 {
        self.items.iter().find(|i| i.is(product_id, sku)).map_or(0, |i| i.quantity)
    }

    /// Adds a line, merging with an existing line for the same variant.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::InvalidQuantity(0)); }
        if self.items.is_empty() {
            self.currency = item.unit_price.currency().to_string();
        } else if item.unit_price.currency() != self.currency {
            return Err(CartError::CurrencyMismatch);
        }
        if let Some(existing) = self.items.iter_mut().find(|i| i.is(item.product_id, &item.sku)) {
            let merged = Quantity::new(existing.quantity).add(item.quantity).value();
            if merged > MAX_LINE_QUANTITY { return Err(CartError::InvalidQuantity(merged)); }
            existing.quantity = merged;
            existing.unit_price = item.unit_price;
            existing.name = item.name;
        } else {
            if item.quantity > MAX_LINE_QUANTITY { return Err(CartError::InvalidQuantity(item.quantity)); }
            self.items.push(item);
        }
        self.recalculate()
    }

    /// Sets the quantity of a line; zero removes it.
    pub fn update_quantity(&mut self, product_id: Uuid, sku: &Sku, quantity: u32) -> Result<(), CartError> {
        if quantity > MAX_LINE_QUANTITY { return Err(CartError::InvalidQuantity(quantity)); }
        let item = self.items.iter_mut().find(|i| i.is(product_id, sku)).ok_or(CartError::ItemNotFound)?;
        if quantity == 0 { self.items.retain(|i| !i.is(product_id, sku)); }
        else { item.quantity = quantity; }
        self.recalculate()
    }

    pub fn remove_item(&mut self, product_id: Uuid, sku: &Sku) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| !i.is(product_id, sku));
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.recalculate()
    }

    fn recalculate(&mut self) -> Result<(), CartError> {
        self.subtotal = self.items.iter()
            .try_fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()))
            .map_err(|_| CartError::CurrencyMismatch)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, InvalidQuantity(u32), CurrencyMismatch }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found in cart"),
            Self::InvalidQuantity(q) => write!(f, "Quantity {q} must be between 1 and {MAX_LINE_QUANTITY}"),
            Self::CurrencyMismatch => write!(f, "Cart items must share one currency"),
        }
    }
}
