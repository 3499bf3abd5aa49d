//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use crate::domain::value_objects::{Money, Sku, Slug, TenantId};
use crate::domain::events::{DomainEvent, ProductEvent};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    id: Uuid,
    tenant_id: TenantId,
    name: String,
    slug: Slug,
    description: String,
    brand: Option<String>,
    category_id: Option<Uuid>,
    base_price: Money,
    compare_at_price: Option<Money>,
    variants: Vec<Variant>,
    tags: Vec<String>,
    images: Vec<String>,
    is_active: bool,
    auto_deactivated: bool,
    is_featured: bool,
    approval: Approval,
    sales_count: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Color/size specific SKU with its own stock. `price` overrides the product's
/// base price when set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant { pub sku: Sku, pub color: Option<String>, pub size: Option<String>, pub price: Option<Money>, pub stock: u32 }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus { #[default] Pending, Approved, Rejected, NeedsChanges }

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Approved => "approved", Self::Rejected => "rejected", Self::NeedsChanges => "needs_changes" }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Approval { pub status: ApprovalStatus, pub note: Option<String>, pub reviewed_at: Option<DateTime<Utc>> }

/// Editable fields of a product, already converted to domain types.
#[derive(Clone, Debug)]
pub struct ProductDetails {
    pub name: String,
    pub description: String,
    pub brand: Option<String>,
    pub category_id: Option<Uuid>,
    pub base_price: Money,
    pub compare_at_price: Option<Money>,
    pub variants: Vec<Variant>,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub is_featured: bool,
}

/// Effect of a stock change on the product's storefront activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation { Unchanged, Deactivated, Reactivated }

/// `current` is the variant's new stock, `total_stock` the product's.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StockTransition { pub product_id: Uuid, pub sku: Sku, pub previous: u32, pub current: u32, pub total_stock: u32, pub activation: Activation }

impl Product {
    pub fn create(tenant_id: TenantId, slug: Slug, details: ProductDetails) -> Result<Self, ProductError> {
        validate(&details)?;
        let now = Utc::now();
        let mut product = Self {
            id: Uuid::now_v7(), tenant_id, name: details.name.trim().to_string(), slug, description: details.description,
            brand: details.brand, category_id: details.category_id, base_price: details.base_price,
            compare_at_price: details.compare_at_price, variants: details.variants, tags: normalize_tags(details.tags),
            images: details.images, is_active: true, auto_deactivated: false, is_featured: details.is_featured,
            approval: Approval::default(), sales_count: 0, created_at: now, updated_at: now, events: vec![],
        };
        if product.total_stock() == 0 {
            product.is_active = false;
            product.auto_deactivated = true;
        }
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: product.id }));
        Ok(product)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn tenant_id(&self) -> &TenantId { &self.tenant_id }
    pub fn name(&self) -> &str { &self.name }
    pub fn slug(&self) -> &Slug { &self.slug }
    pub fn description(&self) -> &str { &self.description }
    pub fn brand(&self) -> Option<&str> { self.brand.as_deref() }
    pub fn category_id(&self) -> Option<Uuid> { self.category_id }
    pub fn base_price(&self) -> &Money { &self.base_price }
    pub fn variants(&self) -> &[Variant] { &self.variants }
    pub fn tags(&self) -> &[String] { &self.tags }
    pub fn is_active(&self) -> bool { self.is_active }
    pub fn is_auto_deactivated(&self) -> bool { self.auto_deactivated }
    pub fn is_featured(&self) -> bool { self.is_featured }
    pub fn approval(&self) -> &Approval { &self.approval }
    pub fn sales_count(&self) -> u64 { self.sales_count }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Shown on the storefront only when active and approved.
    pub fn is_visible(&self) -> bool { self.is_active && self.approval.status == ApprovalStatus::Approved }

    pub fn total_stock(&self) -> u32 {
        self.variants.iter().fold(0u32, |acc, v| acc.saturating_add(v.stock))
    }

    fn total_stock_u64(&self) -> u64 { self.variants.iter().map(|v| u64::from(v.stock)).sum() }

    pub fn variant(&self, sku: &Sku) -> Option<&Variant> { self.variants.iter().find(|v| &v.sku == sku) }

    pub fn price_of(&self, variant: &Variant) -> Money { variant.price.clone().unwrap_or_else(|| self.base_price.clone()) }

    /// Lowest price a shopper can pay for any variant.
    pub fn min_price(&self) -> Money {
        self.variants.iter().map(|v| self.price_of(v)).min_by(|a, b| a.amount().cmp(&b.amount())).unwrap_or_else(|| self.base_price.clone())
    }

    pub fn revise(&mut self, details: ProductDetails) -> Result<(), ProductError> {
        validate(&details)?;
        self.name = details.name.trim().to_string();
        self.description = details.description;
        self.brand = details.brand;
        self.category_id = details.category_id;
        self.base_price = details.base_price;
        self.compare_at_price = details.compare_at_price;
        self.variants = details.variants;
        self.tags = normalize_tags(details.tags);
        self.images = details.images;
        self.is_featured = details.is_featured;
        self.refresh_activation();
        self.touch();
        Ok(())
    }

    pub fn rename_slug(&mut self, slug: Slug) { self.slug = slug; self.touch(); }

    /// Manual activation toggle. Manual changes are never undone by stock updates.
    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
        self.auto_deactivated = false;
        self.touch();
    }

    /// Applies a signed stock change to one variant, then re-evaluates activation.
    pub fn adjust_variant_stock(&mut self, sku: &Sku, delta: i64) -> Result<StockTransition, ProductError> {
        let variant = self.variants.iter_mut().find(|v| &v.sku == sku).ok_or_else(|| ProductError::VariantNotFound(sku.clone()))?;
        let previous = variant.stock;
        let next = i64::from(previous).checked_add(delta).ok_or_else(|| ProductError::StockOverflow(sku.clone()))?;
        if next < 0 {
            return Err(ProductError::InsufficientStock { sku: sku.clone(), requested: delta.unsigned_abs(), available: previous });
        }
        let current = u32::try_from(next).map_err(|_| ProductError::StockOverflow(sku.clone()))?;
        let others = self.total_stock_u64() - u64::from(previous);
        if others + u64::from(current) > u64::from(u32::MAX) { return Err(ProductError::StockOverflow(sku.clone())); }
        if let Some(variant) = self.variants.iter_mut().find(|v| &v.sku == sku) { variant.stock = current; }
        self.raise_event(DomainEvent::Product(ProductEvent::StockAdjusted { product_id: self.id, sku: sku.clone(), delta, stock: current }));
        let activation = self.refresh_activation();
        self.touch();
        Ok(StockTransition { product_id: self.id, sku: sku.clone(), previous, current, total_stock: self.total_stock(), activation })
    }

    fn refresh_activation(&mut self) -> Activation {
        let total = self.total_stock();
        if total == 0 && self.is_active {
            self.is_active = false;
            self.auto_deactivated = true;
            self.raise_event(DomainEvent::Product(ProductEvent::OutOfStock { product_id: self.id }));
            Activation::Deactivated
        } else if total > 0 && self.auto_deactivated {
            self.is_active = true;
            self.auto_deactivated = false;
            self.raise_event(DomainEvent::Product(ProductEvent::BackInStock { product_id: self.id, total_stock: total }));
            Activation::Reactivated
        } else {
            Activation::Unchanged
        }
    }

    pub fn record_sale(&mut self, qty: u32) { self.sales_count = self.sales_count.saturating_add(u64::from(qty)); }
    pub fn reverse_sale(&mut self, qty: u32) { self.sales_count = self.sales_count.saturating_sub(u64::from(qty)); }

    pub fn approve(&mut self) -> Result<(), ProductError> {
        self.review(ApprovalStatus::Approved, None, "approve")?;
        self.raise_event(DomainEvent::Product(ProductEvent::Approved { product_id: self.id }));
        Ok(())
    }

    pub fn reject(&mut self, reason: &str) -> Result<(), ProductError> {
        let reason = required_note(reason)?;
        self.review(ApprovalStatus::Rejected, Some(reason.clone()), "reject")?;
        self.raise_event(DomainEvent::Product(ProductEvent::Rejected { product_id: self.id, reason }));
        Ok(())
    }

    pub fn request_changes(&mut self, notes: &str) -> Result<(), ProductError> {
        let notes = required_note(notes)?;
        self.review(ApprovalStatus::NeedsChanges, Some(notes), "request changes")
    }

    pub fn resubmit(&mut self) -> Result<(), ProductError> {
        if !matches!(self.approval.status, ApprovalStatus::Rejected | ApprovalStatus::NeedsChanges) {
            return Err(ProductError::InvalidApproval { from: self.approval.status, action: "resubmit" });
        }
        self.approval = Approval { status: ApprovalStatus::Pending, note: None, reviewed_at: None };
        self.touch();
        Ok(())
    }

    fn review(&mut self, to: ApprovalStatus, note: Option<String>, action: &'static str) -> Result<(), ProductError> {
        let allowed = match to {
            ApprovalStatus::Approved => self.approval.status != ApprovalStatus::Approved,
            ApprovalStatus::Rejected => self.approval.status != ApprovalStatus::Rejected,
            ApprovalStatus::NeedsChanges => matches!(self.approval.status, ApprovalStatus::Pending | ApprovalStatus::Approved),
            ApprovalStatus::Pending => false,
        };
        if !allowed { return Err(ProductError::InvalidApproval { from: self.approval.status, action }); }
        self.approval = Approval { status: to, note, reviewed_at: Some(Utc::now()) };
        self.touch();
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn validate(details: &ProductDetails) -> Result<(), ProductError> {
    if details.name.trim().is_empty() { return Err(ProductError::MissingName); }
    if details.variants.is_empty() { return Err(ProductError::NoVariants); }
    let mut prices = vec![&details.base_price];
    prices.extend(details.compare_at_price.iter());
    prices.extend(details.variants.iter().filter_map(|v| v.price.as_ref()));
    for price in prices {
        if price.is_negative() { return Err(ProductError::InvalidPrice); }
        if price.currency() != details.base_price.currency() { return Err(ProductError::MixedCurrencies); }
    }
    let mut seen = HashSet::new();
    for v in &details.variants {
        if !seen.insert(&v.sku) { return Err(ProductError::DuplicateSku(v.sku.clone())); }
    }
    Ok(())
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = vec![];
    for tag in tags.into_iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()) {
        if !out.contains(&tag) { out.push(tag); }
    }
    out
}

fn required_note(note: &str) -> Result<String, ProductError> {
    let note = note.trim();
    if note.is_empty() { Err(ProductError::MissingReviewNote) } else { Ok(note.to_string()) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductError {
    MissingName,
    NoVariants,
    InvalidPrice,
    MixedCurrencies,
    DuplicateSku(Sku),
    VariantNotFound(Sku),
    InsufficientStock { sku: Sku, requested: u64, available: u32 },
    InvalidApproval { from: ApprovalStatus, action: &'static str },
    MissingReviewNote,
    StockOverflow(Sku),
}
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "Missing name"),
            Self::NoVariants => write!(f, "A product needs at least one variant"),
            Self::InvalidPrice => write!(f, "Prices cannot be negative"),
            Self::MixedCurrencies => write!(f, "All prices of a product must share one currency"),
            Self::DuplicateSku(sku) => write!(f, "Duplicate SKU {sku}"),
            Self::VariantNotFound(sku) => write!(f, "Variant {sku} not found"),
            Self::InsufficientStock { sku, requested, available } => write!(f, "Insufficient stock for {sku}: requested {requested}, available {available}"),
            Self::InvalidApproval { from, action } => write!(f, "Cannot {action} a product that is {}", from.as_str()),
            Self::MissingReviewNote => write!(f, "A review note is required"),
            Self::StockOverflow(sku) => write!(f, "Stock for {sku} would exceed {}", u32::MAX),
        }
    }
}
