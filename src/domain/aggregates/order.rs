//! Order Aggregate
//!
//! Fulfillment, payment and refund progress are tracked as three independent
//! state machines. Every accepted transition is appended to the order history.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::{Money, MoneyError, Sku, TenantId};
use crate::domain::events::{DomainEvent, OrderEvent};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    tenant_id: TenantId,
    order_number: String,
    email: String,
    customer_name: Option<String>,
    items: Vec<LineItem>,
    subtotal: Money,
    shipping: Money,
    tax: Money,
    total: Money,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    refund: Refund,
    refunded_total: Money,
    /// Set once the ordered items have gone back to stock.
    #[serde(default)]
    restocked: bool,
    history: Vec<StatusChange>,
    #[serde(default)]
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem { pub product_id: Uuid, pub sku: Sku, pub name: String, pub category_id: Option<Uuid>, pub quantity: u32, pub unit_price: Money, pub total: Money }

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 120))] pub name: String,
    #[validate(length(min = 1, max = 200))] pub street1: String,
    #[validate(length(max = 200))] pub street2: Option<String>,
    #[validate(length(min = 1, max = 100))] pub city: String,
    #[validate(length(max = 100))] pub state: Option<String>,
    #[validate(length(min = 1, max = 20))] pub zip: String,
    #[validate(length(min = 2, max = 60))] pub country: String,
    #[validate(length(max = 30))] pub phone: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled, Returned }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, PartiallyRefunded, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus { #[default] None, Requested, Processing, Completed, Rejected }

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [Self::Pending, Self::Confirmed, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled, Self::Returned];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Confirmed => "confirmed", Self::Processing => "processing", Self::Shipped => "shipped",
            Self::Delivered => "delivered", Self::Cancelled => "cancelled", Self::Returned => "returned",
        }
    }

    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!((self, to),
            (Pending, Confirmed) | (Pending, Cancelled) |
            (Confirmed, Processing) | (Confirmed, Cancelled) |
            (Processing, Shipped) | (Processing, Cancelled) |
            (Shipped, Delivered) | (Delivered, Returned))
    }
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [Self::Pending, Self::Paid, Self::Failed, Self::PartiallyRefunded, Self::Refunded];

    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Paid => "paid", Self::Failed => "failed", Self::PartiallyRefunded => "partially_refunded", Self::Refunded => "refunded" }
    }

    /// Payment states reachable without going through a refund.
    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!((self, to), (Pending, Paid) | (Pending, Failed) | (Failed, Pending) | (Failed, Paid))
    }

    pub fn is_captured(&self) -> bool { matches!(self, Self::Paid | Self::PartiallyRefunded) }
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::None => "none", Self::Requested => "requested", Self::Processing => "processing", Self::Completed => "completed", Self::Rejected => "rejected" }
    }

    pub fn can_transition_to(&self, to: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!((self, to), (Requested, Processing) | (Requested, Rejected) | (Processing, Completed) | (Processing, Rejected))
    }

    /// No refund is in flight.
    pub fn is_settled(&self) -> bool { matches!(self, Self::None | Self::Completed | Self::Rejected) }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub status: RefundStatus,
    pub amount: Option<Money>,
    pub reason: Option<String>,
    pub restock: bool,
    pub requested_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind { Order, Payment, Refund }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChange { pub at: DateTime<Utc>, pub kind: ChangeKind, pub from: String, pub to: String, pub note: Option<String> }

/// `ORD-YYYYMMDD-NNNNNN`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    format!("ORD-{}-{:06}", now.format("%Y%m%d"), rand::thread_rng().gen_range(0..1_000_000))
}

impl Order {
    pub fn create(tenant_id: TenantId, order_number: impl Into<String>, email: impl Into<String>, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), tenant_id, order_number: order_number.into(), email: email.into().trim().to_lowercase(), customer_name: None,
            items: vec![], subtotal: Money::zero(currency), shipping: Money::zero(currency), tax: Money::zero(currency),
            total: Money::zero(currency), shipping_address: None, billing_address: None, status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending, refund: Refund::default(), refunded_total: Money::zero(currency),
            restocked: false, history: vec![], version: 0, created_at: now, updated_at: now, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn tenant_id(&self) -> &TenantId { &self.tenant_id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn email(&self) -> &str { &self.email }
    pub fn customer_name(&self) -> Option<&str> { self.customer_name.as_deref() }
    pub fn shipping_address(&self) -> Option<&Address> { self.shipping_address.as_ref() }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn refund(&self) -> &Refund { &self.refund }
    pub fn refunded_total(&self) -> &Money { &self.refunded_total }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn shipping(&self) -> &Money { &self.shipping }
    pub fn tax(&self) -> &Money { &self.tax }
    pub fn total(&self) -> &Money { &self.total }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn history(&self) -> &[StatusChange] { &self.history }
    pub fn is_restocked(&self) -> bool { self.restocked }
    pub fn version(&self) -> u64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Advances the optimistic version and returns the one the stored copy must still have.
    pub fn next_version(&mut self) -> u64 {
        let expected = self.version;
        self.version += 1;
        expected
    }

    /// Marks the items as returned to stock. False when that already happened.
    pub fn claim_restock(&mut self) -> bool {
        if self.restocked { return false; }
        self.restocked = true;
        self.touch();
        true
    }

    pub fn set_customer(&mut self, name: Option<String>, shipping: Address, billing: Option<Address>) {
        self.customer_name = name;
        self.shipping_address = Some(shipping);
        self.billing_address = billing;
    }

    pub fn add_item(&mut self, item: LineItem) -> Result<(), OrderError> {
        let currency = self.subtotal.currency();
        if item.unit_price.currency() != currency || item.total.currency() != currency {
            return Err(OrderError::CurrencyMismatch { expected: currency.to_string(), got: item.unit_price.currency().to_string() });
        }
        self.items.push(item);
        self.recalculate()
    }

    pub fn set_charges(&mut self, shipping: Money, tax: Money) -> Result<(), OrderError> {
        self.total = self.subtotal.add(&shipping)?.add(&tax)?;
        self.shipping = shipping;
        self.tax = tax;
        self.touch();
        Ok(())
    }

    /// Replaces the number of an order that has not been stored yet.
    pub fn renumber(&mut self, number: impl Into<String>) {
        self.order_number = number.into();
        for event in &mut self.events {
            if let DomainEvent::Order(OrderEvent::Placed { order_number, .. }) = event { order_number.clone_from(&self.order_number); }
        }
    }

    /// Finalises a freshly built order.
    pub fn place(&mut self) -> Result<(), OrderError> {
        if self.items.is_empty() { return Err(OrderError::NoItems); }
        self.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: self.id, order_number: self.order_number.clone(), total: self.total.amount() }));
        Ok(())
    }

    pub fn transition(&mut self, to: OrderStatus, note: Option<String>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { kind: ChangeKind::Order, from: self.status.as_str(), to: to.as_str() });
        }
        let from = std::mem::replace(&mut self.status, to);
        self.record(ChangeKind::Order, from.as_str(), to.as_str(), note);
        let event = if to == OrderStatus::Cancelled {
            OrderEvent::Cancelled { order_id: self.id }
        } else {
            OrderEvent::StatusChanged { order_id: self.id, from: from.as_str().into(), to: to.as_str().into() }
        };
        self.raise_event(DomainEvent::Order(event));
        Ok(())
    }

    pub fn set_payment_status(&mut self, to: PaymentStatus, note: Option<String>) -> Result<(), OrderError> {
        if !self.payment_status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { kind: ChangeKind::Payment, from: self.payment_status.as_str(), to: to.as_str() });
        }
        let from = std::mem::replace(&mut self.payment_status, to);
        self.record(ChangeKind::Payment, from.as_str(), to.as_str(), note);
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentChanged { order_id: self.id, from: from.as_str().into(), to: to.as_str().into() }));
        Ok(())
    }

    /// Amount that can still be refunded.
    pub fn refundable(&self) -> Money { self.total.subtract(&self.refunded_total).unwrap_or_else(|_| Money::zero(self.total.currency())) }

    pub fn request_refund(&mut self, amount: Money, reason: String, restock: bool) -> Result<(), OrderError> {
        if !self.payment_status.is_captured() { return Err(OrderError::NotPaid); }
        if !self.refund.status.is_settled() {
            return Err(OrderError::InvalidTransition { kind: ChangeKind::Refund, from: self.refund.status.as_str(), to: RefundStatus::Requested.as_str() });
        }
        if amount.currency() != self.total.currency() || amount.is_zero() || amount.is_negative() || amount.amount() > self.refundable().amount() {
            return Err(OrderError::InvalidRefundAmount);
        }
        if restock && amount.amount() != self.refundable().amount() { return Err(OrderError::PartialRestock); }
        let from = self.refund.status;
        self.refund = Refund { status: RefundStatus::Requested, amount: Some(amount.clone()), reason: Some(reason), restock, requested_at: Some(Utc::now()), resolved_at: None };
        self.record(ChangeKind::Refund, from.as_str(), RefundStatus::Requested.as_str(), None);
        self.raise_event(DomainEvent::Order(OrderEvent::RefundChanged { order_id: self.id, status: "requested".into(), amount: amount.amount() }));
        Ok(())
    }

    /// Moves the current refund forward. Completion books the refunded amount
    /// and updates the payment status accordingly.
    pub fn set_refund_status(&mut self, to: RefundStatus, note: Option<String>) -> Result<(), OrderError> {
        let from = self.refund.status;
        if !from.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { kind: ChangeKind::Refund, from: from.as_str(), to: to.as_str() });
        }
        let amount = self.refund.amount.clone().unwrap_or_else(|| Money::zero(self.total.currency()));
        self.refund.status = to;
        if matches!(to, RefundStatus::Completed | RefundStatus::Rejected) { self.refund.resolved_at = Some(Utc::now()); }
        self.record(ChangeKind::Refund, from.as_str(), to.as_str(), note);
        if to == RefundStatus::Completed {
            self.refunded_total = self.refunded_total.add(&amount).map_err(|_| OrderError::InvalidRefundAmount)?;
            let paid = self.payment_status;
            self.payment_status = if self.refundable().is_zero() { PaymentStatus::Refunded } else { PaymentStatus::PartiallyRefunded };
            if paid != self.payment_status {
                self.record(ChangeKind::Payment, paid.as_str(), self.payment_status.as_str(), None);
            }
        }
        self.raise_event(DomainEvent::Order(OrderEvent::RefundChanged { order_id: self.id, status: to.as_str().into(), amount: amount.amount() }));
        Ok(())
    }

    fn recalculate(&mut self) -> Result<(), OrderError> {
        let subtotal = self.items.iter().try_fold(Money::zero(self.subtotal.currency()), |acc, i| acc.add(&i.total))?;
        self.total = subtotal.add(&self.shipping)?.add(&self.tax)?;
        self.subtotal = subtotal;
        self.touch();
        Ok(())
    }

    fn record(&mut self, kind: ChangeKind, from: &str, to: &str, note: Option<String>) {
        self.history.push(StatusChange { at: Utc::now(), kind, from: from.into(), to: to.into(), note });
        self.touch();
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    NoItems,
    NotPaid,
    InvalidRefundAmount,
    PartialRestock,
    CurrencyMismatch { expected: String, got: String },
    InvalidTransition { kind: ChangeKind, from: &'static str, to: &'static str },
}

impl From<MoneyError> for OrderError {
    fn from(e: MoneyError) -> Self {
        match e { MoneyError::CurrencyMismatch { expected, got } => Self::CurrencyMismatch { expected, got } }
    }
}
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::NotPaid => write!(f, "Order has not been paid"),
            Self::InvalidRefundAmount => write!(f, "Refund amount must be positive and not exceed the refundable total"),
            Self::PartialRestock => write!(f, "Only a refund of the whole refundable balance can restock items"),
            Self::CurrencyMismatch { expected, got } => write!(f, "Order is priced in {expected}, got {got}"),
            Self::InvalidTransition { kind, from, to } => write!(f, "Cannot move {kind:?} status from {from} to {to}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn order() -> Order {
        let mut order = Order::create(TenantId::parse("acme").unwrap(), "ORD-1", " Test@Example.com ", "USD");
        order.add_item(LineItem {
            product_id: Uuid::nil(), sku: Sku::new("W001").unwrap(), name: "Widget".into(), category_id: None, quantity: 2,
            unit_price: Money::usd(Decimal::new(10, 0)), total: Money::usd(Decimal::new(20, 0)),
        }).unwrap();
        order.set_charges(Money::usd(Decimal::new(5, 0)), Money::usd(Decimal::new(2, 0))).unwrap();
        order
    }

    #[test]
    fn test_order_workflow() {
        let mut order = order();
        order.place().unwrap();
        assert_eq!(order.email(), "test@example.com");
        assert_eq!(order.total().amount(), Decimal::new(27, 0));
        order.transition(OrderStatus::Confirmed, None).unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        order.transition(OrderStatus::Processing, None).unwrap();
        order.transition(OrderStatus::Shipped, None).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert!(order.transition(OrderStatus::Cancelled, None).is_err());
        order.transition(OrderStatus::Delivered, None).unwrap();
        assert_eq!(order.history().len(), 4);
    }

    #[test]
    fn test_empty_order_cannot_be_placed() {
        let mut order = Order::create(TenantId::parse("acme").unwrap(), "ORD-2", "a@b.c", "USD");
        assert_eq!(order.place(), Err(OrderError::NoItems));
    }

    #[test]
    fn test_payment_transitions() {
        let mut order = order();
        order.set_payment_status(PaymentStatus::Failed, None).unwrap();
        order.set_payment_status(PaymentStatus::Paid, Some("retry".into())).unwrap();
        assert!(order.set_payment_status(PaymentStatus::Refunded, None).is_err());
    }

    #[test]
    fn test_partial_then_full_refund() {
        let mut order = order();
        assert_eq!(order.request_refund(Money::usd(Decimal::new(5, 0)), "late".into(), false), Err(OrderError::NotPaid));
        order.set_payment_status(PaymentStatus::Paid, None).unwrap();
        assert_eq!(order.request_refund(Money::usd(Decimal::new(30, 0)), "late".into(), false), Err(OrderError::InvalidRefundAmount));

        order.request_refund(Money::usd(Decimal::new(7, 0)), "late".into(), false).unwrap();
        assert!(order.request_refund(Money::usd(Decimal::new(1, 0)), "again".into(), false).is_err());
        assert!(order.set_refund_status(RefundStatus::Completed, None).is_err());
        order.set_refund_status(RefundStatus::Processing, None).unwrap();
        order.set_refund_status(RefundStatus::Completed, None).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::PartiallyRefunded);
        assert_eq!(order.refundable().amount(), Decimal::new(20, 0));

        assert_eq!(order.request_refund(Money::usd(Decimal::new(5, 0)), "damaged".into(), true), Err(OrderError::PartialRestock));
        order.request_refund(Money::usd(Decimal::new(20, 0)), "damaged".into(), true).unwrap();
        order.set_refund_status(RefundStatus::Processing, None).unwrap();
        order.set_refund_status(RefundStatus::Completed, None).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert!(order.refundable().is_zero());
    }

    #[test]
    fn test_line_in_other_currency_is_rejected() {
        let mut order = order();
        let eur = LineItem {
            product_id: Uuid::nil(), sku: Sku::new("W002").unwrap(), name: "Gadget".into(), category_id: None, quantity: 1,
            unit_price: Money::new(Decimal::new(10, 0), "EUR"), total: Money::new(Decimal::new(10, 0), "EUR"),
        };
        assert!(matches!(order.add_item(eur), Err(OrderError::CurrencyMismatch { .. })));
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.total().amount(), Decimal::new(27, 0));
        assert!(order.set_charges(Money::new(Decimal::ONE, "EUR"), Money::usd(Decimal::ZERO)).is_err());
        assert_eq!(order.shipping().amount(), Decimal::new(5, 0));
    }

    #[test]
    fn test_restock_is_claimed_once() {
        let mut order = order();
        assert!(!order.is_restocked());
        assert!(order.claim_restock());
        assert!(!order.claim_restock());
        assert!(order.is_restocked());
    }

    #[test]
    fn test_next_version_returns_previous() {
        let mut order = order();
        assert_eq!(order.next_version(), 0);
        assert_eq!(order.next_version(), 1);
        assert_eq!(order.version(), 2);
    }

    #[test]
    fn test_renumber_updates_placed_event() {
        let mut order = order();
        order.place().unwrap();
        order.renumber("ORD-20240101-000042");
        let events = order.take_events();
        assert!(matches!(&events[0], DomainEvent::Order(OrderEvent::Placed { order_number, .. }) if order_number == "ORD-20240101-000042"));
    }

    #[test]
    fn test_order_number_format() {
        let n = generate_order_number(Utc::now());
        assert_eq!(n.len(), "ORD-20240101-000000".len());
        assert!(n.starts_with("ORD-"));
    }
}
