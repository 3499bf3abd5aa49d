//! Domain events
use crate::domain::value_objects::Sku;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
}

impl DomainEvent {
    /// Last segment of the subject the event is published under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::Created { .. }) => "product.created",
            Self::Product(ProductEvent::Approved { .. }) => "product.approved",
            Self::Product(ProductEvent::Rejected { .. }) => "product.rejected",
            Self::Product(ProductEvent::StockAdjusted { .. }) => "product.stock_adjusted",
            Self::Product(ProductEvent::OutOfStock { .. }) => "product.out_of_stock",
            Self::Product(ProductEvent::BackInStock { .. }) => "product.back_in_stock",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::PaymentChanged { .. }) => "order.payment_changed",
            Self::Order(OrderEvent::RefundChanged { .. }) => "order.refund_changed",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid },
    Approved { product_id: Uuid },
    Rejected { product_id: Uuid, reason: String },
    StockAdjusted { product_id: Uuid, sku: Sku, delta: i64, stock: u32 },
    OutOfStock { product_id: Uuid },
    BackInStock { product_id: Uuid, total_stock: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, total: Decimal },
    StatusChanged { order_id: Uuid, from: String, to: String },
    PaymentChanged { order_id: Uuid, from: String, to: String },
    RefundChanged { order_id: Uuid, status: String, amount: Decimal },
    Cancelled { order_id: Uuid },
}
