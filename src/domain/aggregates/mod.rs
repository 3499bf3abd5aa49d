//! Aggregates module
pub mod product;
pub mod category;
pub mod order;
pub mod cart;

pub use product::{Activation, Approval, ApprovalStatus, Product, ProductDetails, ProductError, StockTransition, Variant};
pub use category::{Category, CategoryError, CategoryLevel, CategoryNode, CategoryTree};
pub use order::{generate_order_number, Address, ChangeKind, LineItem, Order, OrderError, OrderStatus, PaymentStatus, Refund, RefundStatus, StatusChange};
pub use cart::{Cart, CartError, CartItem, MAX_LINE_QUANTITY};
