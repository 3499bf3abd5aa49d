//! storehub: multi-tenant e-commerce backend
//!
//! Catalog, carts and checkout for many independent stores served from one
//! process. Every record carries the tenant it belongs to.
//!
//! ## Features
//! - Three-level category tree and products with color/size variants
//! - Product approval workflow
//! - Session carts and checkout with flat shipping and tax
//! - Order, payment and refund state machines
//! - Stock keeping with automatic deactivation when sold out
//! - Regex search with facets and "did you mean" suggestions
//! - Sales analytics

pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{CommerceError, Result};
