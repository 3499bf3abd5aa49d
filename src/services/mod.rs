//! Application services. Each one owns a handle to the store and applies
//! aggregate operations on behalf of the HTTP layer.

pub mod analytics;
pub mod cart;
pub mod catalog;
pub mod events;
pub mod inventory;
pub mod orders;
pub mod search;

pub use analytics::AnalyticsService;
pub use cart::CartService;
pub use catalog::CatalogService;
pub use events::EventPublisher;
pub use inventory::InventoryService;
pub use orders::OrderService;
pub use search::SearchService;
