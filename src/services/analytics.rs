//! Sales analytics over a tenant's orders.
//!
//! Every report is a pure function of the orders in range; the service only
//! loads them.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{CategoryTree, Order, OrderStatus, PaymentStatus};
use crate::domain::value_objects::TenantId;
use crate::error::{CommerceError, Result};
use crate::services::inventory::InventoryService;
use crate::store::Store;

const DEFAULT_RANGE_DAYS: i64 = 30;

/// Half-open `[from, to)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange { pub from: DateTime<Utc>, pub to: DateTime<Utc> }

impl DateRange {
    /// Parses `from`/`to` as RFC 3339 timestamps or `YYYY-MM-DD` dates. A bare
    /// `to` date covers that whole day. Missing bounds default to the last 30 days.
    pub fn parse(from: Option<&str>, to: Option<&str>, now: DateTime<Utc>) -> Result<Self> {
        let to = match to { Some(s) => parse_bound(s, true)?, None => now };
        let from = match from { Some(s) => parse_bound(s, false)?, None => to - Duration::days(DEFAULT_RANGE_DAYS) };
        if from >= to { return Err(CommerceError::InvalidInput("`from` must be before `to`".into())); }
        Ok(Self { from, to })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool { self.from <= at && at < self.to }
}

fn parse_bound(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) { return Ok(t.with_timezone(&Utc)); }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| CommerceError::InvalidInput(format!("invalid date `{s}`, expected RFC 3339 or YYYY-MM-DD")))?;
    let date = if end_of_day { date.succ_opt().unwrap_or(date) } else { date };
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesSummary {
    pub revenue: Decimal,
    pub orders: usize,
    pub average_order_value: Decimal,
    pub unique_customers: usize,
    pub items_sold: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySales { pub date: NaiveDate, pub revenue: Decimal, pub orders: usize }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSales { pub product_id: Uuid, pub name: String, pub quantity: u64, pub revenue: Decimal }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBreakdown { pub order_status: BTreeMap<&'static str, usize>, pub payment_status: BTreeMap<&'static str, usize> }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySales { pub category_id: Option<Uuid>, pub name: String, pub quantity: u64, pub revenue: Decimal }

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub range: DateRange,
    pub summary: SalesSummary,
    pub status: StatusBreakdown,
    pub top_products: Vec<ProductSales>,
    pub low_stock_products: usize,
}

/// Orders whose revenue counts: captured payment, not cancelled.
fn is_revenue(o: &Order) -> bool {
    o.payment_status().is_captured() && o.status() != OrderStatus::Cancelled
}

fn net_revenue(o: &Order) -> Decimal { o.total().amount() - o.refunded_total().amount() }

pub fn summary(orders: &[Order]) -> SalesSummary {
    let counted: Vec<&Order> = orders.iter().filter(|o| is_revenue(o)).collect();
    let revenue: Decimal = counted.iter().map(|o| net_revenue(o)).sum();
    let average_order_value = if counted.is_empty() { Decimal::ZERO } else { (revenue / Decimal::from(counted.len())).round_dp(2) };
    SalesSummary {
        revenue,
        orders: counted.len(),
        average_order_value,
        unique_customers: counted.iter().map(|o| o.email()).collect::<HashSet<_>>().len(),
        items_sold: counted.iter().flat_map(|o| o.items()).map(|i| u64::from(i.quantity)).sum(),
    }
}

/// One bucket per UTC day in `range`, including days without sales.
pub fn sales_over_time(orders: &[Order], range: &DateRange) -> Vec<DailySales> {
    let mut days: BTreeMap<NaiveDate, DailySales> = BTreeMap::new();
    let last = (range.to - Duration::nanoseconds(1)).date_naive();
    let mut day = range.from.date_naive();
    while day <= last {
        days.insert(day, DailySales { date: day, revenue: Decimal::ZERO, orders: 0 });
        let Some(next) = day.succ_opt() else { break };
        day = next;
    }
    for o in orders.iter().filter(|o| is_revenue(o) && range.contains(o.created_at())) {
        if let Some(bucket) = days.get_mut(&o.created_at().date_naive()) {
            bucket.revenue += net_revenue(o);
            bucket.orders += 1;
        }
    }
    days.into_values().collect()
}

/// Best sellers by quantity.
pub fn top_products(orders: &[Order], limit: usize) -> Vec<ProductSales> {
    let mut by_product: HashMap<Uuid, ProductSales> = HashMap::new();
    for item in orders.iter().filter(|o| is_revenue(o)).flat_map(|o| o.items()) {
        let entry = by_product.entry(item.product_id).or_insert_with(|| ProductSales {
            product_id: item.product_id, name: item.name.clone(), quantity: 0, revenue: Decimal::ZERO,
        });
        entry.quantity += u64::from(item.quantity);
        entry.revenue += item.total.amount();
    }
    let mut out: Vec<ProductSales> = by_product.into_values().collect();
    out.sort_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| b.revenue.cmp(&a.revenue)).then_with(|| a.name.cmp(&b.name)));
    out.truncate(limit);
    out
}

/// Counts for every status, zeros included.
pub fn status_breakdown(orders: &[Order]) -> StatusBreakdown {
    let mut order_status: BTreeMap<&'static str, usize> = OrderStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    let mut payment_status: BTreeMap<&'static str, usize> = PaymentStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for o in orders {
        *order_status.entry(o.status().as_str()).or_default() += 1;
        *payment_status.entry(o.payment_status().as_str()).or_default() += 1;
    }
    StatusBreakdown { order_status, payment_status }
}

/// Line item revenue rolled up to top-level categories. Items whose category
/// is unknown land in an "Uncategorized" bucket.
pub fn category_sales(orders: &[Order], tree: &CategoryTree) -> Vec<CategorySales> {
    let mut by_root: HashMap<Option<Uuid>, CategorySales> = HashMap::new();
    for item in orders.iter().filter(|o| is_revenue(o)).flat_map(|o| o.items()) {
        let root = item.category_id.and_then(|c| tree.root_of(c));
        let key = root.map(|c| c.id);
        let entry = by_root.entry(key).or_insert_with(|| CategorySales {
            category_id: key,
            name: root.map_or_else(|| "Uncategorized".to_string(), |c| c.name.clone()),
            quantity: 0,
            revenue: Decimal::ZERO,
        });
        entry.quantity += u64::from(item.quantity);
        entry.revenue += item.total.amount();
    }
    let mut out: Vec<CategorySales> = by_root.into_values().collect();
    out.sort_by(|a, b| b.revenue.cmp(&a.revenue).then_with(|| a.name.cmp(&b.name)));
    out
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn Store>,
    inventory: InventoryService,
    low_stock_threshold: u32,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn Store>, inventory: InventoryService, low_stock_threshold: u32) -> Self {
        Self { store, inventory, low_stock_threshold }
    }

    pub async fn orders(&self, tenant: &TenantId, range: &DateRange) -> Result<Vec<Order>> {
        self.store.orders_between(tenant, range.from, range.to).await
    }

    pub async fn dashboard(&self, tenant: &TenantId, range: DateRange) -> Result<Dashboard> {
        let orders = self.orders(tenant, &range).await?;
        let low_stock_products = self.inventory.low_stock(tenant, self.low_stock_threshold).await?.len();
        Ok(Dashboard {
            range,
            summary: summary(&orders),
            status: status_breakdown(&orders),
            top_products: top_products(&orders, 5),
            low_stock_products,
        })
    }

    pub async fn sales(&self, tenant: &TenantId, range: DateRange) -> Result<Vec<DailySales>> {
        Ok(sales_over_time(&self.orders(tenant, &range).await?, &range))
    }

    pub async fn top_products(&self, tenant: &TenantId, range: DateRange, limit: usize) -> Result<Vec<ProductSales>> {
        Ok(top_products(&self.orders(tenant, &range).await?, limit.clamp(1, 100)))
    }

    pub async fn categories(&self, tenant: &TenantId, range: DateRange) -> Result<Vec<CategorySales>> {
        let orders = self.orders(tenant, &range).await?;
        let tree = CategoryTree::new(self.store.list_categories(tenant).await?);
        Ok(category_sales(&orders, &tree))
    }
}
