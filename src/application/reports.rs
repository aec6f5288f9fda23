//! Read-only projections for the admin side: order listings, low-stock
//! alerts and the sales report.

use crate::domain::inventory::InventoryRecord;
use crate::domain::money::Money;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::{ProductId, UserId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Selects orders. Empty fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub user_id: Option<UserId>,
}

impl OrderFilter {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            user_id: None,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            status: None,
            user_id: Some(user_id),
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status == s)
            && self.user_id.is_none_or(|u| order.user_id == u)
    }
}

/// Inclusive window over the UTC day an order was placed. Open ends are
/// unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SalesRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl SalesRange {
    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.is_none_or(|from| day >= from) && self.to.is_none_or(|to| day <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySales {
    pub date: NaiveDate,
    pub orders: usize,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSales {
    pub product_id: ProductId,
    pub units: u64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesReport {
    pub order_count: usize,
    pub revenue: Money,
    pub average_order_value: Money,
    /// Highest revenue first; ties broken by product id.
    pub products: Vec<ProductSales>,
    /// One entry per day with at least one sale, oldest first.
    pub daily: Vec<DailySales>,
}

impl SalesReport {
    /// Counts only orders whose payment went through and that were placed
    /// within `range`.
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>, range: SalesRange) -> Self {
        let mut order_count = 0usize;
        let mut revenue = Money::ZERO;
        let mut per_product: HashMap<ProductId, (u64, Money)> = HashMap::new();
        let mut per_day: BTreeMap<NaiveDate, (usize, Money)> = BTreeMap::new();

        let sales = orders
            .into_iter()
            .filter(|o| is_sale(o.status) && range.contains(o.created_at.date_naive()));
        for order in sales {
            order_count += 1;
            revenue += order.total;
            let day = per_day
                .entry(order.created_at.date_naive())
                .or_insert((0, Money::ZERO));
            day.0 += 1;
            day.1 += order.total;
            for line in &order.lines {
                let entry = per_product
                    .entry(line.product_id)
                    .or_insert((0, Money::ZERO));
                entry.0 += u64::from(line.quantity);
                entry.1 += line.subtotal();
            }
        }

        let average_order_value = if order_count == 0 {
            Money::ZERO
        } else {
            Money::new((revenue.value() / Decimal::from(order_count)).round_dp(2))
        };

        let mut products: Vec<ProductSales> = per_product
            .into_iter()
            .map(|(product_id, (units, revenue))| ProductSales {
                product_id,
                units,
                revenue,
            })
            .collect();
        products.sort_by(|a, b| {
            b.revenue
                .value()
                .cmp(&a.revenue.value())
                .then(a.product_id.cmp(&b.product_id))
        });

        let daily = per_day
            .into_iter()
            .map(|(date, (orders, revenue))| DailySales {
                date,
                orders,
                revenue,
            })
            .collect();

        Self {
            order_count,
            revenue,
            average_order_value,
            products,
            daily,
        }
    }
}

fn is_sale(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Paid | OrderStatus::Shipped | OrderStatus::Delivered
    )
}

/// Records at or below their threshold, lowest stock first.
pub fn low_stock(records: impl IntoIterator<Item = InventoryRecord>) -> Vec<InventoryRecord> {
    let mut low: Vec<InventoryRecord> = records
        .into_iter()
        .filter(InventoryRecord::is_low_stock)
        .collect();
    low.sort_by_key(|r| (r.available, r.product_id));
    low
}
