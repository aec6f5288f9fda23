use crate::application::reports::SalesReport;
use crate::domain::inventory::{InventoryRecord, Movement};
use crate::domain::order::Order;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct OrderRow {
    order: u64,
    user: u32,
    status: &'static str,
    total: String,
    provider: Option<&'static str>,
    reference: Option<String>,
}

#[derive(Serialize)]
struct InventoryRow {
    product: u32,
    available: u32,
    reserved: u32,
    threshold: u32,
    low_stock: bool,
}

#[derive(Serialize)]
struct MovementRow {
    seq: u64,
    product: u32,
    kind: String,
    delta: i64,
    order: Option<u64>,
    reason: String,
}

#[derive(Serialize)]
struct SalesRow {
    product: String,
    orders: Option<usize>,
    units: u64,
    revenue: String,
    average_order_value: Option<String>,
}

#[derive(Serialize)]
struct DailyRow {
    date: String,
    orders: usize,
    revenue: String,
}

/// Writes admin reports as CSV.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_orders(&mut self, orders: &[Order]) -> Result<()> {
        for order in orders {
            self.writer.serialize(OrderRow {
                order: order.id,
                user: order.user_id,
                status: order.status.as_str(),
                total: order.total.to_string(),
                provider: order.provider.map(|p| p.as_str()),
                reference: order.provider_reference.clone(),
            })?;
        }
        if orders.is_empty() {
            self.writer
                .write_record(["order", "user", "status", "total", "provider", "reference"])?;
        }
        self.flush()
    }

    pub fn write_inventory(&mut self, records: &[InventoryRecord]) -> Result<()> {
        for record in records {
            self.writer.serialize(InventoryRow {
                product: record.product_id,
                available: record.available,
                reserved: record.reserved,
                threshold: record.low_stock_threshold,
                low_stock: record.is_low_stock(),
            })?;
        }
        if records.is_empty() {
            self.writer
                .write_record(["product", "available", "reserved", "threshold", "low_stock"])?;
        }
        self.flush()
    }

    pub fn write_movements(&mut self, movements: &[Movement]) -> Result<()> {
        for movement in movements {
            self.writer.serialize(MovementRow {
                seq: movement.seq,
                product: movement.product_id,
                kind: movement.kind.to_string(),
                delta: movement.delta,
                order: movement.order_id,
                reason: movement.reason.clone(),
            })?;
        }
        if movements.is_empty() {
            self.writer
                .write_record(["seq", "product", "kind", "delta", "order", "reason"])?;
        }
        self.flush()
    }

    /// One `all` summary row, then one row per product.
    pub fn write_sales(&mut self, report: &SalesReport) -> Result<()> {
        self.writer.serialize(SalesRow {
            product: "all".to_string(),
            orders: Some(report.order_count),
            units: report.products.iter().map(|p| p.units).sum(),
            revenue: report.revenue.to_string(),
            average_order_value: Some(report.average_order_value.to_string()),
        })?;
        for product in &report.products {
            self.writer.serialize(SalesRow {
                product: product.product_id.to_string(),
                orders: None,
                units: product.units,
                revenue: product.revenue.to_string(),
                average_order_value: None,
            })?;
        }
        self.flush()
    }

    /// The per-day series of a sales report.
    pub fn write_daily_sales(&mut self, report: &SalesReport) -> Result<()> {
        for day in &report.daily {
            self.writer.serialize(DailyRow {
                date: day.date.to_string(),
                orders: day.orders,
                revenue: day.revenue.to_string(),
            })?;
        }
        if report.daily.is_empty() {
            self.writer.write_record(["date", "orders", "revenue"])?;
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
