use crate::domain::money::{Money, UnitPrice};
use crate::domain::payment::ProviderVariant;
use crate::domain::{OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    AwaitingPayment,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Looks up the edge for `event`. `None` means the edge does not exist.
    pub fn next(&self, event: OrderEvent) -> Option<OrderStatus> {
        use OrderEvent::*;
        use OrderStatus::*;
        match (self, event) {
            (Pending, PaymentInitiated) => Some(AwaitingPayment),
            (AwaitingPayment, PaymentConfirmed) => Some(Paid),
            (AwaitingPayment, PaymentCancelled | PaymentTimedOut) => Some(Cancelled),
            (Pending | AwaitingPayment, UserCancelled) => Some(Cancelled),
            (Pending | AwaitingPayment | Paid, AdminCancelled) => Some(Cancelled),
            (Paid, MarkShipped) => Some(Shipped),
            (Shipped, MarkDelivered) => Some(Delivered),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that may ask an order to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderEvent {
    PaymentInitiated,
    PaymentConfirmed,
    PaymentCancelled,
    PaymentTimedOut,
    UserCancelled,
    AdminCancelled,
    MarkShipped,
    MarkDelivered,
}

impl OrderEvent {
    /// The status this event leads to when its edge exists. Used to spot
    /// duplicate deliveries: an order already sitting in the target status.
    pub fn target(&self) -> OrderStatus {
        match self {
            OrderEvent::PaymentInitiated => OrderStatus::AwaitingPayment,
            OrderEvent::PaymentConfirmed => OrderStatus::Paid,
            OrderEvent::PaymentCancelled
            | OrderEvent::PaymentTimedOut
            | OrderEvent::UserCancelled
            | OrderEvent::AdminCancelled => OrderStatus::Cancelled,
            OrderEvent::MarkShipped => OrderStatus::Shipped,
            OrderEvent::MarkDelivered => OrderStatus::Delivered,
        }
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderEvent::PaymentInitiated => "payment_initiated",
            OrderEvent::PaymentConfirmed => "payment_confirmed",
            OrderEvent::PaymentCancelled => "payment_cancelled",
            OrderEvent::PaymentTimedOut => "payment_timed_out",
            OrderEvent::UserCancelled => "user_cancelled",
            OrderEvent::AdminCancelled => "admin_cancelled",
            OrderEvent::MarkShipped => "mark_shipped",
            OrderEvent::MarkDelivered => "mark_delivered",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: UnitPrice,
}

impl LineItem {
    pub fn subtotal(&self) -> Money {
        Money::from(self.unit_price) * self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<LineItem>,
    /// Fixed at creation; never recomputed.
    pub total: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provider: Option<ProviderVariant>,
    pub provider_reference: Option<String>,
    /// Set from the settling callback when the provider reports its own id.
    #[serde(default)]
    pub provider_transaction: Option<String>,
}

impl Order {
    pub fn new(id: OrderId, user_id: UserId, lines: Vec<LineItem>) -> Self {
        let now = Utc::now();
        let total = lines.iter().map(LineItem::subtotal).sum();
        Self {
            id,
            user_id,
            lines,
            total,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            provider: None,
            provider_reference: None,
            provider_transaction: None,
        }
    }

    pub fn units(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}
