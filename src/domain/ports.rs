use super::inventory::{InventoryRecord, Movement};
use super::order::Order;
use super::payment::{AttemptStatus, PaymentAttempt, ProviderVariant};
use super::{AttemptId, OrderId, ProductId};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn next_id(&self) -> Result<OrderId>;
    async fn store(&self, order: Order) -> Result<()>;
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;
    async fn get_all(&self) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn next_id(&self) -> Result<AttemptId>;
    async fn store(&self, attempt: PaymentAttempt) -> Result<()>;
    async fn get(&self, attempt_id: AttemptId) -> Result<Option<PaymentAttempt>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentAttempt>>;
    async fn for_order(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>>;
    async fn with_status(&self, status: AttemptStatus) -> Result<Vec<PaymentAttempt>>;
}

/// Selects movements from the stock log. Empty fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub order_id: Option<OrderId>,
}

impl MovementFilter {
    pub fn product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            order_id: None,
        }
    }

    pub fn matches(&self, movement: &Movement) -> bool {
        self.product_id.is_none_or(|p| movement.product_id == p)
            && self.order_id.is_none_or(|o| movement.order_id == Some(o))
    }
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>>;
    /// Saves a record without logging a movement (threshold edits, creation).
    async fn store(&self, record: InventoryRecord) -> Result<()>;
    /// Saves `record` and appends `movement` as one unit, assigning its `seq`.
    async fn append(&self, record: InventoryRecord, movement: Movement) -> Result<Movement>;
    async fn get_all(&self) -> Result<Vec<InventoryRecord>>;
    async fn movements(&self, filter: MovementFilter) -> Result<Vec<Movement>>;
}

#[async_trait]
pub trait PriceCatalog: Send + Sync {
    async fn unit_price(&self, product_id: ProductId) -> Result<Option<Decimal>>;
    async fn set_price(&self, product_id: ProductId, price: Decimal) -> Result<()>;
}

/// The request/response contract to an external payment provider.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn call(
        &self,
        variant: ProviderVariant,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type AttemptStoreRef = Arc<dyn AttemptStore>;
pub type InventoryStoreRef = Arc<dyn InventoryStore>;
pub type PriceCatalogRef = Arc<dyn PriceCatalog>;
pub type ProviderTransportRef = Arc<dyn ProviderTransport>;

/// The persisted state of the engine, bundled.
#[derive(Clone)]
pub struct Stores {
    pub orders: OrderStoreRef,
    pub attempts: AttemptStoreRef,
    pub inventory: InventoryStoreRef,
    pub catalog: PriceCatalogRef,
}
