use crate::domain::inventory::{InventoryRecord, Movement};
use crate::domain::order::Order;
use crate::domain::payment::{AttemptStatus, PaymentAttempt};
use crate::domain::ports::{
    AttemptStore, InventoryStore, MovementFilter, OrderStore, PriceCatalog, Stores,
};
use crate::domain::{AttemptId, OrderId, ProductId};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Builds a complete set of in-memory stores.
pub fn in_memory_stores() -> Stores {
    Stores {
        orders: Arc::new(InMemoryOrderStore::new()),
        attempts: Arc::new(InMemoryAttemptStore::new()),
        inventory: Arc::new(InMemoryInventoryStore::new()),
        catalog: Arc::new(InMemoryPriceCatalog::new()),
    }
}

/// A thread-safe in-memory store for orders.
///
/// Ids come from an atomic counter starting at 1.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<BTreeMap<OrderId, Order>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn next_id(&self) -> Result<OrderId> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn store(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&order_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.values().cloned().collect())
    }
}

#[derive(Default)]
struct AttemptTable {
    attempts: BTreeMap<AttemptId, PaymentAttempt>,
    by_reference: HashMap<String, AttemptId>,
}

/// A thread-safe in-memory store for payment attempts, indexed by provider
/// reference.
#[derive(Default, Clone)]
pub struct InMemoryAttemptStore {
    table: Arc<RwLock<AttemptTable>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn next_id(&self) -> Result<AttemptId> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn store(&self, attempt: PaymentAttempt) -> Result<()> {
        let mut table = self.table.write().await;
        if let Some(reference) = &attempt.provider_reference {
            table.by_reference.insert(reference.clone(), attempt.id);
        }
        table.attempts.insert(attempt.id, attempt);
        Ok(())
    }

    async fn get(&self, attempt_id: AttemptId) -> Result<Option<PaymentAttempt>> {
        let table = self.table.read().await;
        Ok(table.attempts.get(&attempt_id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentAttempt>> {
        let table = self.table.read().await;
        Ok(table
            .by_reference
            .get(reference)
            .and_then(|id| table.attempts.get(id))
            .cloned())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let table = self.table.read().await;
        Ok(table
            .attempts
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn with_status(&self, status: AttemptStatus) -> Result<Vec<PaymentAttempt>> {
        let table = self.table.read().await;
        Ok(table
            .attempts
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct InventoryTable {
    records: BTreeMap<ProductId, InventoryRecord>,
    movements: Vec<Movement>,
}

/// A thread-safe in-memory inventory: records plus the append-only log.
///
/// Record and movement are written under one write lock, so readers never
/// see one without the other.
#[derive(Default, Clone)]
pub struct InMemoryInventoryStore {
    table: Arc<RwLock<InventoryTable>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        let table = self.table.read().await;
        Ok(table.records.get(&product_id).cloned())
    }

    async fn store(&self, record: InventoryRecord) -> Result<()> {
        let mut table = self.table.write().await;
        table.records.insert(record.product_id, record);
        Ok(())
    }

    async fn append(&self, record: InventoryRecord, mut movement: Movement) -> Result<Movement> {
        let mut table = self.table.write().await;
        movement.seq = table.movements.len() as u64 + 1;
        table.records.insert(record.product_id, record);
        table.movements.push(movement.clone());
        Ok(movement)
    }

    async fn get_all(&self) -> Result<Vec<InventoryRecord>> {
        let table = self.table.read().await;
        Ok(table.records.values().cloned().collect())
    }

    async fn movements(&self, filter: MovementFilter) -> Result<Vec<Movement>> {
        let table = self.table.read().await;
        Ok(table
            .movements
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }
}

/// Current catalog prices, re-read at every conversion.
#[derive(Default, Clone)]
pub struct InMemoryPriceCatalog {
    prices: Arc<RwLock<HashMap<ProductId, Decimal>>>,
}

impl InMemoryPriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceCatalog for InMemoryPriceCatalog {
    async fn unit_price(&self, product_id: ProductId) -> Result<Option<Decimal>> {
        let prices = self.prices.read().await;
        Ok(prices.get(&product_id).copied())
    }

    async fn set_price(&self, product_id: ProductId, price: Decimal) -> Result<()> {
        let mut prices = self.prices.write().await;
        prices.insert(product_id, price);
        Ok(())
    }
}
