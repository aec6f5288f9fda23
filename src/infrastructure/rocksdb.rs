use crate::domain::inventory::{InventoryRecord, Movement};
use crate::domain::order::Order;
use crate::domain::payment::{AttemptStatus, PaymentAttempt};
use crate::domain::ports::{
    AttemptStore, InventoryStore, MovementFilter, OrderStore, PriceCatalog, Stores,
};
use crate::domain::{AttemptId, OrderId, ProductId};
use crate::error::{OrderError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Column Family for order snapshots, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for payment attempts, keyed by attempt id.
pub const CF_ATTEMPTS: &str = "attempts";
/// Column Family mapping provider references to attempt ids.
pub const CF_ATTEMPT_REFS: &str = "attempt_refs";
/// Column Family for per-product stock records.
pub const CF_INVENTORY: &str = "inventory";
/// Column Family for the append-only movement log, keyed by sequence.
pub const CF_MOVEMENTS: &str = "movements";
/// Column Family for catalog prices.
pub const CF_PRICES: &str = "prices";
/// Column Family for counters that must outlive the rows they number.
pub const CF_META: &str = "meta";

const ORDER_SEQ_KEY: &[u8] = b"order_seq";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_ORDERS,
    CF_ATTEMPTS,
    CF_ATTEMPT_REFS,
    CF_INVENTORY,
    CF_MOVEMENTS,
    CF_PRICES,
    CF_META,
];

/// A persistent store backed by RocksDB.
///
/// One database holds every entity in its own Column Family. Integer keys are
/// big-endian so iteration follows id order, which is also how the attempt
/// and movement counters are recovered when the database is reopened. Order
/// ids are also handed out to conversions that later fail and never store an
/// order, so the order counter is persisted in `meta` as each id is issued.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    order_seq: Arc<Mutex<u64>>,
    attempt_seq: Arc<AtomicU64>,
    movement_seq: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let mut store = Self {
            db: Arc::new(db),
            order_seq: Arc::default(),
            attempt_seq: Arc::default(),
            movement_seq: Arc::default(),
        };
        let issued = store.last_key(CF_ORDERS)?.max(store.persisted_order_seq()?);
        store.order_seq = Arc::new(Mutex::new(issued));
        store.attempt_seq = Arc::new(AtomicU64::new(store.last_key(CF_ATTEMPTS)?));
        store.movement_seq = Arc::new(AtomicU64::new(store.last_key(CF_MOVEMENTS)?));
        Ok(store)
    }

    /// All four ports served by this one database.
    pub fn into_stores(self) -> Stores {
        Stores {
            orders: Arc::new(self.clone()),
            attempts: Arc::new(self.clone()),
            inventory: Arc::new(self.clone()),
            catalog: Arc::new(self),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| OrderError::internal(format!("{name} column family not found")))
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn persisted_order_seq(&self) -> Result<u64> {
        match self.db.get_pinned_cf(self.cf(CF_META)?, ORDER_SEQ_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    OrderError::internal("meta holds an order counter that is not a u64")
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Highest u64 key in `cf_name`, or 0 when empty.
    fn last_key(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf(cf_name)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _value) = item?;
                let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    OrderError::internal(format!("{cf_name} holds a key that is not a u64"))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn next_id(&self) -> Result<OrderId> {
        let mut seq = self
            .order_seq
            .lock()
            .map_err(|_| OrderError::internal("order counter lock poisoned"))?;
        let id = *seq + 1;
        self.db.put_cf(self.cf(CF_META)?, ORDER_SEQ_KEY, id.to_be_bytes())?;
        *seq = id;
        Ok(id)
    }

    async fn store(&self, order: Order) -> Result<()> {
        self.put(CF_ORDERS, &order.id.to_be_bytes(), &order)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.read(CF_ORDERS, &order_id.to_be_bytes())
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        self.scan(CF_ORDERS)
    }
}

#[async_trait]
impl AttemptStore for RocksDBStore {
    async fn next_id(&self) -> Result<AttemptId> {
        Ok(self.attempt_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn store(&self, attempt: PaymentAttempt) -> Result<()> {
        let key = attempt.id.to_be_bytes();
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ATTEMPTS)?, key, serde_json::to_vec(&attempt)?);
        if let Some(reference) = &attempt.provider_reference {
            batch.put_cf(self.cf(CF_ATTEMPT_REFS)?, reference.as_bytes(), key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, attempt_id: AttemptId) -> Result<Option<PaymentAttempt>> {
        self.read(CF_ATTEMPTS, &attempt_id.to_be_bytes())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentAttempt>> {
        let cf = self.cf(CF_ATTEMPT_REFS)?;
        match self.db.get_pinned_cf(cf, reference.as_bytes())? {
            Some(id) => self.read(CF_ATTEMPTS, &id),
            None => Ok(None),
        }
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let attempts: Vec<PaymentAttempt> = self.scan(CF_ATTEMPTS)?;
        Ok(attempts
            .into_iter()
            .filter(|a| a.order_id == order_id)
            .collect())
    }

    async fn with_status(&self, status: AttemptStatus) -> Result<Vec<PaymentAttempt>> {
        let attempts: Vec<PaymentAttempt> = self.scan(CF_ATTEMPTS)?;
        Ok(attempts.into_iter().filter(|a| a.status == status).collect())
    }
}

#[async_trait]
impl InventoryStore for RocksDBStore {
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        self.read(CF_INVENTORY, &product_id.to_be_bytes())
    }

    async fn store(&self, record: InventoryRecord) -> Result<()> {
        self.put(CF_INVENTORY, &record.product_id.to_be_bytes(), &record)
    }

    async fn append(&self, record: InventoryRecord, mut movement: Movement) -> Result<Movement> {
        movement.seq = self.movement_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_INVENTORY)?,
            record.product_id.to_be_bytes(),
            serde_json::to_vec(&record)?,
        );
        batch.put_cf(
            self.cf(CF_MOVEMENTS)?,
            movement.seq.to_be_bytes(),
            serde_json::to_vec(&movement)?,
        );
        self.db.write(batch)?;
        Ok(movement)
    }

    async fn get_all(&self) -> Result<Vec<InventoryRecord>> {
        self.scan(CF_INVENTORY)
    }

    async fn movements(&self, filter: MovementFilter) -> Result<Vec<Movement>> {
        let movements: Vec<Movement> = self.scan(CF_MOVEMENTS)?;
        Ok(movements.into_iter().filter(|m| filter.matches(m)).collect())
    }
}

#[async_trait]
impl PriceCatalog for RocksDBStore {
    async fn unit_price(&self, product_id: ProductId) -> Result<Option<Decimal>> {
        self.read(CF_PRICES, &product_id.to_be_bytes())
    }

    async fn set_price(&self, product_id: ProductId, price: Decimal) -> Result<()> {
        self.put(CF_PRICES, &product_id.to_be_bytes(), &price)
    }
}
