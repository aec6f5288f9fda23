use crate::application::locks::KeyedLocks;
use crate::domain::inventory::{InventoryRecord, Movement, MovementKind, ReservationBalance};
use crate::domain::ports::{InventoryStoreRef, MovementFilter};
use crate::domain::{OrderId, ProductId};
use crate::error::{OrderError, Result};
use chrono::Utc;
use tracing::{debug, error};

/// Result of settling one order line against its reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Applied(Movement),
    /// The log already shows this line settled the same way; nothing written.
    AlreadySettled,
}

/// Authoritative stock counts behind an append-only movement log.
///
/// Every mutation for a product runs under that product's lock: read the
/// record, check, write record and movement together. This is the only thing
/// standing between concurrent checkouts and an oversell.
pub struct InventoryLedger {
    store: InventoryStoreRef,
    locks: KeyedLocks<ProductId>,
}

impl InventoryLedger {
    pub fn new(store: InventoryStoreRef) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Creates an empty record for `product_id` unless one exists.
    pub async fn register(
        &self,
        product_id: ProductId,
        low_stock_threshold: u32,
    ) -> Result<InventoryRecord> {
        let _guard = self.locks.lock(product_id).await;
        if let Some(record) = self.store.get(product_id).await? {
            return Ok(record);
        }
        let record = InventoryRecord::new(product_id, low_stock_threshold);
        self.store.store(record.clone()).await?;
        Ok(record)
    }

    pub async fn set_low_stock_threshold(
        &self,
        product_id: ProductId,
        threshold: u32,
    ) -> Result<InventoryRecord> {
        let _guard = self.locks.lock(product_id).await;
        let mut record = self.load(product_id).await?;
        record.low_stock_threshold = threshold;
        self.store.store(record.clone()).await?;
        Ok(record)
    }

    pub async fn record(&self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        self.store.get(product_id).await
    }

    pub async fn reserve(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<Movement> {
        let _guard = self.locks.lock(product_id).await;
        let mut record = self.load(product_id).await?;
        record.reserve(quantity)?;
        let movement = Movement::new(
            product_id,
            MovementKind::Reserve,
            -i64::from(quantity),
            Some(order_id),
            format!("reserved for order {order_id}"),
        );
        let movement = self.store.append(record, movement).await?;
        debug!(product_id, order_id, quantity, "stock reserved");
        Ok(movement)
    }

    /// Turns an outstanding reservation into a permanent decrement.
    pub async fn commit(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<Movement> {
        match self.settle(MovementKind::Commit, product_id, quantity, order_id, true).await? {
            Settlement::Applied(movement) => Ok(movement),
            Settlement::AlreadySettled => {
                Err(OrderError::internal("strict commit reported settled"))
            }
        }
    }

    /// Hands an outstanding reservation back to the sellable pool.
    pub async fn release(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<Movement> {
        match self.settle(MovementKind::Release, product_id, quantity, order_id, true).await? {
            Settlement::Applied(movement) => Ok(movement),
            Settlement::AlreadySettled => {
                Err(OrderError::internal("strict release reported settled"))
            }
        }
    }

    /// Like `commit`/`release`, but a line the log already shows settled the
    /// same way is reported as `AlreadySettled` instead of failing. Used when
    /// an order transition is replayed after a partial failure.
    pub async fn settle_line(
        &self,
        kind: MovementKind,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<Settlement> {
        self.settle(kind, product_id, quantity, order_id, false).await
    }

    pub async fn restock(
        &self,
        product_id: ProductId,
        quantity: u32,
        reason: &str,
    ) -> Result<Movement> {
        let _guard = self.locks.lock(product_id).await;
        let mut record = self.load(product_id).await?;
        let now = Utc::now();
        record.restock(quantity, now)?;
        let mut movement = Movement::new(
            product_id,
            MovementKind::Restock,
            i64::from(quantity),
            None,
            reason,
        );
        movement.created_at = now;
        self.store.append(record, movement).await
    }

    /// Restocks committed stock of a cancelled order, keyed by the order:
    /// a line whose return is already in the log is `AlreadySettled`.
    pub async fn return_line(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<Settlement> {
        let _guard = self.locks.lock(product_id).await;
        let balance = self.reservation(product_id, order_id).await?;
        if balance.returned >= quantity {
            debug!(product_id, order_id, "line already returned");
            return Ok(Settlement::AlreadySettled);
        }
        let mut record = self.load(product_id).await?;
        let now = Utc::now();
        record.restock(quantity, now)?;
        let mut movement = Movement::new(
            product_id,
            MovementKind::Restock,
            i64::from(quantity),
            Some(order_id),
            format!("returned from cancelled order {order_id}"),
        );
        movement.created_at = now;
        Ok(Settlement::Applied(self.store.append(record, movement).await?))
    }

    pub async fn adjust(
        &self,
        product_id: ProductId,
        delta: i64,
        reason: &str,
    ) -> Result<Movement> {
        let _guard = self.locks.lock(product_id).await;
        let mut record = self.load(product_id).await?;
        record.adjust(delta)?;
        let movement = Movement::new(product_id, MovementKind::Adjust, delta, None, reason);
        self.store.append(record, movement).await
    }

    /// Reservation accounting for one order line, rebuilt from the log.
    pub async fn reservation(
        &self,
        product_id: ProductId,
        order_id: OrderId,
    ) -> Result<ReservationBalance> {
        let movements = self
            .store
            .movements(MovementFilter {
                product_id: Some(product_id),
                order_id: Some(order_id),
            })
            .await?;
        Ok(ReservationBalance::from_movements(product_id, order_id, &movements))
    }

    async fn settle(
        &self,
        kind: MovementKind,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
        strict: bool,
    ) -> Result<Settlement> {
        let _guard = self.locks.lock(product_id).await;
        let balance = self.reservation(product_id, order_id).await?;

        if balance.outstanding() < quantity {
            let settled = match kind {
                MovementKind::Commit => balance.committed >= quantity,
                _ => balance.released >= quantity,
            };
            if !strict && balance.outstanding() == 0 && settled {
                debug!(product_id, order_id, %kind, "line already settled");
                return Ok(Settlement::AlreadySettled);
            }
            error!(
                product_id,
                order_id,
                %kind,
                requested = quantity,
                outstanding = balance.outstanding(),
                "no matching reservation"
            );
            return Err(OrderError::NoSuchReservation {
                product_id,
                order_id,
                requested: quantity,
            });
        }

        let mut record = self.load(product_id).await?;
        let (delta, reason) = match kind {
            MovementKind::Commit => {
                record.commit(quantity, order_id)?;
                (-i64::from(quantity), format!("sold on order {order_id}"))
            }
            MovementKind::Release => {
                record.release(quantity, order_id)?;
                (i64::from(quantity), format!("released from order {order_id}"))
            }
            other => {
                return Err(OrderError::internal(format!("cannot settle a {other} movement")));
            }
        };
        let movement = Movement::new(product_id, kind, delta, Some(order_id), reason);
        let movement = self.store.append(record, movement).await?;
        debug!(product_id, order_id, %kind, quantity, "reservation settled");
        Ok(Settlement::Applied(movement))
    }

    async fn load(&self, product_id: ProductId) -> Result<InventoryRecord> {
        self.store
            .get(product_id)
            .await?
            .ok_or(OrderError::UnknownProduct { product_id })
    }
}
