use crate::domain::{OrderId, ProductId};
use crate::error::{OrderError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stock position of one product.
///
/// `available` already excludes reservations, so a reservation only ever has
/// to compare against `available`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    pub low_stock_threshold: u32,
    pub last_restocked_at: Option<DateTime<Utc>>,
}

impl InventoryRecord {
    pub fn new(product_id: ProductId, low_stock_threshold: u32) -> Self {
        Self {
            product_id,
            available: 0,
            reserved: 0,
            low_stock_threshold,
            last_restocked_at: None,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.available <= self.low_stock_threshold
    }

    /// Moves `quantity` from available into reserved.
    pub fn reserve(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        if self.available < quantity {
            return Err(OrderError::InsufficientStock {
                product_id: self.product_id,
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        self.reserved += quantity;
        Ok(())
    }

    /// Drops `quantity` from reserved for good; available was taken at reserve time.
    pub fn commit(&mut self, quantity: u32, order_id: OrderId) -> Result<()> {
        self.check_quantity(quantity)?;
        self.reserved = self
            .reserved
            .checked_sub(quantity)
            .ok_or(OrderError::NoSuchReservation {
                product_id: self.product_id,
                order_id,
                requested: quantity,
            })?;
        Ok(())
    }

    /// Returns `quantity` from reserved to available.
    pub fn release(&mut self, quantity: u32, order_id: OrderId) -> Result<()> {
        self.check_quantity(quantity)?;
        self.reserved = self
            .reserved
            .checked_sub(quantity)
            .ok_or(OrderError::NoSuchReservation {
                product_id: self.product_id,
                order_id,
                requested: quantity,
            })?;
        self.available += quantity;
        Ok(())
    }

    pub fn restock(&mut self, quantity: u32, at: DateTime<Utc>) -> Result<()> {
        self.check_quantity(quantity)?;
        self.available = self.available.checked_add(quantity).ok_or_else(|| {
            OrderError::InvalidQuantity {
                product_id: self.product_id,
                quantity: i64::from(quantity),
            }
        })?;
        self.last_restocked_at = Some(at);
        Ok(())
    }

    /// Applies a signed manual correction. A negative delta may not take
    /// available below zero.
    pub fn adjust(&mut self, delta: i64) -> Result<()> {
        if delta == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: self.product_id,
                quantity: 0,
            });
        }
        let next = i64::from(self.available) + delta;
        if next < 0 {
            return Err(OrderError::InsufficientStock {
                product_id: self.product_id,
                requested: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
                available: self.available,
            });
        }
        self.available = u32::try_from(next).map_err(|_| OrderError::InvalidQuantity {
            product_id: self.product_id,
            quantity: delta,
        })?;
        Ok(())
    }

    fn check_quantity(&self, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: self.product_id,
                quantity: 0,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Reserve,
    Release,
    Commit,
    Restock,
    Adjust,
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MovementKind::Reserve => "reserve",
            MovementKind::Release => "release",
            MovementKind::Commit => "commit",
            MovementKind::Restock => "restock",
            MovementKind::Adjust => "adjust",
        };
        f.write_str(name)
    }
}

/// One immutable line of the stock log.
///
/// `delta` is negative when stock leaves the sellable pool (reserve, commit,
/// negative adjust) and positive when it comes back (release, restock).
/// `seq` is assigned by the store when the movement is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub seq: u64,
    pub product_id: ProductId,
    pub delta: i64,
    pub kind: MovementKind,
    pub order_id: Option<OrderId>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn new(
        product_id: ProductId,
        kind: MovementKind,
        delta: i64,
        order_id: Option<OrderId>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            product_id,
            delta,
            kind,
            order_id,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }

    pub fn quantity(&self) -> u32 {
        u32::try_from(self.delta.unsigned_abs()).unwrap_or(u32::MAX)
    }
}

/// Reservation accounting for one (order, product) pair, rebuilt from the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationBalance {
    pub reserved: u32,
    pub committed: u32,
    pub released: u32,
    /// Committed stock restocked after the order was cancelled.
    pub returned: u32,
}

impl ReservationBalance {
    pub fn from_movements<'a>(
        product_id: ProductId,
        order_id: OrderId,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> Self {
        movements
            .into_iter()
            .filter(|m| m.product_id == product_id && m.order_id == Some(order_id))
            .fold(Self::default(), |mut acc, m| {
                match m.kind {
                    MovementKind::Reserve => acc.reserved += m.quantity(),
                    MovementKind::Commit => acc.committed += m.quantity(),
                    MovementKind::Release => acc.released += m.quantity(),
                    MovementKind::Restock => acc.returned += m.quantity(),
                    MovementKind::Adjust => {}
                }
                acc
            })
    }

    pub fn outstanding(&self) -> u32 {
        self.reserved
            .saturating_sub(self.committed)
            .saturating_sub(self.released)
    }
}
