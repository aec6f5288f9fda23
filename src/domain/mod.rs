//! Domain layer: entities, value objects and the ports the application layer
//! drives. Nothing in here performs I/O or takes locks.

pub mod cart;
pub mod inventory;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;

pub type ProductId = u32;
pub type UserId = u32;
pub type OrderId = u64;
pub type AttemptId = u64;
