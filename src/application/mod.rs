//! Application layer: the order lifecycle built on top of the domain ports.
//!
//! `OrderEngine` is the entry point. Underneath it the inventory ledger owns
//! stock, the state machine owns order status, the gateways speak to payment
//! providers and the coordinator reconciles what providers report back.

pub mod converter;
pub mod coordinator;
pub mod engine;
pub mod gateway;
pub mod ledger;
pub mod locks;
pub mod reports;
pub mod state_machine;
