//! Outer adapters driving the engine. Only CSV for now.

pub mod csv;
