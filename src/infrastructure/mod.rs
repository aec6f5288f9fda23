//! Adapters for the domain ports: storage backends and the sandbox provider.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod sandbox;
