pub mod backend;
pub mod memory;
pub mod store;

#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use backend::{DealRegistryBackend, RegistryError, RegistryStats, Result};
pub use memory::MemoryRegistry;
pub use store::{BackendType, DealStore, RegistryConfig, RegistryRecord};

#[cfg(feature = "rocksdb")]
pub use rocks::RocksRegistry;
