//! # tiercache-store
//!
//! Level store adapters consumed by the tiercache orchestration engine.
//!
//! - [`RequestStore`]: request-scoped map, ignores TTL
//! - [`MemoryStore`]: bounded LRU tier with TTL and tags
//! - [`SqliteStore`]: persistent tier with housekeeping (feature `sqlite`)

pub mod error;
pub mod memory;
pub mod request;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, MemoryStoreMetrics};
pub use request::RequestStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::{LevelStore, StoreFootprint, StoreMaintenance, StoreSnapshot};
