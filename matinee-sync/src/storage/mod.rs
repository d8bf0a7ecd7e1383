//! Persistent storage for room records.
//!
//! ```text
//! ┌──────────────┐   load / save    ┌──────────────┐
//! │RoomReconciler│ ───────────────► │ RoomDb       │
//! │              │                  │ (RocksDB)    │
//! └──────────────┘                  └──────┬───────┘
//!                                          │ column families
//!                                          ▼
//!                     ┌────────────────────────────────────┐
//!                     │ CF "videos"      — video identifier │
//!                     │ CF "simulations" — simulator state  │
//!                     │ CF "metadata"    — room bookkeeping │
//!                     └────────────────────────────────────┘
//! ```
//!
//! The two room sub-fields live in separate column families because the
//! reconciler updates them independently: a drift correction rewrites only
//! the simulation, a video change rewrites both atomically.
//!
//! [`MemoryRoomStore`] backs tests and storage-less servers.

pub mod memory;
pub mod rocks;

pub use memory::MemoryRoomStore;
pub use rocks::{RoomDb, StoreConfig};

use matinee_core::RoomId;

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Room not found
    NotFound(RoomId),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Room not found: {id}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
