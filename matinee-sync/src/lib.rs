//! # matinee-sync — Watch-party synchronization for Matinee
//!
//! Keeps every participant of a room seeing the same play/pause status and
//! the same playback position within a small tolerance, despite differing
//! local clocks and network latency.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ WatchClient │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │    Binary Proto     │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌──────────────┐
//! │ Local player│                     │RoomReconciler│
//! │ (reports)   │                     │ (authority)  │
//! └─────────────┘                     └──────┬───────┘
//!                                            │
//!                                   ┌────────┴────────┐
//!                                   │   RoomStore     │
//!                                   │ BroadcastGroup  │
//!                                   └─────────────────┘
//! ```
//!
//! The server never pushes a timeline of its own: each room's authoritative
//! position lives in a `matinee-core` [`PlaybackSimulator`], clients report
//! what their players are doing, and the [`reconcile::RoomReconciler`]
//! decides when a report has drifted far enough to re-anchor the room and
//! correct everyone else.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded SyncMessage)
//! - [`reconcile`] — Drift/status reconciliation policy
//! - [`broadcast`] — Room-based fan-out with backpressure
//! - [`storage`] — Room persistence (RocksDB or in-memory)
//! - [`server`] — WebSocket watch server
//! - [`client`] — WebSocket watch client

pub mod protocol;
pub mod reconcile;
pub mod broadcast;
pub mod storage;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use matinee_core::{
    extract_video_id, wall_clock_secs, PlaybackSimulator, PlaybackSnapshot, PlaybackStatus, Room,
    RoomId,
};
pub use protocol::{
    ClientReport, MessageType, PeerInfo, PlayerStatusCode, ProtocolError, SyncMessage,
};
pub use reconcile::{
    BroadcastError, Correction, ReconcileError, RoomBroadcast, RoomEvent, RoomReconciler,
    RoomStore, DRIFT_TOLERANCE_SECS,
};
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomFanout, RoomManager};
pub use storage::{MemoryRoomStore, RoomDb, StoreConfig, StoreError};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use client::{ConnectionState, WatchClient, WatchEvent};
