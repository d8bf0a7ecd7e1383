//! In-memory room store for tests and storage-less servers.

use std::collections::HashMap;
use std::sync::RwLock;

use matinee_core::{PlaybackSnapshot, Room, RoomId};

use crate::reconcile::RoomStore;
use crate::storage::StoreError;

/// Per-room record with independently written sub-fields, mirroring the
/// column-family layout of the RocksDB store.
#[derive(Debug, Clone, Default)]
struct MemoryRecord {
    video_id: Option<String>,
    simulation: Option<PlaybackSnapshot>,
}

/// `RoomStore` backed by a `HashMap`. Same existence contract as [`super::RoomDb`]:
/// a room exists iff its simulation has been written.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, MemoryRecord>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with a simulation record.
    pub fn room_count(&self) -> usize {
        self.rooms
            .read()
            .map(|rooms| rooms.values().filter(|r| r.simulation.is_some()).count())
            .unwrap_or(0)
    }
}

impl RoomStore for MemoryRoomStore {
    fn load(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        let rooms = self
            .rooms
            .read()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(rooms.get(room_id).and_then(|record| {
            let simulation = record.simulation?;
            Some(Room {
                video_id: record.video_id.clone().unwrap_or_default(),
                simulation,
            })
        }))
    }

    fn save(&self, room_id: &RoomId, room: &Room) -> Result<(), StoreError> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        rooms.insert(
            room_id.clone(),
            MemoryRecord {
                video_id: Some(room.video_id.clone()),
                simulation: Some(room.simulation),
            },
        );
        Ok(())
    }

    fn save_simulation(
        &self,
        room_id: &RoomId,
        simulation: &PlaybackSnapshot,
    ) -> Result<(), StoreError> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        rooms.entry(room_id.clone()).or_default().simulation = Some(*simulation);
        Ok(())
    }

    fn save_video(&self, room_id: &RoomId, video_id: &str) -> Result<(), StoreError> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        rooms.entry(room_id.clone()).or_default().video_id = Some(video_id.to_string());
        Ok(())
    }
}
