//! Fan-out broadcast to N-1 participants of a watch room.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! participant gets an independent receiver that buffers up to `capacity`
//! messages; the channel carries pre-encoded bytes so fan-out never
//! re-serializes. The origin's own message is included in the channel and
//! dropped by its receiving connection (filtering by peer id), matching the
//! protocol contract that corrections reach everyone except the origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use matinee_core::RoomId;

use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};
use crate::reconcile::{BroadcastError, RoomBroadcast, RoomEvent};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// A broadcast group for a single watch room.
///
/// All participants in the room share one broadcast channel; a correction
/// is fanned out once and every receiver picks it up.
pub struct BroadcastGroup {
    /// Broadcast channel sender (cloned per-room)
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Connected participants in this room
    peers: RwLock<HashMap<Uuid, PeerInfo>>,

    /// Channel capacity (messages buffered per receiver)
    capacity: usize,

    /// Lock-free send counter
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    ///
    /// `capacity` determines how many messages can be buffered per receiver
    /// before a lagging participant starts dropping messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a participant. Returns the receiver for their connection task.
    pub fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        if let Ok(mut peers) = self.peers.write() {
            peers.insert(info.peer_id, info);
        }
        self.sender.subscribe()
    }

    /// Remove a participant.
    pub fn remove_peer(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        self.peers.write().ok()?.remove(peer_id)
    }

    /// Broadcast a message to the room.
    ///
    /// Encodes once, fans out pre-encoded bytes. Returns the number of
    /// receivers; zero receivers is not an error.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly (zero-copy fast path).
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Get the current participant count.
    pub fn peer_count(&self) -> usize {
        self.peers.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Get all connected participants.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a participant is connected.
    pub fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers
            .read()
            .map(|p| p.contains_key(peer_id))
            .unwrap_or(false)
    }

    /// Get broadcast statistics.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peer_count(),
        }
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to this broadcast group (raw receiver).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

/// Room manager: maps room ids to broadcast groups.
///
/// Each room gets its own group so corrections are isolated between rooms.
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    /// Create a new room manager.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get the broadcast group for a room, if anyone has joined it.
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().ok()?.get(room_id).cloned()
    }

    /// Get or create a room's broadcast group.
    pub fn get_or_create(&self, room_id: &RoomId) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        if let Ok(rooms) = self.rooms.read() {
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = match self.rooms.write() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        rooms
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    /// Remove an empty room's group.
    pub fn remove_if_empty(&self, room_id: &RoomId) -> bool {
        let mut rooms = match self.rooms.write() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(room) = rooms.get(room_id) {
            if room.peer_count() == 0 {
                rooms.remove(room_id);
                return true;
            }
        }
        false
    }

    /// Get the number of active rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Get all active room ids.
    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// The server's broadcast capability: turns a reconciler correction into a
/// wire message stamped with the origin's peer id and fans it out.
///
/// A room nobody has joined yet has no group; emitting into it is a no-op
/// success, not an error.
pub struct RoomFanout {
    rooms: Arc<RoomManager>,
}

impl RoomFanout {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self { rooms }
    }
}

impl RoomBroadcast for RoomFanout {
    fn emit(&self, room_id: &RoomId, origin: Uuid, event: RoomEvent) -> Result<(), BroadcastError> {
        let msg = match event {
            RoomEvent::Play => SyncMessage::play(origin, room_id.clone()),
            RoomEvent::Pause => SyncMessage::pause(origin, room_id.clone()),
            RoomEvent::Seek(elapsed) => SyncMessage::seek(origin, room_id.clone(), elapsed),
            RoomEvent::VideoChanged(video_id) => {
                SyncMessage::video_changed(origin, room_id.clone(), &video_id)
            }
        };

        if let Some(group) = self.rooms.get(room_id) {
            group
                .broadcast(&msg)
                .map_err(|e| BroadcastError::Encode(e.to_string()))?;
        }
        Ok(())
    }
}
