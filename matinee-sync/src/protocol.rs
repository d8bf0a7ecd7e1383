//! Binary wire protocol for watch-room synchronization.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ room_id  │ payload  │
//! │ 1 byte   │ 16 bytes  │ variable │ variable │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! `peer_id` identifies the originating participant; corrections fanned out
//! by the server keep the origin's id so receivers can drop their own echo.
//! Server-originated messages (the join-time room snapshot) carry the nil id.

use matinee_core::{PlaybackStatus, Room, RoomId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the watch protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// First message on a connection: peer joins a room
    Join = 1,
    /// Current room snapshot, sent to a joining peer
    RoomState = 2,
    /// Periodic player report (status code, URL, elapsed, timestamp)
    Report = 3,
    /// Explicit play request from a participant
    PlayIntent = 4,
    /// Explicit pause request from a participant
    PauseIntent = 5,
    /// Play correction fanned out to the rest of the room
    Play = 6,
    /// Pause correction fanned out to the rest of the room
    Pause = 7,
    /// Seek correction carrying the authoritative elapsed seconds
    Seek = 8,
    /// The room's video changed; payload carries the new identifier
    VideoChanged = 9,
    /// Peer joined notification
    PeerJoined = 10,
    /// Peer left notification
    PeerLeft = 11,
    /// Heartbeat ping
    Ping = 12,
    /// Heartbeat pong
    Pong = 13,
}

/// Peer identity with display metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            peer_id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
        }
    }
}

/// A client's periodic self-report of its player state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientReport {
    /// Raw player status code; see [`PlayerStatusCode`].
    pub status_code: i32,
    /// Watch URL of the loaded video.
    pub video_url: String,
    /// Seconds into the video at the client.
    pub elapsed: f64,
    /// Client wall-clock at report time (seconds since epoch).
    pub timestamp: f64,
}

/// The fixed table of raw player status codes.
///
/// Only `Playing` and `Paused` drive room transitions; every other code is
/// inert for status purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatusCode {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl PlayerStatusCode {
    /// Map a raw code. Unknown codes yield `None` and stay inert.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Unstarted),
            0 => Some(Self::Ended),
            1 => Some(Self::Playing),
            2 => Some(Self::Paused),
            3 => Some(Self::Buffering),
            4 => Some(Self::Cued),
            _ => None,
        }
    }

    /// The room status transition this code drives, if any.
    pub fn target_status(self) -> Option<PlaybackStatus> {
        match self {
            Self::Playing => Some(PlaybackStatus::Playing),
            Self::Paused => Some(PlaybackStatus::Paused),
            _ => None,
        }
    }
}

/// Top-level protocol message.
///
/// Serialized with bincode for minimal overhead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub room_id: RoomId,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl SyncMessage {
    /// Create a join message (first message on a connection).
    pub fn join(peer_id: Uuid, room_id: RoomId, info: &PeerInfo) -> Self {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::Join,
            peer_id,
            room_id,
            payload,
        }
    }

    /// Create a room snapshot message (server → joining peer).
    pub fn room_state(room_id: RoomId, room: &Room) -> Self {
        let payload = bincode::serde::encode_to_vec(room, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::RoomState,
            peer_id: Uuid::nil(),
            room_id,
            payload,
        }
    }

    /// Create a player report message.
    pub fn report(peer_id: Uuid, room_id: RoomId, report: &ClientReport) -> Self {
        let payload = bincode::serde::encode_to_vec(report, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::Report,
            peer_id,
            room_id,
            payload,
        }
    }

    /// Create an explicit play intent.
    pub fn play_intent(peer_id: Uuid, room_id: RoomId) -> Self {
        Self {
            msg_type: MessageType::PlayIntent,
            peer_id,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Create an explicit pause intent.
    pub fn pause_intent(peer_id: Uuid, room_id: RoomId) -> Self {
        Self {
            msg_type: MessageType::PauseIntent,
            peer_id,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Create a play correction (origin excluded on delivery).
    pub fn play(origin: Uuid, room_id: RoomId) -> Self {
        Self {
            msg_type: MessageType::Play,
            peer_id: origin,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Create a pause correction.
    pub fn pause(origin: Uuid, room_id: RoomId) -> Self {
        Self {
            msg_type: MessageType::Pause,
            peer_id: origin,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Create a seek correction carrying the authoritative position.
    pub fn seek(origin: Uuid, room_id: RoomId, elapsed: f64) -> Self {
        let payload = bincode::serde::encode_to_vec(&elapsed, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::Seek,
            peer_id: origin,
            room_id,
            payload,
        }
    }

    /// Create a video-changed notification.
    pub fn video_changed(origin: Uuid, room_id: RoomId, video_id: &str) -> Self {
        let payload = bincode::serde::encode_to_vec(video_id, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::VideoChanged,
            peer_id: origin,
            room_id,
            payload,
        }
    }

    /// Create a peer joined notification.
    pub fn peer_joined(peer_id: Uuid, room_id: RoomId, info: &PeerInfo) -> Self {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::PeerJoined,
            peer_id,
            room_id,
            payload,
        }
    }

    /// Create a peer left notification.
    pub fn peer_left(peer_id: Uuid, room_id: RoomId) -> Self {
        Self {
            msg_type: MessageType::PeerLeft,
            peer_id,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Create a ping message.
    pub fn ping(peer_id: Uuid, room_id: RoomId) -> Self {
        Self {
            msg_type: MessageType::Ping,
            peer_id,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Create a pong message.
    pub fn pong(peer_id: Uuid, room_id: RoomId) -> Self {
        Self {
            msg_type: MessageType::Pong,
            peer_id,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse peer info payload (Join / PeerJoined).
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.msg_type != MessageType::Join && self.msg_type != MessageType::PeerJoined {
            return Err(ProtocolError::InvalidMessageType);
        }
        decode_payload(&self.payload)
    }

    /// Parse report payload.
    pub fn client_report(&self) -> Result<ClientReport, ProtocolError> {
        if self.msg_type != MessageType::Report {
            return Err(ProtocolError::InvalidMessageType);
        }
        decode_payload(&self.payload)
    }

    /// Parse seek payload: the authoritative elapsed seconds.
    pub fn seek_target(&self) -> Result<f64, ProtocolError> {
        if self.msg_type != MessageType::Seek {
            return Err(ProtocolError::InvalidMessageType);
        }
        decode_payload(&self.payload)
    }

    /// Parse video-changed payload: the new video identifier.
    pub fn new_video_id(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::VideoChanged {
            return Err(ProtocolError::InvalidMessageType);
        }
        decode_payload(&self.payload)
    }

    /// Parse room snapshot payload.
    pub fn room(&self) -> Result<Room, ProtocolError> {
        if self.msg_type != MessageType::RoomState {
            return Err(ProtocolError::InvalidMessageType);
        }
        decode_payload(&self.payload)
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
