//! WebSocket watch client for connecting to a watch server.
//!
//! Provides:
//! - Connection lifecycle (connect, join-on-connect, disconnect)
//! - Player report and play/pause intent sending
//! - A typed event stream the embedding player acts on
//!
//! The client performs no reconciliation of its own: it reports what its
//! player is doing and obeys the corrections the room fans back.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use futures_util::StreamExt;
use uuid::Uuid;

use matinee_core::{wall_clock_secs, Room, RoomId};

use crate::protocol::{ClientReport, MessageType, PeerInfo, ProtocolError, SyncMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the watch client.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// The room's current state, received on join
    RoomState(Room),
    /// The room started playing
    Play,
    /// The room paused
    Pause,
    /// The room re-anchored to this position (seconds)
    Seek(f64),
    /// The room switched to a new video
    VideoChanged(String),
    /// A participant joined the room
    PeerJoined(PeerInfo),
    /// A participant left the room
    PeerLeft(Uuid),
}

/// The watch client.
///
/// Manages a WebSocket connection to the watch server, joins a single room,
/// and surfaces the room's corrections as [`WatchEvent`]s.
pub struct WatchClient {
    /// Our peer identity
    peer_info: PeerInfo,

    /// Room we're watching in
    room_id: RoomId,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to send messages to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<WatchEvent>>,

    /// Event sender (held by connection task)
    event_tx: mpsc::Sender<WatchEvent>,

    /// Server URL
    server_url: String,
}

impl WatchClient {
    /// Create a new watch client.
    pub fn new(peer_info: PeerInfo, room_id: RoomId, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            peer_info,
            room_id,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<WatchEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (ws_writer, mut ws_reader) = futures_util::StreamExt::split(ws_stream);

                // Outgoing message channel
                let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward outgoing channel to WebSocket
                let ws_writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                let writer = ws_writer.clone();
                tokio::spawn(async move {
                    use futures_util::SinkExt;
                    while let Some(data) = out_rx.recv().await {
                        let mut w = writer.lock().await;
                        if w.send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    // Channel closed: the client was dropped. Say goodbye so
                    // the server removes us from the room promptly.
                    let mut w = writer.lock().await;
                    let _ = w
                        .send(tokio_tungstenite::tungstenite::Message::Close(None))
                        .await;
                });

                // Join the room before anything else
                let join_msg = SyncMessage::join(
                    self.peer_info.peer_id,
                    self.room_id.clone(),
                    &self.peer_info,
                );
                if let Ok(encoded) = join_msg.encode() {
                    if let Some(ref tx) = self.outgoing_tx {
                        let _ = tx.send(encoded).await;
                    }
                }

                *self.state.write().await = ConnectionState::Connected;
                let _ = self.event_tx.send(WatchEvent::Connected).await;

                // Reader task: process incoming WebSocket messages
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                let peer_id = self.peer_info.peer_id;
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                if let Ok(sync_msg) = SyncMessage::decode(&bytes) {
                                    // Skip our own echoes
                                    if sync_msg.peer_id == peer_id {
                                        continue;
                                    }

                                    let event = match sync_msg.msg_type {
                                        MessageType::RoomState => {
                                            sync_msg.room().ok().map(WatchEvent::RoomState)
                                        }
                                        MessageType::Play => Some(WatchEvent::Play),
                                        MessageType::Pause => Some(WatchEvent::Pause),
                                        MessageType::Seek => {
                                            sync_msg.seek_target().ok().map(WatchEvent::Seek)
                                        }
                                        MessageType::VideoChanged => sync_msg
                                            .new_video_id()
                                            .ok()
                                            .map(WatchEvent::VideoChanged),
                                        MessageType::PeerJoined => {
                                            sync_msg.peer_info().ok().map(WatchEvent::PeerJoined)
                                        }
                                        MessageType::PeerLeft => {
                                            Some(WatchEvent::PeerLeft(sync_msg.peer_id))
                                        }
                                        _ => None,
                                    };

                                    if let Some(evt) = event {
                                        let _ = event_tx.send(evt).await;
                                    }
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(WatchEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Report the local player's state to the room.
    pub async fn send_report(
        &self,
        status_code: i32,
        video_url: impl Into<String>,
        elapsed: f64,
    ) -> Result<(), ProtocolError> {
        let report = ClientReport {
            status_code,
            video_url: video_url.into(),
            elapsed,
            timestamp: wall_clock_secs(),
        };
        let msg = SyncMessage::report(self.peer_info.peer_id, self.room_id.clone(), &report);
        self.send(msg).await
    }

    /// Ask the room to start playing.
    pub async fn send_play_intent(&self) -> Result<(), ProtocolError> {
        let msg = SyncMessage::play_intent(self.peer_info.peer_id, self.room_id.clone());
        self.send(msg).await
    }

    /// Ask the room to pause.
    pub async fn send_pause_intent(&self) -> Result<(), ProtocolError> {
        let msg = SyncMessage::pause_intent(self.peer_info.peer_id, self.room_id.clone());
        self.send(msg).await
    }

    /// Send a ping to the server.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let msg = SyncMessage::ping(self.peer_info.peer_id, self.room_id.clone());
        self.send(msg).await
    }

    async fn send(&self, msg: SyncMessage) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }

        let encoded = msg.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get our peer info.
    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer_info
    }

    /// Get the room we watch in.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = WatchClient::new(
            PeerInfo::new("Alice"),
            RoomId::new("movie-night"),
            "ws://127.0.0.1:9090",
        );
        assert_eq!(client.peer_info().name, "Alice");
        assert_eq!(client.room_id().as_str(), "movie-night");
        assert_eq!(client.server_url(), "ws://127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_client_starts_disconnected() {
        let client = WatchClient::new(
            PeerInfo::new("Alice"),
            RoomId::new("movie-night"),
            "ws://127.0.0.1:9090",
        );
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let client = WatchClient::new(
            PeerInfo::new("Alice"),
            RoomId::new("movie-night"),
            "ws://127.0.0.1:9090",
        );
        assert!(client.send_play_intent().await.is_err());
    }

    #[test]
    fn test_take_event_rx_only_once() {
        let mut client = WatchClient::new(
            PeerInfo::new("Alice"),
            RoomId::new("movie-night"),
            "ws://127.0.0.1:9090",
        );
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
