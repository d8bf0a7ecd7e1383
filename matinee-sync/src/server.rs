//! WebSocket watch server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (room_id) ── RoomReconciler ── BroadcastGroup
//! Client B ──┘                           │
//!                                        ├── RoomStore (RocksDB or memory)
//!                                        │
//!                             ┌──────────┼───────────┐
//!                             ▼          ▼           ▼
//!                          Client A   Client B    Client C
//! ```
//!
//! Each connection joins exactly one room with its first message. Reports
//! and intents from that connection feed the reconciler; corrections the
//! reconciler emits fan out through the room's broadcast group, and every
//! connection drops messages stamped with its own peer id.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use matinee_core::{wall_clock_secs, Room, RoomId};

use crate::broadcast::{RoomFanout, RoomManager};
use crate::protocol::{MessageType, PeerInfo, SyncMessage};
use crate::reconcile::{RoomReconciler, RoomStore};
use crate::storage::{MemoryRoomStore, RoomDb, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum participants per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

type SharedStore = Arc<dyn RoomStore + Send + Sync>;
type ServerReconciler = RoomReconciler<SharedStore, RoomFanout>;

/// The watch server.
pub struct SyncServer {
    config: ServerConfig,
    /// Broadcast groups per room
    rooms: Arc<RoomManager>,
    /// Room-state persistence (RocksDB when configured, memory otherwise)
    store: SharedStore,
    /// The reconciliation policy, shared by every connection
    reconciler: Arc<ServerReconciler>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new watch server with the given configuration.
    ///
    /// Opens the room database when a storage path is configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store: SharedStore = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Arc::new(RoomDb::open(store_config)?)
            }
            None => Arc::new(MemoryRoomStore::new()),
        };

        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        let reconciler = Arc::new(RoomReconciler::new(
            store.clone(),
            RoomFanout::new(rooms.clone()),
        ));

        Ok(Self {
            config,
            rooms,
            store,
            reconciler,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default()).expect("in-memory server construction cannot fail")
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let config = ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        };
        Self::new(config)
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Watch server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let store = self.store.clone();
            let reconciler = self.reconciler.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, rooms, store, reconciler, stats, config)
                        .await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomManager>,
        store: SharedStore,
        reconciler: Arc<ServerReconciler>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // State for this connection
        let mut peer_id: Option<Uuid> = None;
        let mut room_id: Option<RoomId> = None;
        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match sync_msg.msg_type {
                                MessageType::Join => {
                                    // First message: peer joins a watch room.
                                    let info = sync_msg.peer_info().unwrap_or_else(|_| {
                                        PeerInfo::with_id(sync_msg.peer_id, "Anonymous")
                                    });
                                    let joining = sync_msg.room_id.clone();

                                    let group = rooms.get_or_create(&joining);
                                    if group.peer_count() >= config.max_peers_per_room {
                                        log::warn!(
                                            "Room {joining} is full ({} peers), rejecting {addr}",
                                            group.peer_count()
                                        );
                                        break;
                                    }

                                    broadcast_rx = Some(group.add_peer(info.clone()));
                                    peer_id = Some(info.peer_id);
                                    room_id = Some(joining.clone());

                                    // The first participant establishes the room.
                                    let room = match store.load(&joining) {
                                        Ok(Some(room)) => room,
                                        Ok(None) => {
                                            let fresh = Room::fresh("", wall_clock_secs());
                                            if let Err(e) = store.save(&joining, &fresh) {
                                                log::error!("Failed to persist room {joining}: {e}");
                                            }
                                            fresh
                                        }
                                        Err(e) => {
                                            log::error!("Failed to load room {joining}: {e}");
                                            break;
                                        }
                                    };

                                    // Hand the joiner the current room state so it
                                    // starts in sync, then announce it to the rest.
                                    let state_msg = SyncMessage::room_state(joining.clone(), &room);
                                    ws_sender.send(Message::Binary(state_msg.encode()?.into())).await?;

                                    let join_msg =
                                        SyncMessage::peer_joined(info.peer_id, joining.clone(), &info);
                                    let _ = group.broadcast(&join_msg);

                                    {
                                        let mut s = stats.write().await;
                                        s.active_rooms = rooms.room_count();
                                    }

                                    log::info!(
                                        "Peer {} ({}) joined room {joining}",
                                        info.name,
                                        info.peer_id
                                    );
                                }

                                MessageType::Report => {
                                    if let (Some(pid), Some(rid)) = (peer_id, &room_id) {
                                        match sync_msg.client_report() {
                                            Ok(report) => {
                                                if let Err(e) = reconciler.handle_report(
                                                    rid,
                                                    pid,
                                                    &report,
                                                    wall_clock_secs(),
                                                ) {
                                                    log::error!(
                                                        "Reconciliation failed for room {rid}: {e}"
                                                    );
                                                }
                                            }
                                            Err(e) => {
                                                log::warn!("Malformed report from {addr}: {e}");
                                            }
                                        }
                                    }
                                }

                                MessageType::PlayIntent => {
                                    if let (Some(pid), Some(rid)) = (peer_id, &room_id) {
                                        if let Err(e) = reconciler.handle_play_intent(
                                            rid,
                                            pid,
                                            wall_clock_secs(),
                                        ) {
                                            log::error!("Play intent failed for room {rid}: {e}");
                                        }
                                    }
                                }

                                MessageType::PauseIntent => {
                                    if let (Some(pid), Some(rid)) = (peer_id, &room_id) {
                                        if let Err(e) = reconciler.handle_pause_intent(
                                            rid,
                                            pid,
                                            wall_clock_secs(),
                                        ) {
                                            log::error!("Pause intent failed for room {rid}: {e}");
                                        }
                                    }
                                }

                                MessageType::Ping => {
                                    if let (Some(pid), Some(rid)) = (peer_id, &room_id) {
                                        let pong = SyncMessage::pong(pid, rid.clone());
                                        ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
                                    }
                                }

                                _ => {
                                    log::debug!("Unhandled message type: {:?}", sync_msg.msg_type);
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing broadcast message
                msg = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // No broadcast receiver yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            // Don't echo back to the origin
                            if let Ok(sync_msg) = SyncMessage::decode(&data) {
                                if Some(sync_msg.peer_id) == peer_id {
                                    continue;
                                }
                            }
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Peer {peer_id:?} lagged by {n} messages");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: remove peer from room
        if let (Some(pid), Some(rid)) = (peer_id, &room_id) {
            if let Some(group) = rooms.get(rid) {
                group.remove_peer(&pid);

                let leave_msg = SyncMessage::peer_left(pid, rid.clone());
                let _ = group.broadcast(&leave_msg);

                // The room record stays persisted; only the live group goes.
                if rooms.remove_if_empty(rid) {
                    log::info!("Room {rid} group removed (empty)");
                }
            }
        }

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = rooms.room_count();
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the room manager reference.
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}
