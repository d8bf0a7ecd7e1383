//! Matinee watch server binary.
//!
//! Configuration comes from the environment:
//! - `MATINEE_BIND`          — listen address (default `127.0.0.1:9090`)
//! - `MATINEE_DATA_DIR`      — room database directory (unset = in-memory)
//! - `MATINEE_ROOM_CAPACITY` — max participants per room (default 100)

use log::info;
use std::path::PathBuf;

use matinee_sync::{ServerConfig, SyncServer};

fn config_from_env() -> ServerConfig {
    let defaults = ServerConfig::default();

    let bind_addr = std::env::var("MATINEE_BIND").unwrap_or_else(|_| defaults.bind_addr.clone());
    let storage_path = std::env::var("MATINEE_DATA_DIR").ok().map(PathBuf::from);
    let max_peers_per_room = std::env::var("MATINEE_ROOM_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.max_peers_per_room);

    ServerConfig {
        bind_addr,
        max_peers_per_room,
        storage_path,
        ..defaults
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = config_from_env();
    info!(
        "Matinee starting on {} (persistence: {})",
        config.bind_addr,
        config
            .storage_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "in-memory".to_string())
    );

    let server = SyncServer::new(config).expect("Failed to open room database");
    server.run().await.expect("Server terminated");
}
