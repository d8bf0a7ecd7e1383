//! Persistence integration tests: room state outliving its participants.

use matinee_sync::client::{WatchClient, WatchEvent};
use matinee_sync::protocol::{ClientReport, PeerInfo};
use matinee_sync::reconcile::{
    BroadcastError, RoomBroadcast, RoomEvent, RoomReconciler, RoomStore,
};
use matinee_sync::server::{ServerConfig, SyncServer};
use matinee_sync::storage::{RoomDb, StoreConfig};
use matinee_sync::{PlaybackStatus, RoomId};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

const T0: f64 = 1_700_000_000.0;

/// Broadcast double that drops everything (persistence is under test here).
struct NullBroadcast;

impl RoomBroadcast for NullBroadcast {
    fn emit(&self, _room_id: &RoomId, _origin: Uuid, _event: RoomEvent) -> Result<(), BroadcastError> {
        Ok(())
    }
}

fn report(status_code: i32, video_url: &str, elapsed: f64) -> ClientReport {
    ClientReport {
        status_code,
        video_url: video_url.into(),
        elapsed,
        timestamp: T0,
    }
}

#[test]
fn test_reconciled_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let room_id = RoomId::new("movie-night");
    let origin = Uuid::new_v4();

    {
        let store = RoomDb::open(StoreConfig::for_testing(&path)).unwrap();
        let reconciler = RoomReconciler::new(store, NullBroadcast);

        // First report seeds the room; the next ones re-anchor and play it.
        reconciler
            .handle_report(&room_id, origin, &report(2, "https://w.example/watch?v=abc123", 0.0), T0)
            .unwrap();
        reconciler
            .handle_report(&room_id, origin, &report(1, "https://w.example/watch?v=abc123", 100.0), T0)
            .unwrap();
    }

    // Reopen the database: the room record is intact.
    let store = RoomDb::open(StoreConfig::for_testing(&path)).unwrap();
    let room = store.load(&room_id).unwrap().unwrap();
    assert_eq!(room.video_id, "abc123");
    assert_eq!(room.simulation.status, PlaybackStatus::Playing);
    assert!(room.simulation.elapsed >= 100.0);
}

async fn join(name: &str, room: &str, port: u16) -> (WatchClient, mpsc::Receiver<WatchEvent>) {
    let url = format!("ws://127.0.0.1:{port}");
    let mut client = WatchClient::new(PeerInfo::new(name), RoomId::new(room), &url);
    let events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    (client, events)
}

#[tokio::test]
async fn test_room_outlives_its_participants() {
    let dir = tempfile::tempdir().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        storage_path: Some(dir.path().join("db")),
        ..ServerConfig::default()
    };
    let server = SyncServer::new(config).unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Bob watches alone, hands the room its video, and scrubs to 100s.
    {
        let (bob, _bob_events) = join("Bob", "movie-night", port).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        bob.send_report(2, "https://watch.example/watch?v=abc123", 0.0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        bob.send_report(2, "https://watch.example/watch?v=abc123", 100.0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    } // Bob disconnects; the room group empties out.

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Carol joins the deserted room and picks up right where Bob left it.
    let (_carol, mut carol_events) = join("Carol", "movie-night", port).await;
    let event = loop {
        match timeout(Duration::from_secs(2), carol_events.recv()).await {
            Ok(Some(WatchEvent::RoomState(room))) => break room,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => panic!("timed out waiting for RoomState"),
        }
    };

    assert_eq!(event.video_id, "abc123");
    assert_eq!(event.simulation.status, PlaybackStatus::Paused);
    assert!((event.simulation.elapsed - 100.0).abs() < 1e-9);
}
