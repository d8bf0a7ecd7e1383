//! Drift reconciliation: deciding when a room needs correcting.
//!
//! ```text
//! client report ──► RoomReconciler ──► RoomStore   (load / persist room)
//!                        │
//!                        └──────────► RoomBroadcast (fan-out to the rest
//!                                                    of the room)
//! ```
//!
//! The reconciler compares each client's self-report against the room's
//! authoritative [`PlaybackSimulator`] and emits at most one seek correction
//! and one status correction per report. Large drift means the reporting
//! client is trusted for position (it just finished buffering, or the user
//! scrubbed) — the room re-anchors to it, not the reverse.
//!
//! Both collaborators are explicit: the reconciler never reaches for an
//! ambient transport handle. There is deliberately no lock around the
//! load → mutate → persist cycle; concurrent reports for one room race and
//! the last writer wins, which the drift tolerance absorbs.

use matinee_core::{
    extract_video_id, PlaybackSimulator, PlaybackSnapshot, PlaybackStatus, Room, RoomId,
};
use uuid::Uuid;

use crate::protocol::{ClientReport, PlayerStatusCode};
use crate::storage::StoreError;

/// Drift (in seconds) a report may show before the room re-anchors to it.
/// The boundary is exclusive: drift equal to the tolerance is absorbed.
pub const DRIFT_TOLERANCE_SECS: f64 = 5.0;

/// Events fanned out to every participant of a room except the origin.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Play,
    Pause,
    Seek(f64),
    VideoChanged(String),
}

/// Room-state persistence the reconciler depends on.
///
/// The two room sub-fields must be independently writable: a drift
/// correction touches only the simulation, a video change rewrites both.
pub trait RoomStore {
    fn load(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError>;
    fn save(&self, room_id: &RoomId, room: &Room) -> Result<(), StoreError>;
    fn save_simulation(
        &self,
        room_id: &RoomId,
        simulation: &PlaybackSnapshot,
    ) -> Result<(), StoreError>;
    fn save_video(&self, room_id: &RoomId, video_id: &str) -> Result<(), StoreError>;
}

impl<T: RoomStore + ?Sized> RoomStore for std::sync::Arc<T> {
    fn load(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        (**self).load(room_id)
    }

    fn save(&self, room_id: &RoomId, room: &Room) -> Result<(), StoreError> {
        (**self).save(room_id, room)
    }

    fn save_simulation(
        &self,
        room_id: &RoomId,
        simulation: &PlaybackSnapshot,
    ) -> Result<(), StoreError> {
        (**self).save_simulation(room_id, simulation)
    }

    fn save_video(&self, room_id: &RoomId, video_id: &str) -> Result<(), StoreError> {
        (**self).save_video(room_id, video_id)
    }
}

/// Fan-out capability, delivering to every participant except `origin`.
pub trait RoomBroadcast {
    fn emit(&self, room_id: &RoomId, origin: Uuid, event: RoomEvent) -> Result<(), BroadcastError>;
}

impl<T: RoomBroadcast + ?Sized> RoomBroadcast for std::sync::Arc<T> {
    fn emit(&self, room_id: &RoomId, origin: Uuid, event: RoomEvent) -> Result<(), BroadcastError> {
        (**self).emit(room_id, origin, event)
    }
}

/// Broadcast failures.
#[derive(Debug, Clone)]
pub enum BroadcastError {
    Encode(String),
    Channel(String),
}

impl std::fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Broadcast encode error: {e}"),
            Self::Channel(e) => write!(f, "Broadcast channel error: {e}"),
        }
    }
}

impl std::error::Error for BroadcastError {}

/// Reconciliation failures, surfaced to the transport caller.
///
/// A failed persist or broadcast aborts that one event; the shared room
/// record is only ever touched by a completed persist, so later events see
/// uncorrupted state.
#[derive(Debug, Clone)]
pub enum ReconcileError {
    Store(StoreError),
    Broadcast(BroadcastError),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "Store error: {e}"),
            Self::Broadcast(e) => write!(f, "Broadcast error: {e}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<BroadcastError> for ReconcileError {
    fn from(e: BroadcastError) -> Self {
        Self::Broadcast(e)
    }
}

/// Corrections a single inbound event produced, in the order they applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    VideoChanged(String),
    Seek(f64),
    Play,
    Pause,
}

/// Consumes client reports and play/pause intents for a room, corrects the
/// room's simulator when they diverge, persists, and fans the correction out.
pub struct RoomReconciler<S, B> {
    store: S,
    broadcast: B,
    tolerance: f64,
}

impl<S: RoomStore, B: RoomBroadcast> RoomReconciler<S, B> {
    pub fn new(store: S, broadcast: B) -> Self {
        Self::with_tolerance(store, broadcast, DRIFT_TOLERANCE_SECS)
    }

    pub fn with_tolerance(store: S, broadcast: B, tolerance: f64) -> Self {
        Self {
            store,
            broadcast,
            tolerance,
        }
    }

    /// Reconcile one periodic client report.
    ///
    /// A video change supersedes the drift and status checks entirely.
    /// Otherwise the two checks are independent and both may fire, in
    /// drift-then-status order, each persisting only what it mutated.
    pub fn handle_report(
        &self,
        room_id: &RoomId,
        origin: Uuid,
        report: &ClientReport,
        now: f64,
    ) -> Result<Vec<Correction>, ReconcileError> {
        // No `v=` parameter degrades to the empty identifier.
        let reported_id = extract_video_id(&report.video_url).unwrap_or_default();
        let mut room = self.load_or_create(room_id, reported_id, now)?;
        let mut sim = PlaybackSimulator::restore(&room.simulation);
        let mut applied = Vec::new();

        if reported_id != room.video_id {
            // The room follows the reporter onto the new video, from the top.
            sim.seek(0.0, now);
            sim.pause(now);
            room.video_id = reported_id.to_string();
            room.simulation = sim.snapshot(now);
            self.store.save(room_id, &room)?;
            self.broadcast
                .emit(room_id, origin, RoomEvent::VideoChanged(room.video_id.clone()))?;
            log::info!("room {room_id}: video changed to '{}'", room.video_id);
            applied.push(Correction::VideoChanged(room.video_id));
            return Ok(applied);
        }

        let observed = sim.snapshot(now);

        let drift = (observed.elapsed - report.elapsed).abs();
        if drift > self.tolerance {
            self.broadcast
                .emit(room_id, origin, RoomEvent::Seek(report.elapsed))?;
            sim.seek(report.elapsed, now);
            self.store.save_simulation(room_id, &sim.snapshot(now))?;
            log::info!(
                "room {room_id}: drift {drift:.2}s beyond tolerance, re-anchored to {:.2}s",
                report.elapsed
            );
            applied.push(Correction::Seek(report.elapsed));
        }

        let target = PlayerStatusCode::from_code(report.status_code)
            .and_then(PlayerStatusCode::target_status);
        if let Some(target) = target {
            if target != observed.status {
                if target == PlaybackStatus::Playing {
                    self.broadcast.emit(room_id, origin, RoomEvent::Play)?;
                    sim.play(now);
                    applied.push(Correction::Play);
                } else {
                    self.broadcast.emit(room_id, origin, RoomEvent::Pause)?;
                    sim.pause(now);
                    applied.push(Correction::Pause);
                }
                self.store.save_simulation(room_id, &sim.snapshot(now))?;
                log::debug!("room {room_id}: status corrected to {target}");
            }
        }

        Ok(applied)
    }

    /// Handle an explicit play request. Idempotent: a room already playing
    /// produces no correction, no persist, no broadcast.
    pub fn handle_play_intent(
        &self,
        room_id: &RoomId,
        origin: Uuid,
        now: f64,
    ) -> Result<Option<Correction>, ReconcileError> {
        let room = self.load_or_create(room_id, "", now)?;
        let mut sim = PlaybackSimulator::restore(&room.simulation);

        if sim.snapshot(now).status == PlaybackStatus::Playing {
            return Ok(None);
        }

        self.broadcast.emit(room_id, origin, RoomEvent::Play)?;
        sim.play(now);
        self.store.save_simulation(room_id, &sim.snapshot(now))?;
        log::debug!("room {room_id}: play intent applied");
        Ok(Some(Correction::Play))
    }

    /// Handle an explicit pause request. Idempotent.
    pub fn handle_pause_intent(
        &self,
        room_id: &RoomId,
        origin: Uuid,
        now: f64,
    ) -> Result<Option<Correction>, ReconcileError> {
        let room = self.load_or_create(room_id, "", now)?;
        let mut sim = PlaybackSimulator::restore(&room.simulation);

        if sim.snapshot(now).status == PlaybackStatus::Paused {
            return Ok(None);
        }

        self.broadcast.emit(room_id, origin, RoomEvent::Pause)?;
        sim.pause(now);
        self.store.save_simulation(room_id, &sim.snapshot(now))?;
        log::debug!("room {room_id}: pause intent applied");
        Ok(Some(Correction::Pause))
    }

    /// Unknown rooms are created on first contact, seeded with the caller's
    /// video identifier so a first report never fabricates a video change.
    /// The fresh record is persisted immediately so partial writes (a later
    /// simulation-only save) always land on a complete room.
    fn load_or_create(
        &self,
        room_id: &RoomId,
        seed_video_id: &str,
        now: f64,
    ) -> Result<Room, ReconcileError> {
        if let Some(room) = self.store.load(room_id)? {
            return Ok(room);
        }
        let room = Room::fresh(seed_video_id, now);
        self.store.save(room_id, &room)?;
        log::info!("room {room_id}: created (video '{seed_video_id}')");
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRoomStore;
    use std::sync::{Arc, Mutex};

    const T0: f64 = 1_700_000_000.0;
    const URL: &str = "https://watch.example/watch?v=abc123";

    /// Test double that records every emitted event, in order.
    #[derive(Default)]
    struct RecordingBroadcast {
        events: Mutex<Vec<RoomEvent>>,
        journal: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl RecordingBroadcast {
        fn with_journal(journal: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                journal: Some(journal),
            }
        }

        fn events(&self) -> Vec<RoomEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl RoomBroadcast for RecordingBroadcast {
        fn emit(
            &self,
            _room_id: &RoomId,
            _origin: Uuid,
            event: RoomEvent,
        ) -> Result<(), BroadcastError> {
            if let Some(journal) = &self.journal {
                journal.lock().unwrap().push(format!("emit:{event:?}"));
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// Store wrapper journaling persist calls alongside broadcast emits.
    struct JournalingStore {
        inner: MemoryRoomStore,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl RoomStore for JournalingStore {
        fn load(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
            self.inner.load(room_id)
        }

        fn save(&self, room_id: &RoomId, room: &Room) -> Result<(), StoreError> {
            self.journal.lock().unwrap().push("persist:room".into());
            self.inner.save(room_id, room)
        }

        fn save_simulation(
            &self,
            room_id: &RoomId,
            simulation: &PlaybackSnapshot,
        ) -> Result<(), StoreError> {
            self.journal.lock().unwrap().push("persist:simulation".into());
            self.inner.save_simulation(room_id, simulation)
        }

        fn save_video(&self, room_id: &RoomId, video_id: &str) -> Result<(), StoreError> {
            self.journal.lock().unwrap().push("persist:video".into());
            self.inner.save_video(room_id, video_id)
        }
    }

    /// Store whose writes always fail.
    struct FailingStore;

    impl RoomStore for FailingStore {
        fn load(&self, _room_id: &RoomId) -> Result<Option<Room>, StoreError> {
            Ok(Some(Room::fresh("abc123", T0)))
        }

        fn save(&self, _room_id: &RoomId, _room: &Room) -> Result<(), StoreError> {
            Err(StoreError::DatabaseError("disk on fire".into()))
        }

        fn save_simulation(
            &self,
            _room_id: &RoomId,
            _simulation: &PlaybackSnapshot,
        ) -> Result<(), StoreError> {
            Err(StoreError::DatabaseError("disk on fire".into()))
        }

        fn save_video(&self, _room_id: &RoomId, _video_id: &str) -> Result<(), StoreError> {
            Err(StoreError::DatabaseError("disk on fire".into()))
        }
    }

    fn report(status_code: i32, elapsed: f64) -> ClientReport {
        ClientReport {
            status_code,
            video_url: URL.into(),
            elapsed,
            timestamp: T0,
        }
    }

    fn seeded_reconciler(
        room: Room,
    ) -> (
        RoomReconciler<MemoryRoomStore, Arc<RecordingBroadcast>>,
        Arc<RecordingBroadcast>,
        RoomId,
    ) {
        let room_id = RoomId::new("movie-night");
        let store = MemoryRoomStore::new();
        store.save(&room_id, &room).unwrap();
        let broadcast = Arc::new(RecordingBroadcast::default());
        let reconciler = RoomReconciler::new(store, broadcast.clone());
        (reconciler, broadcast, room_id)
    }

    #[test]
    fn test_drift_at_tolerance_is_absorbed() {
        let mut room = Room::fresh("abc123", T0);
        room.simulation.elapsed = 10.0;
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);

        // Paused room at 10.0; report at 15.0 — drift exactly 5.0.
        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(2, 15.0), T0)
            .unwrap();

        assert!(applied.is_empty());
        assert!(broadcast.events().is_empty());
    }

    #[test]
    fn test_drift_beyond_tolerance_reanchors() {
        let mut room = Room::fresh("abc123", T0);
        room.simulation.elapsed = 10.0;
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);

        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(2, 15.0001), T0)
            .unwrap();

        assert_eq!(applied, vec![Correction::Seek(15.0001)]);
        assert_eq!(broadcast.events(), vec![RoomEvent::Seek(15.0001)]);

        // The room record re-anchored to the report.
        let stored = reconciler.store.load(&room_id).unwrap().unwrap();
        assert!((stored.simulation.elapsed - 15.0001).abs() < 1e-9);
    }

    #[test]
    fn test_status_report_flips_paused_room_to_playing() {
        let room = Room::fresh("abc123", T0);
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);

        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(1, 0.0), T0)
            .unwrap();

        assert_eq!(applied, vec![Correction::Play]);
        assert_eq!(broadcast.events(), vec![RoomEvent::Play]);
        let stored = reconciler.store.load(&room_id).unwrap().unwrap();
        assert_eq!(stored.simulation.status, PlaybackStatus::Playing);
    }

    #[test]
    fn test_inert_status_codes_produce_nothing() {
        let room = Room::fresh("abc123", T0);
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);

        // Buffering (3), ended (0), cued (4), unknown (99): all inert.
        for code in [3, 0, 4, -1, 99] {
            let applied = reconciler
                .handle_report(&room_id, Uuid::new_v4(), &report(code, 0.0), T0)
                .unwrap();
            assert!(applied.is_empty(), "code {code} should be inert");
        }
        assert!(broadcast.events().is_empty());
    }

    #[test]
    fn test_drift_and_status_both_fire_in_order() {
        let mut room = Room::fresh("abc123", T0);
        room.simulation.elapsed = 10.0;
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);

        // Paused room at 10.0; report: playing at 100.0.
        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(1, 100.0), T0)
            .unwrap();

        assert_eq!(applied, vec![Correction::Seek(100.0), Correction::Play]);
        assert_eq!(
            broadcast.events(),
            vec![RoomEvent::Seek(100.0), RoomEvent::Play]
        );
    }

    #[test]
    fn test_video_change_supersedes_drift_and_status() {
        let mut room = Room::fresh("previous-video", T0);
        room.simulation.elapsed = 500.0;
        room.simulation.status = PlaybackStatus::Paused;
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);

        // Report diverges in video, position, and status — only the video
        // change may apply.
        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(1, 100.0), T0)
            .unwrap();

        assert_eq!(applied, vec![Correction::VideoChanged("abc123".into())]);
        assert_eq!(
            broadcast.events(),
            vec![RoomEvent::VideoChanged("abc123".into())]
        );

        // The room reset to paused at the beginning of the new video.
        let stored = reconciler.store.load(&room_id).unwrap().unwrap();
        assert_eq!(stored.video_id, "abc123");
        assert_eq!(stored.simulation.status, PlaybackStatus::Paused);
        assert_eq!(stored.simulation.elapsed, 0.0);
    }

    #[test]
    fn test_missing_url_parameter_degrades_to_empty_identifier() {
        let room = Room::fresh("abc123", T0);
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);

        let bad = ClientReport {
            status_code: 2,
            video_url: "https://watch.example/home".into(),
            elapsed: 0.0,
            timestamp: T0,
        };
        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &bad, T0)
            .unwrap();

        // The empty identifier differs from the room's, so it is an ordinary
        // video change — permissive, never an error.
        assert_eq!(applied, vec![Correction::VideoChanged(String::new())]);
        assert_eq!(broadcast.events(), vec![RoomEvent::VideoChanged(String::new())]);
    }

    #[test]
    fn test_unknown_room_auto_creates_from_report() {
        let room_id = RoomId::new("fresh-room");
        let store = MemoryRoomStore::new();
        let broadcast = Arc::new(RecordingBroadcast::default());
        let reconciler = RoomReconciler::new(store, broadcast.clone());

        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(2, 0.0), T0)
            .unwrap();

        // Seeded with the report's own video id: no video-change fabricated,
        // no drift, status already paused.
        assert!(applied.is_empty());
        assert!(broadcast.events().is_empty());
        let stored = reconciler.store.load(&room_id).unwrap().unwrap();
        assert_eq!(stored.video_id, "abc123");
    }

    #[test]
    fn test_play_intent_is_idempotent() {
        let room = Room::fresh("abc123", T0);
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);
        let origin = Uuid::new_v4();

        let first = reconciler.handle_play_intent(&room_id, origin, T0).unwrap();
        assert_eq!(first, Some(Correction::Play));

        let second = reconciler
            .handle_play_intent(&room_id, origin, T0 + 1.0)
            .unwrap();
        assert_eq!(second, None);

        assert_eq!(broadcast.events(), vec![RoomEvent::Play]);
    }

    #[test]
    fn test_pause_intent_is_idempotent() {
        let room = Room::fresh("abc123", T0);
        let (reconciler, broadcast, room_id) = seeded_reconciler(room);
        let origin = Uuid::new_v4();

        // Fresh rooms are already paused.
        let applied = reconciler.handle_pause_intent(&room_id, origin, T0).unwrap();
        assert_eq!(applied, None);
        assert!(broadcast.events().is_empty());

        reconciler.handle_play_intent(&room_id, origin, T0).unwrap();
        let applied = reconciler
            .handle_pause_intent(&room_id, origin, T0 + 5.0)
            .unwrap();
        assert_eq!(applied, Some(Correction::Pause));

        // Position carried through the pause.
        let stored = reconciler.store.load(&room_id).unwrap().unwrap();
        assert!((stored.simulation.elapsed - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_drift_correction_broadcasts_before_persisting() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let room_id = RoomId::new("movie-night");
        let store = JournalingStore {
            inner: MemoryRoomStore::new(),
            journal: journal.clone(),
        };
        let mut room = Room::fresh("abc123", T0);
        room.simulation.elapsed = 10.0;
        store.inner.save(&room_id, &room).unwrap();
        let broadcast = Arc::new(RecordingBroadcast::with_journal(journal.clone()));
        let reconciler = RoomReconciler::new(store, broadcast);

        reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(1, 100.0), T0)
            .unwrap();

        let entries = journal.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "emit:Seek(100.0)",
                "persist:simulation",
                "emit:Play",
                "persist:simulation",
            ]
        );
    }

    #[test]
    fn test_video_change_persists_before_broadcasting() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let room_id = RoomId::new("movie-night");
        let store = JournalingStore {
            inner: MemoryRoomStore::new(),
            journal: journal.clone(),
        };
        store.inner.save(&room_id, &Room::fresh("old", T0)).unwrap();
        let broadcast = Arc::new(RecordingBroadcast::with_journal(journal.clone()));
        let reconciler = RoomReconciler::new(store, broadcast);

        reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(2, 0.0), T0)
            .unwrap();

        let entries = journal.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec!["persist:room", "emit:VideoChanged(\"abc123\")"]
        );
    }

    #[test]
    fn test_store_failure_surfaces_to_caller() {
        let room_id = RoomId::new("movie-night");
        let broadcast = Arc::new(RecordingBroadcast::default());
        let reconciler = RoomReconciler::new(FailingStore, broadcast);

        let result = reconciler.handle_report(&room_id, Uuid::new_v4(), &report(1, 100.0), T0);
        assert!(matches!(result, Err(ReconcileError::Store(_))));
    }

    #[test]
    fn test_custom_tolerance() {
        let mut room = Room::fresh("abc123", T0);
        room.simulation.elapsed = 10.0;
        let room_id = RoomId::new("movie-night");
        let store = MemoryRoomStore::new();
        store.save(&room_id, &room).unwrap();
        let broadcast = Arc::new(RecordingBroadcast::default());
        let reconciler = RoomReconciler::with_tolerance(store, broadcast.clone(), 0.5);

        let applied = reconciler
            .handle_report(&room_id, Uuid::new_v4(), &report(2, 11.0), T0)
            .unwrap();
        assert_eq!(applied, vec![Correction::Seek(11.0)]);
    }
}
