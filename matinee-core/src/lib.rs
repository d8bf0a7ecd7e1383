//! Core playback model for Matinee watch rooms.
//!
//! A room's authoritative position is not stored as a number that someone
//! updates on a timer — it is *simulated*: the [`PlaybackSimulator`] models
//! where the video would be right now as a function of wall-clock time, and
//! the rest of the system only ever observes it through [`PlaybackSimulator::snapshot`].
//!
//! ```text
//! status == Playing:  elapsed is stale ── recomputed from start_time
//! status == Paused:   elapsed is live  ── start_time re-anchored on demand
//! ```
//!
//! Every operation takes an explicit `now` (seconds since the Unix epoch) so
//! the machine stays pure: callers pass [`wall_clock_secs`], tests pass
//! whatever instant they like.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 8
//! (Unreliable Clocks): never trust a wall clock to move forward.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Seconds since the Unix epoch, as `f64` (sub-second precision).
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ───────────────────────────────────────────────────────────────────
// Playback state machine
// ───────────────────────────────────────────────────────────────────

/// Player status as the room models it.
///
/// `Unstarted` is a construction-time default only: the first play or pause
/// intent leaves it and it is never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Unstarted,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackStatus::Unstarted => write!(f, "unstarted"),
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Paused => write!(f, "paused"),
        }
    }
}

/// Immutable observation of a simulator at a single instant.
///
/// This is also the persisted and wire form of a room's simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    /// Seconds into the video at the instant the snapshot was taken.
    pub elapsed: f64,
    /// Wall-clock instant at which `elapsed == 0` would have occurred under
    /// continuous playback. Derived bookkeeping, not an observed fact.
    pub start_time: f64,
}

/// Simulates where the video would be right now.
///
/// Exactly one of `elapsed` / `start_time` is live at any instant depending
/// on `status`; the other is reconstructed on demand. Direct field reads are
/// never valid — observe through [`snapshot`](Self::snapshot).
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSimulator {
    status: PlaybackStatus,
    elapsed: f64,
    start_time: f64,
}

impl PlaybackSimulator {
    /// A simulator that has received no intent yet.
    pub fn new(now: f64) -> Self {
        Self {
            status: PlaybackStatus::Unstarted,
            elapsed: 0.0,
            start_time: now,
        }
    }

    /// A fresh room simulation: paused at the beginning.
    pub fn paused_at_start(now: f64) -> Self {
        Self {
            status: PlaybackStatus::Paused,
            elapsed: 0.0,
            start_time: now,
        }
    }

    /// Overwrite all fields verbatim from a persisted snapshot.
    ///
    /// No validation, no recomputation — loading is not an observation.
    pub fn restore(state: &PlaybackSnapshot) -> Self {
        Self {
            status: state.status,
            elapsed: state.elapsed,
            start_time: state.start_time,
        }
    }

    /// Begin (or resume) playback.
    ///
    /// No-op when already playing: re-anchoring `start_time` mid-playback
    /// would corrupt the elapsed-time accounting.
    pub fn play(&mut self, now: f64) {
        if self.status == PlaybackStatus::Playing {
            return;
        }
        // The first intent treats an unstarted machine as paused.
        if self.status == PlaybackStatus::Unstarted {
            self.status = PlaybackStatus::Paused;
        }
        self.recompute(now);
        self.status = PlaybackStatus::Playing;
        log::trace!("playback started at {:.3}s", self.elapsed);
    }

    /// Pause playback, fixing `elapsed` at the current position.
    ///
    /// No-op when already paused.
    pub fn pause(&mut self, now: f64) {
        if self.status == PlaybackStatus::Paused {
            return;
        }
        if self.status == PlaybackStatus::Unstarted {
            self.status = PlaybackStatus::Paused;
        }
        self.recompute(now);
        self.status = PlaybackStatus::Paused;
        log::trace!("playback paused at {:.3}s", self.elapsed);
    }

    /// Jump to `target` seconds, unconditionally.
    ///
    /// Both fields are rewritten so the seek holds whichever one is live.
    /// Status is unchanged — a seek is not an intent.
    pub fn seek(&mut self, target: f64, now: f64) {
        self.elapsed = target;
        self.start_time = now - target;
        log::trace!("seek to {:.3}s", self.elapsed);
    }

    /// Observe the simulator: reconcile the stale field, return the state.
    pub fn snapshot(&mut self, now: f64) -> PlaybackSnapshot {
        self.recompute(now);
        PlaybackSnapshot {
            status: self.status,
            elapsed: self.elapsed,
            start_time: self.start_time,
        }
    }

    /// Bring the stale field up to date with `now`.
    fn recompute(&mut self, now: f64) {
        match self.status {
            PlaybackStatus::Paused => {
                // elapsed is authoritative; re-anchor the bookkeeping field.
                self.start_time = now - self.elapsed;
            }
            PlaybackStatus::Playing => {
                // start_time is authoritative. A clock that appears to have
                // moved backward clamps elapsed to 0, never negative.
                let now = if now < self.start_time {
                    self.start_time
                } else {
                    now
                };
                self.elapsed = now - self.start_time;
            }
            PlaybackStatus::Unstarted => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Rooms
// ───────────────────────────────────────────────────────────────────

/// Identifies one watch room. Rooms are user-named strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One shared video session: the currently loaded video plus the room's
/// authoritative simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Opaque identifier of the currently loaded video.
    pub video_id: String,
    /// Serialized simulator state; restore it to act on the room.
    pub simulation: PlaybackSnapshot,
}

impl Room {
    /// The room a first participant establishes: paused at the beginning.
    pub fn fresh(video_id: impl Into<String>, now: f64) -> Self {
        let mut sim = PlaybackSimulator::paused_at_start(now);
        Self {
            video_id: video_id.into(),
            simulation: sim.snapshot(now),
        }
    }
}

/// Persistence-side bookkeeping for a room record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMetadata {
    /// Creation timestamp (seconds since epoch).
    pub created_at: u64,
    /// Last modified timestamp (seconds since epoch).
    pub updated_at: u64,
}

impl RoomMetadata {
    pub fn new(now: f64) -> Self {
        Self {
            created_at: now as u64,
            updated_at: now as u64,
        }
    }

    pub fn touch(&mut self, now: f64) {
        self.updated_at = now as u64;
    }
}

// ───────────────────────────────────────────────────────────────────
// Watch URLs
// ───────────────────────────────────────────────────────────────────

/// Pull the video identifier out of a watch URL.
///
/// Takes the text following the `v=` query parameter, truncated at the next
/// `&`. Best effort, no validation — a URL with no `v=` yields `None` and
/// callers degrade to the empty identifier.
pub fn extract_video_id(url: &str) -> Option<&str> {
    let idx = url.find("v=")?;
    let tail = &url[idx + 2..];
    match tail.find('&') {
        Some(amp) => Some(&tail[..amp]),
        None => Some(tail),
    }
}
