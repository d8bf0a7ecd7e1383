//! RocksDB-backed persistent room store.
//!
//! Column families:
//! - `videos`      — room id → current video identifier (raw UTF-8)
//! - `simulations` — room id → bincode `PlaybackSnapshot`
//! - `metadata`    — room id → bincode `RoomMetadata` (created_at/updated_at)
//!
//! A room exists iff its `simulations` record exists; the simulation is the
//! authoritative half of a room, and a missing video identifier degrades to
//! the empty string. Whole-room writes go through an atomic `WriteBatch` so
//! a reader never observes a new video paired with the old position.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};

use matinee_core::{wall_clock_secs, PlaybackSnapshot, Room, RoomId, RoomMetadata};

use crate::reconcile::RoomStore;
use crate::storage::StoreError;

/// Column family names.
const CF_VIDEOS: &str = "videos";
const CF_SIMULATIONS: &str = "simulations";
const CF_METADATA: &str = "metadata";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_VIDEOS, CF_SIMULATIONS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB — room records are tiny)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 8MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("matinee_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 8 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// RocksDB-backed room store.
pub struct RoomDb {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
}

impl RoomDb {
    /// Open the room store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Self::cf_options(&config);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    /// Build column-family options. Records are tens of bytes, so point
    /// lookups dominate and compression buys nothing.
    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);

        opts
    }

    /// Check if a room exists.
    pub fn contains(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let cf = self.cf(CF_SIMULATIONS)?;
        Ok(self.db.get_cf(&cf, room_id.as_str().as_bytes())?.is_some())
    }

    /// List all room ids in the store.
    pub fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        let cf = self.cf(CF_SIMULATIONS)?;
        let mut ids = Vec::new();

        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::DeserializationError("Invalid room key".into()))?;
            ids.push(RoomId::new(name));
        }

        Ok(ids)
    }

    /// Load a room's bookkeeping metadata.
    pub fn load_metadata(&self, room_id: &RoomId) -> Result<RoomMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, room_id.as_str().as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(room_id.clone())),
        }
    }

    /// Delete a room and all its sub-fields.
    pub fn delete_room(&self, room_id: &RoomId) -> Result<(), StoreError> {
        let key = room_id.as_str().as_bytes();
        let mut batch = WriteBatch::default();
        batch.delete_cf(&self.cf(CF_VIDEOS)?, key);
        batch.delete_cf(&self.cf(CF_SIMULATIONS)?, key);
        batch.delete_cf(&self.cf(CF_METADATA)?, key);
        self.db.write(batch)?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    /// Metadata for a write happening now: touch if present, create if not.
    fn touched_metadata(&self, room_id: &RoomId) -> Result<RoomMetadata, StoreError> {
        let now = wall_clock_secs();
        let mut meta = self
            .load_metadata(room_id)
            .unwrap_or_else(|_| RoomMetadata::new(now));
        meta.touch(now);
        Ok(meta)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }
}

impl RoomStore for RoomDb {
    fn load(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        let key = room_id.as_str().as_bytes();

        let simulation = match self.db.get_cf(&self.cf(CF_SIMULATIONS)?, key)? {
            Some(bytes) => decode::<PlaybackSnapshot>(&bytes)?,
            None => return Ok(None),
        };
        let video_id = match self.db.get_cf(&self.cf(CF_VIDEOS)?, key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| StoreError::DeserializationError("Invalid video id".into()))?,
            None => String::new(),
        };

        Ok(Some(Room {
            video_id,
            simulation,
        }))
    }

    fn save(&self, room_id: &RoomId, room: &Room) -> Result<(), StoreError> {
        let key = room_id.as_str().as_bytes();
        let meta = self.touched_metadata(room_id)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_VIDEOS)?, key, room.video_id.as_bytes());
        batch.put_cf(&self.cf(CF_SIMULATIONS)?, key, encode(&room.simulation)?);
        batch.put_cf(&self.cf(CF_METADATA)?, key, encode(&meta)?);
        self.write_batch(batch)
    }

    fn save_simulation(
        &self,
        room_id: &RoomId,
        simulation: &PlaybackSnapshot,
    ) -> Result<(), StoreError> {
        let key = room_id.as_str().as_bytes();
        let meta = self.touched_metadata(room_id)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_SIMULATIONS)?, key, encode(simulation)?);
        batch.put_cf(&self.cf(CF_METADATA)?, key, encode(&meta)?);
        self.write_batch(batch)
    }

    fn save_video(&self, room_id: &RoomId, video_id: &str) -> Result<(), StoreError> {
        let key = room_id.as_str().as_bytes();
        let meta = self.touched_metadata(room_id)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_VIDEOS)?, key, video_id.as_bytes());
        batch.put_cf(&self.cf(CF_METADATA)?, key, encode(&meta)?);
        self.write_batch(batch)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matinee_core::PlaybackStatus;

    const T0: f64 = 1_700_000_000.0;

    fn open_store(dir: &tempfile::TempDir) -> RoomDb {
        RoomDb::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap()
    }

    #[test]
    fn test_store_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.path().exists());
    }

    #[test]
    fn test_room_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let room_id = RoomId::new("movie-night");
        let room = Room::fresh("abc123", T0);
        store.save(&room_id, &room).unwrap();

        let loaded = store.load(&room_id).unwrap().unwrap();
        assert_eq!(loaded, room);
    }

    #[test]
    fn test_unknown_room_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.load(&RoomId::new("ghost")).unwrap().is_none());
    }

    #[test]
    fn test_simulation_saved_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let room_id = RoomId::new("movie-night");
        store.save(&room_id, &Room::fresh("abc123", T0)).unwrap();

        let updated = PlaybackSnapshot {
            status: PlaybackStatus::Playing,
            elapsed: 42.0,
            start_time: T0 - 42.0,
        };
        store.save_simulation(&room_id, &updated).unwrap();

        // The video identifier is untouched; only the simulation moved.
        let loaded = store.load(&room_id).unwrap().unwrap();
        assert_eq!(loaded.video_id, "abc123");
        assert_eq!(loaded.simulation, updated);
    }

    #[test]
    fn test_video_saved_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let room_id = RoomId::new("movie-night");
        let room = Room::fresh("abc123", T0);
        store.save(&room_id, &room).unwrap();

        store.save_video(&room_id, "xyz789").unwrap();

        let loaded = store.load(&room_id).unwrap().unwrap();
        assert_eq!(loaded.video_id, "xyz789");
        assert_eq!(loaded.simulation, room.simulation);
    }

    #[test]
    fn test_rooms_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let room_id = RoomId::new("movie-night");

        let mut room = Room::fresh("abc123", T0);
        room.simulation.elapsed = 77.5;
        {
            let store = RoomDb::open(StoreConfig::for_testing(&path)).unwrap();
            store.save(&room_id, &room).unwrap();
        }

        let store = RoomDb::open(StoreConfig::for_testing(&path)).unwrap();
        let loaded = store.load(&room_id).unwrap().unwrap();
        assert_eq!(loaded, room);
    }

    #[test]
    fn test_contains_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let a = RoomId::new("room-a");
        let b = RoomId::new("room-b");
        store.save(&a, &Room::fresh("v1", T0)).unwrap();
        store.save(&b, &Room::fresh("v2", T0)).unwrap();

        assert!(store.contains(&a).unwrap());
        assert!(!store.contains(&RoomId::new("ghost")).unwrap());

        let listed = store.list_rooms().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a));
        assert!(listed.contains(&b));
    }

    #[test]
    fn test_delete_room() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let room_id = RoomId::new("movie-night");
        store.save(&room_id, &Room::fresh("abc123", T0)).unwrap();
        assert!(store.contains(&room_id).unwrap());

        store.delete_room(&room_id).unwrap();
        assert!(!store.contains(&room_id).unwrap());
        assert!(store.load(&room_id).unwrap().is_none());
        assert!(store.load_metadata(&room_id).is_err());
    }

    #[test]
    fn test_metadata_tracks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let room_id = RoomId::new("movie-night");
        store.save(&room_id, &Room::fresh("abc123", T0)).unwrap();

        let meta = store.load_metadata(&room_id).unwrap();
        assert!(meta.created_at > 0);
        assert!(meta.updated_at >= meta.created_at);
    }
}
