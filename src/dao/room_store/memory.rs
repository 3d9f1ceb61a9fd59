//! Process-local store used in tests and when `STORAGE_BACKEND=memory`.
//!
//! Documents are kept as serialized JSON so every write goes through the same
//! encoding a remote store would apply.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::dao::{
    models::{RoomEntity, TrackEntity},
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};

const ROOM_PREFIX: &str = "room::";
const TRACK_PREFIX: &str = "track::";

#[derive(Debug, Error)]
#[error("in-memory store is offline")]
struct OfflineError;

/// Room store living in process memory. Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    documents: Arc<DashMap<String, String>>,
    offline: Arc<AtomicBool>,
}

impl MemoryRoomStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    /// Simulate an outage: every operation fails until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    #[cfg(test)]
    /// Decode the snapshot currently stored for `room_id`.
    pub fn room(&self, room_id: &str) -> Option<RoomEntity> {
        let raw = self.documents.get(&room_key(room_id))?;
        serde_json::from_str(raw.value()).ok()
    }

    #[cfg(test)]
    /// Decode the catalog entry for `external_id`.
    pub fn track(&self, external_id: &str) -> Option<TrackEntity> {
        let raw = self.documents.get(&track_key(external_id))?;
        serde_json::from_str(raw.value()).ok()
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store offline".into(),
                OfflineError,
            ));
        }
        Ok(())
    }

    fn put<T: serde::Serialize>(&self, key: String, value: &T) -> StorageResult<()> {
        self.ensure_online()?;
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Corrupted {
            key: key.clone(),
            source,
        })?;
        self.documents.insert(key, raw);
        Ok(())
    }
}

impl RoomStore for MemoryRoomStore {
    fn load_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let key = room_key(&room_id);
            let Some(raw) = store.documents.get(&key).map(|entry| entry.value().clone()) else {
                return Ok(None);
            };
            serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StorageError::Corrupted { key, source })
        })
    }

    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.put(room_key(&room.id), &room) })
    }

    fn save_track(&self, track: TrackEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.put(track_key(&track.external_id), &track) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}

fn room_key(room_id: &str) -> String {
    format!("{ROOM_PREFIX}{room_id}")
}

fn track_key(external_id: &str) -> String {
    format!("{TRACK_PREFIX}{external_id}")
}
