//! Snapshot reads and writes issued by room actors.

use std::{sync::Arc, time::SystemTime};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    dao::{models::RoomEntity, room_store::RoomStore},
    error::ServiceError,
    state::{
        SharedState,
        room::{RoomState, Track},
    },
};

/// Wait for a storage backend to be installed, at most one storage timeout.
///
/// Used at cold start so a room created right after boot does not overwrite
/// its snapshot before the supervisor connected.
async fn wait_for_store(state: &SharedState) -> Option<Arc<dyn RoomStore>> {
    let mut watcher = state.degraded_watcher();
    // The watch guard must not live across the store lookup below.
    let ready = timeout(
        state.storage_timeout(),
        watcher.wait_for(|degraded| !*degraded),
    )
    .await
    .is_ok_and(|changed| changed.is_ok());
    if !ready {
        return None;
    }
    state.room_store().await
}

/// Load the persisted snapshot of `room_id`, if any.
pub async fn load_room(
    state: &SharedState,
    room_id: &str,
) -> Result<Option<(RoomState, SystemTime)>, ServiceError> {
    let store = wait_for_store(state).await.ok_or(ServiceError::Degraded)?;
    read_snapshot(state, store, room_id).await
}

/// Same as [`load_room`] without waiting for the storage backend.
pub async fn reload_room(
    state: &SharedState,
    room_id: &str,
) -> Result<Option<(RoomState, SystemTime)>, ServiceError> {
    let store = state.room_store().await.ok_or(ServiceError::Degraded)?;
    read_snapshot(state, store, room_id).await
}

async fn read_snapshot(
    state: &SharedState,
    store: Arc<dyn RoomStore>,
    room_id: &str,
) -> Result<Option<(RoomState, SystemTime)>, ServiceError> {
    let loaded = timeout(state.storage_timeout(), store.load_room(room_id.to_string()))
        .await
        .map_err(|_| ServiceError::Timeout)??;

    Ok(loaded.map(|entity| {
        let updated_at = entity.updated_at;
        info!(room_id, phase = ?entity.phase, players = entity.players.len(), "restored room snapshot");
        (RoomState::from(entity), updated_at)
    }))
}

/// Write the full snapshot of `room_id`, returning the recorded write time.
pub async fn save_room(
    state: &SharedState,
    room_id: &str,
    room: &RoomState,
) -> Result<SystemTime, ServiceError> {
    let store = state.room_store().await.ok_or(ServiceError::Degraded)?;
    let entity = RoomEntity::from((room_id.to_string(), room.clone()));
    let updated_at = entity.updated_at;

    timeout(state.storage_timeout(), store.save_room(entity))
        .await
        .map_err(|_| ServiceError::Timeout)??;
    Ok(updated_at)
}

/// Record freshly admitted tracks in the external catalog without waiting.
pub fn catalog_tracks(state: &SharedState, room_id: &str, tracks: Vec<Track>) {
    if tracks.is_empty() {
        return;
    }
    let state = state.clone();
    let room_id = room_id.to_string();
    tokio::spawn(async move {
        let Some(store) = state.room_store().await else {
            debug!(room_id = %room_id, count = tracks.len(), "skipping track catalog write (degraded mode)");
            return;
        };
        for track in tracks {
            let external_id = track.external_id.clone();
            match timeout(state.storage_timeout(), store.save_track(track.into())).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(room_id = %room_id, external_id = %external_id, error = %err, "failed to catalog track")
                }
                Err(_) => {
                    warn!(room_id = %room_id, external_id = %external_id, "timed out cataloging track")
                }
            }
        }
    });
}
