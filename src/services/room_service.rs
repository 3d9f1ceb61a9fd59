//! Entry points resolving a room id to its live actor.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    dto::room::RoomStatusResponse,
    error::ServiceError,
    services::room_actor::{self, RoomCommand, RoomHandle},
    state::SharedState,
};

/// Longest an HTTP caller waits for a room actor to answer. Covers a cold
/// start that has to wait for the storage backend.
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_DISPATCH_ATTEMPTS: usize = 2;

/// Handle of the actor owning `room_id`, spawning one if the room is not live.
pub fn room_handle(state: &SharedState, room_id: &str) -> RoomHandle {
    let mut entry = state
        .rooms()
        .entry(room_id.to_string())
        .or_insert_with(|| room_actor::spawn(state.clone(), room_id.to_string()));

    if entry.is_closed() {
        debug!(room_id, "replacing stopped room actor");
        *entry = room_actor::spawn(state.clone(), room_id.to_string());
    }
    entry.clone()
}

/// Deliver `command` to the actor of `room_id`.
///
/// A send racing against a hibernating actor is retried once on a fresh actor.
pub fn dispatch(state: &SharedState, room_id: &str, command: RoomCommand) {
    let mut command = command;
    for _ in 0..MAX_DISPATCH_ATTEMPTS {
        let handle = room_handle(state, room_id);
        match handle.send(command) {
            Ok(()) => return,
            Err(returned) => {
                let instance = handle.instance();
                state
                    .rooms()
                    .remove_if(room_id, |_, current| current.instance() == instance);
                command = returned;
            }
        }
    }
    warn!(room_id, command = ?command, "dropping command for unreachable room actor");
}

/// Current public status of `room_id`, loading the room if needed.
pub async fn room_status(
    state: &SharedState,
    room_id: &str,
) -> Result<RoomStatusResponse, ServiceError> {
    request(state, room_id, |reply| RoomCommand::Status { reply }).await
}

/// Tear `room_id` down: every player is disconnected and forgotten.
pub async fn reset_room(
    state: &SharedState,
    room_id: &str,
) -> Result<RoomStatusResponse, ServiceError> {
    request(state, room_id, |reply| RoomCommand::Reset { reply }).await
}

async fn request<F>(state: &SharedState, room_id: &str, make: F) -> Result<RoomStatusResponse, ServiceError>
where
    F: FnOnce(oneshot::Sender<RoomStatusResponse>) -> RoomCommand,
{
    let (reply, rx) = oneshot::channel();
    dispatch(state, room_id, make(reply));

    match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(_)) => Err(ServiceError::InvalidState("room actor stopped".into())),
        Err(_) => Err(ServiceError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::room_store::memory::MemoryRoomStore, dto::phase::VisibleRoomPhase,
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn status_spawns_room_once() {
        let state = AppState::new(AppConfig::default());
        state
            .install_room_store(Arc::new(MemoryRoomStore::new()))
            .await;

        let status = room_status(&state, "lobby").await.unwrap();
        assert_eq!(status.room_id, "lobby");
        assert_eq!(status.phase, VisibleRoomPhase::Waiting);
        assert!(status.players.is_empty());

        let first = state.rooms().get("lobby").map(|h| h.instance());
        room_status(&state, "lobby").await.unwrap();
        assert_eq!(state.rooms().get("lobby").map(|h| h.instance()), first);
        assert_eq!(state.rooms().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_actor_is_replaced() {
        let state = AppState::new(AppConfig::default());
        state
            .install_room_store(Arc::new(MemoryRoomStore::new()))
            .await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<RoomCommand>();
        drop(rx);
        let dead = room_actor::RoomHandle::detached(tx);
        state.rooms().insert("lobby".into(), dead);

        let status = room_status(&state, "lobby").await.unwrap();
        assert_eq!(status.room_id, "lobby");
        assert!(!state.rooms().get("lobby").unwrap().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_cold_start_still_answers() {
        let state = AppState::new(AppConfig::default());

        let status = room_status(&state, "lobby").await.unwrap();
        assert_eq!(status.phase, VisibleRoomPhase::Waiting);
        assert!(status.updated_at.is_none());
    }
}
