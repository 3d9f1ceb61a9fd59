use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::RoomPhase;

/// Publicly visible room phase exposed to clients.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleRoomPhase {
    /// Lobby, no game running.
    Waiting,
    /// Players are picking their tracks.
    Selecting,
    /// Rounds are being played.
    Playing,
}

impl From<RoomPhase> for VisibleRoomPhase {
    fn from(value: RoomPhase) -> Self {
        match value {
            RoomPhase::Waiting => VisibleRoomPhase::Waiting,
            RoomPhase::Selecting => VisibleRoomPhase::Selecting,
            RoomPhase::Playing => VisibleRoomPhase::Playing,
        }
    }
}
