use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dto::{format_system_time, phase::VisibleRoomPhase, validation::validate_identifier},
    state::room::{GameMode, PlayerId, Track},
};

/// Display name assigned when the handshake does not carry one.
pub const DEFAULT_PLAYER_NAME: &str = "Player";

/// Room identifier taken from the request path.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Path)]
pub struct RoomPath {
    /// Opaque room identifier.
    #[validate(custom(function = "validate_identifier"))]
    pub room_id: String,
}

/// Identity handshake carried by the WebSocket upgrade query string.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JoinQuery {
    /// Durable player identifier; reconnecting with the same id resumes the player.
    #[validate(custom(function = "validate_identifier"))]
    pub player_id: String,
    /// Display name, defaults to `Player`.
    #[validate(length(min = 1, max = 40))]
    pub name: Option<String>,
    /// Scoring mode, applied only while the room is waiting.
    pub mode: Option<GameMode>,
    /// Tracks each player picks, applied only while the room is waiting.
    #[validate(range(min = 1, max = 20))]
    pub tracks_per_player: Option<u32>,
}

impl JoinQuery {
    /// Trimmed display name or the default one.
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PLAYER_NAME)
            .to_string()
    }
}

/// Player as shown in rosters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlayerSummary {
    /// Durable player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Points earned in the current or last game.
    pub score: u32,
    /// Whether the player has a live connection.
    pub online: bool,
}

/// Selection counters of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SelectionProgressEntry {
    /// Durable player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Tracks picked so far.
    pub count: u32,
    /// Whether the player submitted their final list.
    pub confirmed: bool,
    /// Tracks each player may pick.
    pub limit: u32,
}

/// The part of a track players may see while guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackMedia {
    /// Audio preview to play during the round.
    pub preview_url: String,
    /// Cover art.
    pub cover_url: String,
}

impl From<&Track> for TrackMedia {
    fn from(track: &Track) -> Self {
        Self {
            preview_url: track.preview_url.clone(),
            cover_url: track.cover_url.clone(),
        }
    }
}

/// Line of the final scoreboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ScoreboardEntry {
    /// Display name.
    pub name: String,
    /// Final score.
    pub score: u32,
}

/// Public status of a room returned by `GET /rooms/{room_id}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatusResponse {
    /// Room identifier.
    pub room_id: String,
    /// Current phase.
    pub phase: VisibleRoomPhase,
    /// Number of phase transitions applied to the room.
    pub version: usize,
    /// 1-based round being played, 0 outside a game.
    pub current_round: usize,
    /// Rounds in the current game.
    pub total_rounds: usize,
    /// Scoring mode.
    pub game_mode: GameMode,
    /// Tracks each player picks.
    pub tracks_per_player: u32,
    /// Roster in join order.
    pub players: Vec<PlayerSummary>,
    /// RFC 3339 timestamp of the last snapshot write, if any.
    pub updated_at: Option<String>,
}

impl RoomStatusResponse {
    /// Attach the last write time, formatted for clients.
    pub fn with_updated_at(mut self, updated_at: Option<std::time::SystemTime>) -> Self {
        self.updated_at = updated_at.map(format_system_time);
        self
    }
}
