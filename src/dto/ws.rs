//! Frames exchanged over a room WebSocket.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        room::{PlayerSummary, ScoreboardEntry, SelectionProgressEntry, TrackMedia},
        validation::validate_identifier,
    },
    state::{room::PlayerId, track_pool::TrackDraft},
};

/// Failure to turn a text frame into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum InboundError {
    /// Frame is not JSON or does not match any known shape.
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),
    /// Frame parsed but carries invalid values.
    #[error("invalid frame: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Open track selection from the lobby.
    StartSelection,
    /// The player picked one more track. `sync` only asks for a progress refresh.
    TrackAdded {
        #[serde(default)]
        sync: bool,
    },
    /// The player dropped one of their picks.
    TrackRemoved,
    /// Final, confirmed list of picks.
    TracksSubmitted { tracks: Vec<TrackInput> },
    /// Guess of who owns the current track.
    Vote {
        #[serde(rename = "votedId")]
        voted_id: PlayerId,
        #[serde(rename = "latencyMs", default)]
        latency_ms: u64,
    },
    /// Any other `type`, ignored.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(raw)?;
        message.validate()?;
        Ok(message)
    }
}

impl Validate for ClientMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match self {
            ClientMessage::TracksSubmitted { tracks } => {
                if tracks.is_empty() {
                    errors.add("tracks", validator::ValidationError::new("empty"));
                }
                for track in tracks {
                    if let Err(track_errors) = track.validate() {
                        errors.merge_self("tracks", Err(track_errors));
                    }
                }
            }
            ClientMessage::Vote { voted_id, .. } => {
                if let Err(e) = validate_identifier(voted_id) {
                    errors.add("votedId", e);
                }
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Track metadata as picked by a client from the music catalog proxy.
///
/// Ownership fields a client might add are not part of the shape and are
/// dropped: the owner is always the sending player.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackInput {
    #[validate(custom(function = "validate_identifier"))]
    pub external_id: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 200))]
    pub artist: String,
    #[validate(url)]
    pub preview_url: String,
    #[serde(default)]
    pub cover_url: String,
}

impl From<TrackInput> for TrackDraft {
    fn from(value: TrackInput) -> Self {
        Self {
            external_id: value.external_id,
            title: value.title,
            artist: value.artist,
            preview_url: value.preview_url,
            cover_url: value.cover_url,
        }
    }
}

/// Messages pushed by a room to its players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full roster with presence flags.
    Roster { players: Vec<PlayerSummary> },
    /// Track selection opened.
    SelectionStarted { tracks_per_player: u32 },
    /// Per-player selection counters.
    SelectionProgress {
        per_player: Vec<SelectionProgressEntry>,
        total_submitted: u32,
        confirmed_ids: Vec<PlayerId>,
        total_players: usize,
    },
    /// Everyone confirmed; the first round starts after a short presentation.
    GameStarting,
    /// A new round is playing. The owner is deliberately absent.
    RoundStarted {
        number: usize,
        total_rounds: usize,
        track: TrackMedia,
    },
    /// Round outcome with the owner revealed.
    RoundResolved {
        owner_id: PlayerId,
        owner_name: String,
        votes: IndexMap<PlayerId, PlayerId>,
        roster: Vec<PlayerSummary>,
    },
    /// Final scoreboard, best score first.
    GameEnded {
        final_scoreboard: Vec<ScoreboardEntry>,
    },
}
