use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::state::room::GameMode;

/// Player record persisted inside a room snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Durable player identifier.
    pub id: String,
    /// Display name chosen by the player.
    pub display_name: String,
    /// Current score for the player.
    pub score: u32,
    /// Whether the player locked in their selection.
    pub has_confirmed_selection: bool,
    /// Number of tracks the player reported picking.
    pub submitted_track_count: u32,
}

/// Track stored both in room snapshots and in the external catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackEntity {
    /// Identifier of the track in the external music catalog.
    pub external_id: String,
    /// Track title.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Playable clip URL.
    pub preview_url: String,
    /// Album cover URL.
    pub cover_url: String,
    /// Player who contributed the track.
    pub owner_id: String,
    /// Display name of the owner at submission time.
    pub owner_name: String,
}

/// Persisted room phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhaseEntity {
    Waiting,
    Selecting,
    Playing,
}

/// Full room snapshot written on every state-affecting transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Room identifier (the snapshot key).
    pub id: String,
    /// Phase the room was in when saved.
    pub phase: RoomPhaseEntity,
    /// State machine version when saved.
    pub version: usize,
    /// Roster in join order.
    pub players: Vec<PlayerEntity>,
    /// Tracks of the current game, in play order once shuffled.
    pub track_pool: Vec<TrackEntity>,
    /// Whether the play order has been fixed.
    pub pool_shuffled: bool,
    /// 1-based index of the current round, 0 before the first one.
    pub current_round_index: usize,
    /// Track of the current round.
    pub current_track: Option<TrackEntity>,
    /// Votes of the current round (voter -> suspected owner).
    pub votes: IndexMap<String, String>,
    /// Vote latencies of the current round.
    pub vote_latency_ms: IndexMap<String, u64>,
    /// Whether the current round was already scored.
    pub round_resolved: bool,
    /// Scoring formula.
    pub game_mode: GameMode,
    /// Number of tracks each player must pick.
    pub tracks_per_player: u32,
    /// Last time the snapshot was written.
    pub updated_at: SystemTime,
}
