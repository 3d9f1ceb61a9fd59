use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dao::models::{PlayerEntity, RoomEntity, RoomPhaseEntity, TrackEntity},
    state::{
        state_machine::{RoomPhase, RoomStateMachine},
        track_pool::TrackPool,
    },
};

/// Durable player identity, established by the connection handshake.
pub type PlayerId = String;

/// Scoring formula used by a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Flat points for every correct guess.
    #[default]
    Relaxed,
    /// Correct guesses are worth more the faster they are cast.
    Intense,
}

/// Player info tracked for the lifetime of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Durable identifier (not tied to any connection).
    pub id: PlayerId,
    /// Display name shown to other players.
    pub display_name: String,
    /// Points accumulated during the current game.
    pub score: u32,
    /// Whether the player locked in their track selection.
    pub has_confirmed_selection: bool,
    /// Number of tracks the player reported picking so far.
    pub submitted_track_count: u32,
}

impl Player {
    /// Fresh player record with a zero score.
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            score: 0,
            has_confirmed_selection: false,
            submitted_track_count: 0,
        }
    }

    fn clear_selection(&mut self) {
        self.has_confirmed_selection = false;
        self.submitted_track_count = 0;
    }
}

/// A track admitted into the pool, tagged with the player who picked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
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
    pub owner_id: PlayerId,
    /// Display name of the owner at submission time.
    pub owner_name: String,
}

/// Aggregated state owned by a single room actor.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    /// Phase machine driving the room lifecycle.
    pub machine: RoomStateMachine,
    /// Every known player, in join order, online or not.
    pub players: IndexMap<PlayerId, Player>,
    /// Tracks submitted for the current game.
    pub pool: TrackPool,
    /// 1-based index of the round being played, 0 before the first round.
    pub current_round_index: usize,
    /// Track of the round being played.
    pub current_track: Option<Track>,
    /// Votes cast during the current round (voter -> suspected owner).
    pub votes: IndexMap<PlayerId, PlayerId>,
    /// Time each voter took to cast their vote.
    pub vote_latency_ms: IndexMap<PlayerId, u64>,
    /// Whether the current round has already been scored.
    pub round_resolved: bool,
    /// Scoring formula.
    pub game_mode: GameMode,
    /// Number of tracks each player must pick.
    pub tracks_per_player: u32,
}

impl RoomState {
    /// Empty waiting room with the given settings.
    pub fn new(game_mode: GameMode, tracks_per_player: u32) -> Self {
        Self {
            machine: RoomStateMachine::new(),
            players: IndexMap::new(),
            pool: TrackPool::new(),
            current_round_index: 0,
            current_track: None,
            votes: IndexMap::new(),
            vote_latency_ms: IndexMap::new(),
            round_resolved: true,
            game_mode,
            tracks_per_player: tracks_per_player.max(1),
        }
    }

    /// Current phase of the room.
    pub fn phase(&self) -> RoomPhase {
        self.machine.phase()
    }

    /// Override the room settings with the values provided by a joining client.
    pub fn apply_settings(&mut self, game_mode: Option<GameMode>, tracks_per_player: Option<u32>) {
        if let Some(mode) = game_mode {
            self.game_mode = mode;
        }
        if let Some(limit) = tracks_per_player {
            self.tracks_per_player = limit.max(1);
        }
    }

    /// True while nothing but lobby joins happened to this room.
    pub fn is_pristine(&self) -> bool {
        self.machine.version() == 0
            && self.pool.is_empty()
            && self.players.values().all(|player| player.score == 0)
    }

    /// Prepare a new game: scores and selections start from zero.
    pub fn begin_selection(&mut self) {
        for player in self.players.values_mut() {
            player.score = 0;
            player.clear_selection();
        }
        self.pool.clear();
        self.clear_round();
    }

    /// True when every known player confirmed and there is at least one player.
    pub fn all_confirmed(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .values()
                .all(|player| player.has_confirmed_selection)
    }

    /// Sum of the per-player reported track counts.
    pub fn total_submitted(&self) -> u32 {
        self.players
            .values()
            .map(|player| player.submitted_track_count)
            .sum()
    }

    /// Players allowed to vote on a track owned by `owner_id`.
    pub fn eligible_voters(&self, owner_id: &str) -> Vec<PlayerId> {
        self.players
            .keys()
            .filter(|id| id.as_str() != owner_id)
            .cloned()
            .collect()
    }

    /// Drop every vote and latency of the current round.
    pub fn clear_votes(&mut self) {
        self.votes.clear();
        self.vote_latency_ms.clear();
    }

    /// Tear the game down after the final round while keeping the roster and
    /// the final scores visible in the lobby.
    pub fn end_game(&mut self) {
        for player in self.players.values_mut() {
            player.clear_selection();
        }
        self.pool.clear();
        self.clear_round();
    }

    /// Forget every player and every game artefact, keeping only the settings.
    pub fn clear_all(&mut self) {
        self.players.clear();
        self.pool.clear();
        self.clear_round();
    }

    fn clear_round(&mut self) {
        self.current_round_index = 0;
        self.current_track = None;
        self.round_resolved = true;
        self.clear_votes();
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            score: value.score,
            has_confirmed_selection: value.has_confirmed_selection,
            submitted_track_count: value.submitted_track_count,
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            score: value.score,
            has_confirmed_selection: value.has_confirmed_selection,
            submitted_track_count: value.submitted_track_count,
        }
    }
}

impl From<TrackEntity> for Track {
    fn from(value: TrackEntity) -> Self {
        Self {
            external_id: value.external_id,
            title: value.title,
            artist: value.artist,
            preview_url: value.preview_url,
            cover_url: value.cover_url,
            owner_id: value.owner_id,
            owner_name: value.owner_name,
        }
    }
}

impl From<Track> for TrackEntity {
    fn from(value: Track) -> Self {
        Self {
            external_id: value.external_id,
            title: value.title,
            artist: value.artist,
            preview_url: value.preview_url,
            cover_url: value.cover_url,
            owner_id: value.owner_id,
            owner_name: value.owner_name,
        }
    }
}

impl From<RoomPhaseEntity> for RoomPhase {
    fn from(value: RoomPhaseEntity) -> Self {
        match value {
            RoomPhaseEntity::Waiting => RoomPhase::Waiting,
            RoomPhaseEntity::Selecting => RoomPhase::Selecting,
            RoomPhaseEntity::Playing => RoomPhase::Playing,
        }
    }
}

impl From<RoomPhase> for RoomPhaseEntity {
    fn from(value: RoomPhase) -> Self {
        match value {
            RoomPhase::Waiting => RoomPhaseEntity::Waiting,
            RoomPhase::Selecting => RoomPhaseEntity::Selecting,
            RoomPhase::Playing => RoomPhaseEntity::Playing,
        }
    }
}

impl From<RoomEntity> for RoomState {
    fn from(value: RoomEntity) -> Self {
        Self {
            machine: RoomStateMachine::restore(value.phase.into(), value.version),
            players: value
                .players
                .into_iter()
                .map(|entity| (entity.id.clone(), entity.into()))
                .collect(),
            pool: TrackPool::restore(
                value.track_pool.into_iter().map(Into::into).collect(),
                value.pool_shuffled,
            ),
            current_round_index: value.current_round_index,
            current_track: value.current_track.map(Into::into),
            votes: value.votes,
            vote_latency_ms: value.vote_latency_ms,
            round_resolved: value.round_resolved,
            game_mode: value.game_mode,
            tracks_per_player: value.tracks_per_player.max(1),
        }
    }
}

impl From<(String, RoomState)> for RoomEntity {
    fn from((id, room): (String, RoomState)) -> Self {
        let pool_shuffled = room.pool.is_shuffled();
        Self {
            id,
            phase: room.machine.phase().into(),
            version: room.machine.version(),
            players: room.players.into_values().map(Into::into).collect(),
            track_pool: room.pool.into_tracks().into_iter().map(Into::into).collect(),
            pool_shuffled,
            current_round_index: room.current_round_index,
            current_track: room.current_track.map(Into::into),
            votes: room.votes,
            vote_latency_ms: room.vote_latency_ms,
            round_resolved: room.round_resolved,
            game_mode: room.game_mode,
            tracks_per_player: room.tracks_per_player,
            updated_at: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{state_machine::RoomEvent, track_pool::TrackDraft};

    fn draft(id: &str) -> TrackDraft {
        TrackDraft {
            external_id: id.into(),
            title: format!("title {id}"),
            artist: format!("artist {id}"),
            preview_url: format!("https://cdn.example/{id}.mp3"),
            cover_url: format!("https://cdn.example/{id}.jpg"),
        }
    }

    fn busy_room() -> RoomState {
        let mut room = RoomState::new(GameMode::Intense, 2);
        room.players.insert("ana".into(), Player::new("ana", "Ana"));
        room.players.insert("bia".into(), Player::new("bia", "Bia"));
        room.players.insert("caio".into(), Player::new("caio", "Caio"));
        room.machine.apply(RoomEvent::StartSelection).unwrap();
        room.pool.submit("ana", "Ana", vec![draft("1"), draft("2")]);
        room.pool.submit("bia", "Bia", vec![draft("3")]);
        room.machine.apply(RoomEvent::AllConfirmed).unwrap();
        room.current_round_index = 2;
        room.current_track = room.pool.get(1).cloned();
        room.round_resolved = false;
        room.votes.insert("bia".into(), "ana".into());
        room.votes.insert("caio".into(), "bia".into());
        room.vote_latency_ms.insert("bia".into(), 1_250);
        room.vote_latency_ms.insert("caio".into(), 9_000);
        if let Some(player) = room.players.get_mut("caio") {
            player.score = 17;
            player.has_confirmed_selection = true;
            player.submitted_track_count = 2;
        }
        room
    }

    #[test]
    fn snapshot_round_trip_is_lossless() {
        let room = busy_room();
        let entity = RoomEntity::from(("room-1".to_string(), room.clone()));

        let json = serde_json::to_string(&entity).unwrap();
        let decoded: RoomEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, entity);

        let restored = RoomState::from(decoded);
        assert_eq!(restored, room);
    }

    #[test]
    fn snapshot_keeps_roster_order() {
        let entity = RoomEntity::from(("room-1".to_string(), busy_room()));
        let ids: Vec<_> = entity.players.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["ana", "bia", "caio"]);
    }

    #[test]
    fn begin_selection_resets_scores_and_selection() {
        let mut room = busy_room();
        room.begin_selection();

        assert!(room.pool.is_empty());
        assert_eq!(room.current_round_index, 0);
        assert!(room.votes.is_empty());
        assert!(room.players.values().all(|p| p.score == 0));
        assert!(room.players.values().all(|p| !p.has_confirmed_selection));
    }

    #[test]
    fn end_game_keeps_scores() {
        let mut room = busy_room();
        room.end_game();

        assert_eq!(room.players["caio"].score, 17);
        assert!(!room.players["caio"].has_confirmed_selection);
        assert_eq!(room.players["caio"].submitted_track_count, 0);
        assert!(room.current_track.is_none());
        assert!(room.pool.is_empty());
    }

    #[test]
    fn lobby_joins_keep_the_room_pristine() {
        let mut room = RoomState::new(GameMode::Relaxed, 1);
        room.players.insert("ana".into(), Player::new("ana", "Ana"));
        room.apply_settings(Some(GameMode::Intense), Some(3));
        assert!(room.is_pristine());

        room.machine.apply(RoomEvent::StartSelection).unwrap();
        assert!(!room.is_pristine());
        assert!(!busy_room().is_pristine());
    }

    #[test]
    fn eligible_voters_exclude_the_owner() {
        let room = busy_room();
        assert_eq!(room.eligible_voters("bia"), vec!["ana", "caio"]);
        assert_eq!(room.eligible_voters("ghost").len(), 3);
    }

    #[test]
    fn all_confirmed_requires_players() {
        let mut room = RoomState::new(GameMode::Relaxed, 1);
        assert!(!room.all_confirmed());

        room.players.insert("ana".into(), Player::new("ana", "Ana"));
        assert!(!room.all_confirmed());

        room.players["ana"].has_confirmed_selection = true;
        assert!(room.all_confirmed());
    }

    #[test]
    fn settings_are_clamped() {
        let mut room = RoomState::new(GameMode::Relaxed, 0);
        assert_eq!(room.tracks_per_player, 1);

        room.apply_settings(Some(GameMode::Intense), Some(0));
        assert_eq!(room.game_mode, GameMode::Intense);
        assert_eq!(room.tracks_per_player, 1);

        room.apply_settings(None, Some(4));
        assert_eq!(room.game_mode, GameMode::Intense);
        assert_eq!(room.tracks_per_player, 4);
    }
}
