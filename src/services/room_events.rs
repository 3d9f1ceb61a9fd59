//! Builders turning room state into outbound frames.

use crate::{
    dto::{
        room::{
            PlayerSummary, RoomStatusResponse, ScoreboardEntry, SelectionProgressEntry, TrackMedia,
        },
        ws::ServerMessage,
    },
    state::{
        registry::ConnectionRegistry,
        room::{RoomState, Track},
        state_machine::RoomPhase,
    },
};

/// Roster in join order, offline players included.
pub fn player_summaries(room: &RoomState, registry: &ConnectionRegistry) -> Vec<PlayerSummary> {
    room.players
        .values()
        .map(|player| PlayerSummary {
            id: player.id.clone(),
            name: player.display_name.clone(),
            score: player.score,
            online: registry.is_online(&player.id),
        })
        .collect()
}

/// Full roster frame.
pub fn roster(room: &RoomState, registry: &ConnectionRegistry) -> ServerMessage {
    ServerMessage::Roster {
        players: player_summaries(room, registry),
    }
}

/// Opening frame of the selection phase.
pub fn selection_started(room: &RoomState) -> ServerMessage {
    ServerMessage::SelectionStarted {
        tracks_per_player: room.tracks_per_player,
    }
}

/// Per-player selection counters and who already confirmed.
pub fn selection_progress(room: &RoomState) -> ServerMessage {
    let per_player = room
        .players
        .values()
        .map(|player| SelectionProgressEntry {
            id: player.id.clone(),
            name: player.display_name.clone(),
            count: player.submitted_track_count,
            confirmed: player.has_confirmed_selection,
            limit: room.tracks_per_player,
        })
        .collect();
    let confirmed_ids = room
        .players
        .values()
        .filter(|player| player.has_confirmed_selection)
        .map(|player| player.id.clone())
        .collect();

    ServerMessage::SelectionProgress {
        per_player,
        total_submitted: room.total_submitted(),
        confirmed_ids,
        total_players: room.players.len(),
    }
}

/// Announcement of the current round, if one is being played.
pub fn round_started(room: &RoomState) -> Option<ServerMessage> {
    let track = room.current_track.as_ref()?;
    Some(ServerMessage::RoundStarted {
        number: room.current_round_index,
        total_rounds: room.pool.len(),
        track: TrackMedia::from(track),
    })
}

/// Reveal of `track`'s owner with the votes cast and the updated roster.
pub fn round_resolved(room: &RoomState, registry: &ConnectionRegistry, track: &Track) -> ServerMessage {
    ServerMessage::RoundResolved {
        owner_id: track.owner_id.clone(),
        owner_name: track.owner_name.clone(),
        votes: room.votes.clone(),
        roster: player_summaries(room, registry),
    }
}

/// Final scoreboard, best first. Ties keep join order.
pub fn game_ended(room: &RoomState) -> ServerMessage {
    let mut final_scoreboard: Vec<ScoreboardEntry> = room
        .players
        .values()
        .map(|player| ScoreboardEntry {
            name: player.display_name.clone(),
            score: player.score,
        })
        .collect();
    final_scoreboard.sort_by(|a, b| b.score.cmp(&a.score));

    ServerMessage::GameEnded { final_scoreboard }
}

/// Frames a freshly (re)connected player needs to render the current phase.
pub fn join_snapshot(room: &RoomState, registry: &ConnectionRegistry) -> Vec<ServerMessage> {
    let mut frames = vec![roster(room, registry)];
    match room.phase() {
        RoomPhase::Waiting => {}
        RoomPhase::Selecting => {
            frames.push(selection_started(room));
            frames.push(selection_progress(room));
        }
        RoomPhase::Playing => match room.current_track.as_ref() {
            Some(track) if room.current_round_index > 0 && room.round_resolved => {
                frames.push(round_resolved(room, registry, track));
            }
            Some(_) if room.current_round_index > 0 => frames.extend(round_started(room)),
            _ => frames.push(ServerMessage::GameStarting),
        },
    }
    frames
}

/// Public status of the room. The last write time is attached by the caller.
pub fn room_status(
    room_id: &str,
    room: &RoomState,
    registry: &ConnectionRegistry,
) -> RoomStatusResponse {
    RoomStatusResponse {
        room_id: room_id.to_string(),
        phase: room.phase().into(),
        version: room.machine.version(),
        current_round: room.current_round_index,
        total_rounds: room.pool.len(),
        game_mode: room.game_mode,
        tracks_per_player: room.tracks_per_player,
        players: player_summaries(room, registry),
        updated_at: None,
    }
}
