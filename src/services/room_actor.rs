//! One task per room owning its state, its connections and its timers.
//!
//! Every inbound event (join, leave, client frame, timer fire, admin request)
//! is a [`RoomCommand`] drained one at a time, so handlers never interleave.

use std::{
    collections::HashSet,
    time::{Duration, SystemTime},
};

use axum::extract::ws::Message;
use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    dto::{
        room::RoomStatusResponse,
        ws::{ClientMessage, ServerMessage, TrackInput},
    },
    error::ServiceError,
    services::{
        persistence, room_events,
        round_scheduler::{RoundScheduler, spawn_delayed},
        room_service, scoring,
    },
    state::{
        SharedState,
        registry::{ConnectionId, ConnectionRegistry, PlayerConnection},
        room::{GameMode, Player, PlayerId, RoomState},
        state_machine::{RoomEvent, RoomPhase},
        track_pool::TrackDraft,
    },
};

/// Room settings a client may propose when joining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomSettings {
    /// Scoring mode proposed by the client.
    pub mode: Option<GameMode>,
    /// Number of tracks each player should pick.
    pub tracks_per_player: Option<u32>,
}

/// Events processed by a room actor.
#[derive(Debug)]
pub enum RoomCommand {
    /// A socket completed its handshake.
    Join {
        player_id: PlayerId,
        display_name: String,
        settings: RoomSettings,
        connection: PlayerConnection,
    },
    /// A socket closed.
    Leave { connection_id: ConnectionId },
    /// A validated frame sent by a connected player.
    Client {
        player_id: PlayerId,
        message: ClientMessage,
    },
    /// The timer of the round armed with `generation` fired.
    RoundExpired { generation: u64 },
    /// Presentation or post-round delay elapsed.
    Advance { generation: u64 },
    /// The idle timer armed with `generation` fired.
    IdleCheck { generation: u64 },
    /// Public status request.
    Status {
        reply: oneshot::Sender<RoomStatusResponse>,
    },
    /// Administrative teardown of the room.
    Reset {
        reply: oneshot::Sender<RoomStatusResponse>,
    },
}

impl RoomCommand {
    /// Timer fires only make sense for the actor that armed them.
    fn is_timer(&self) -> bool {
        matches!(
            self,
            RoomCommand::RoundExpired { .. }
                | RoomCommand::Advance { .. }
                | RoomCommand::IdleCheck { .. }
        )
    }
}

/// Cloneable sender side of a running room actor.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    instance: Uuid,
    tx: UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    /// Queue `command`, handing it back if the actor stopped.
    pub fn send(&self, command: RoomCommand) -> Result<(), RoomCommand> {
        self.tx.send(command).map_err(|err| err.0)
    }

    /// Whether the actor stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Identity of the actor task, distinct for every spawn of the same room.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    #[cfg(test)]
    pub(crate) fn detached(tx: UnboundedSender<RoomCommand>) -> Self {
        Self {
            instance: Uuid::new_v4(),
            tx,
        }
    }
}

/// Spawn the actor of `room_id`. It restores the room snapshot before handling
/// any command.
pub fn spawn(state: SharedState, room_id: String) -> RoomHandle {
    spawn_with_rng(state, room_id, StdRng::from_os_rng())
}

/// Same as [`spawn`] with an explicit shuffle source.
pub fn spawn_with_rng(state: SharedState, room_id: String, rng: StdRng) -> RoomHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let instance = Uuid::new_v4();
    let config = state.config();
    let room = RoomState::new(config.default_game_mode(), config.default_tracks_per_player());

    let session = RoomSession {
        room_id,
        instance,
        room,
        registry: ConnectionRegistry::new(),
        scheduler: RoundScheduler::new(&tx),
        idle_generation: 0,
        idle_timer: None,
        rng,
        tx: tx.downgrade(),
        updated_at: None,
        loaded: false,
        state,
    };
    tokio::spawn(session.run(rx));

    RoomHandle { instance, tx }
}

enum Flow {
    Continue,
    Hibernate,
}

enum Wake {
    Command(Option<RoomCommand>),
    /// The degraded flag changed; `alive` is false once its sender is gone.
    Storage { alive: bool },
}

struct RoomSession {
    room_id: String,
    instance: Uuid,
    state: SharedState,
    room: RoomState,
    registry: ConnectionRegistry,
    scheduler: RoundScheduler<RoomCommand>,
    idle_generation: u64,
    idle_timer: Option<JoinHandle<()>>,
    rng: StdRng,
    tx: WeakUnboundedSender<RoomCommand>,
    updated_at: Option<SystemTime>,
    /// Whether the stored snapshot was read (or found missing). Snapshot
    /// writes are held back until then.
    loaded: bool,
}

impl RoomSession {
    async fn run(mut self, mut rx: UnboundedReceiver<RoomCommand>) {
        let mut storage = Some(self.state.degraded_watcher());
        self.restore().await;

        loop {
            let wake = match storage.as_mut() {
                Some(watcher) if !self.loaded => tokio::select! {
                    biased;
                    changed = watcher.changed() => Wake::Storage { alive: changed.is_ok() },
                    command = rx.recv() => Wake::Command(command),
                },
                _ => Wake::Command(rx.recv().await),
            };
            let command = match wake {
                Wake::Command(Some(command)) => command,
                Wake::Command(None) => break,
                Wake::Storage { alive: false } => {
                    storage = None;
                    continue;
                }
                Wake::Storage { alive: true } => {
                    let ready = storage
                        .as_ref()
                        .is_some_and(|watcher| !*watcher.borrow());
                    if ready {
                        self.late_restore().await;
                    }
                    continue;
                }
            };
            if let Flow::Hibernate = self.handle(command).await {
                self.hibernate(rx);
                return;
            }
        }
        debug!(room_id = %self.room_id, "room actor stopped");
    }

    async fn handle(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join {
                player_id,
                display_name,
                settings,
                connection,
            } => self.on_join(player_id, display_name, settings, connection).await,
            RoomCommand::Leave { connection_id } => self.on_leave(connection_id),
            RoomCommand::Client { player_id, message } => {
                self.on_client_message(player_id, message).await
            }
            RoomCommand::RoundExpired { generation } => self.on_round_expired(generation).await,
            RoomCommand::Advance { generation } => self.on_advance(generation).await,
            RoomCommand::IdleCheck { generation } => return self.on_idle_check(generation).await,
            RoomCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            RoomCommand::Reset { reply } => {
                self.reset().await;
                let _ = reply.send(self.status());
            }
        }
        Flow::Continue
    }

    /// Load the snapshot and resume a game interrupted by a restart.
    async fn restore(&mut self) {
        let outcome = persistence::load_room(&self.state, &self.room_id).await;
        self.settle_load(outcome);
        self.arm_idle();
    }

    /// Retry a load that failed at cold start. Returns whether the room is
    /// now backed by its stored snapshot.
    async fn late_restore(&mut self) -> bool {
        let outcome = persistence::reload_room(&self.state, &self.room_id).await;
        if self.settle_load(outcome) {
            for player_id in self.registry.list_online_ids() {
                for frame in room_events::join_snapshot(&self.room, &self.registry) {
                    self.registry.send_to(&player_id, &frame);
                }
            }
        }
        self.loaded
    }

    /// Record the outcome of a snapshot read. Returns whether the stored room
    /// replaced the live one.
    fn settle_load(
        &mut self,
        outcome: Result<Option<(RoomState, SystemTime)>, ServiceError>,
    ) -> bool {
        match outcome {
            Ok(Some((stored, updated_at))) => {
                self.loaded = true;
                if !self.room.is_pristine() {
                    warn!(room_id = %self.room_id, "room changed before its snapshot could be read; keeping live state");
                    return false;
                }
                self.adopt(stored, updated_at);
                true
            }
            Ok(None) => {
                self.loaded = true;
                debug!(room_id = %self.room_id, "no snapshot found; starting fresh room");
                false
            }
            Err(ServiceError::Unavailable(err @ StorageError::Corrupted { .. })) => {
                self.loaded = true;
                warn!(room_id = %self.room_id, error = %err, "unreadable room snapshot will be replaced");
                false
            }
            Err(ServiceError::Degraded) => {
                warn!(room_id = %self.room_id, "storage unavailable; room snapshot not loaded yet");
                false
            }
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "failed to load room snapshot; will retry");
                false
            }
        }
    }

    /// Replace the live room by `stored`, keeping players who joined meanwhile.
    fn adopt(&mut self, mut stored: RoomState, updated_at: SystemTime) {
        for (player_id, player) in self.room.players.drain(..) {
            match stored.players.get_mut(&player_id) {
                Some(known) => known.display_name = player.display_name,
                None => {
                    stored.players.insert(player_id, player);
                }
            }
        }
        self.room = stored;
        self.updated_at = Some(updated_at);
        self.resume_game();
    }

    fn resume_game(&mut self) {
        if self.room.phase() != RoomPhase::Playing {
            return;
        }
        let config = self.state.config();
        if let Some(owner_id) = self
            .room
            .current_track
            .as_ref()
            .filter(|_| !self.room.round_resolved)
            .map(|track| track.owner_id.clone())
        {
            // Every vote may have landed right before the restart.
            let remaining = if self.room.votes.len() >= self.room.eligible_voters(&owner_id).len() {
                Duration::ZERO
            } else {
                config.round_duration()
            };
            info!(room_id = %self.room_id, round = self.room.current_round_index, "re-arming interrupted round");
            self.scheduler
                .arm_round(remaining, |generation| RoomCommand::RoundExpired { generation });
        } else {
            let delay = if self.room.current_round_index == 0 {
                config.presentation_delay()
            } else {
                config.post_round_delay()
            };
            info!(room_id = %self.room_id, round = self.room.current_round_index, "resuming game after restart");
            self.scheduler
                .schedule_after(delay, |generation| RoomCommand::Advance { generation });
        }
    }

    async fn on_join(
        &mut self,
        player_id: PlayerId,
        display_name: String,
        settings: RoomSettings,
        connection: PlayerConnection,
    ) {
        self.cancel_idle();

        if let Some(previous) = self.registry.register(player_id.clone(), connection) {
            debug!(room_id = %self.room_id, player_id = %player_id, "replacing previous connection");
            let _ = previous.tx.send(Message::Close(None));
        }

        let is_new = match self.room.players.get_mut(&player_id) {
            Some(player) => {
                player.display_name = display_name;
                false
            }
            None => {
                self.room.players.insert(
                    player_id.clone(),
                    Player::new(player_id.clone(), display_name),
                );
                true
            }
        };

        if self.room.phase() == RoomPhase::Waiting {
            self.room
                .apply_settings(settings.mode, settings.tracks_per_player);
        }

        info!(room_id = %self.room_id, player_id = %player_id, is_new, phase = ?self.room.phase(), "player joined");
        self.persist().await;

        for frame in room_events::join_snapshot(&self.room, &self.registry) {
            self.registry.send_to(&player_id, &frame);
        }
        self.broadcast_roster();
        if is_new && self.room.phase() == RoomPhase::Selecting {
            self.registry
                .broadcast(&room_events::selection_progress(&self.room));
        }
    }

    fn on_leave(&mut self, connection_id: ConnectionId) {
        if let Some(player_id) = self.registry.unregister(connection_id) {
            info!(room_id = %self.room_id, player_id = %player_id, "player disconnected");
            self.broadcast_roster();
        }
        if self.registry.is_empty() && self.idle_timer.is_none() {
            self.arm_idle();
        }
    }

    async fn on_client_message(&mut self, player_id: PlayerId, message: ClientMessage) {
        if !self.room.players.contains_key(&player_id) {
            debug!(room_id = %self.room_id, player_id = %player_id, "ignoring message from unknown player");
            return;
        }

        match message {
            ClientMessage::StartSelection => self.start_selection(&player_id).await,
            ClientMessage::TrackAdded { sync } => {
                let change = if sync { CountChange::Sync } else { CountChange::Added };
                self.update_track_count(&player_id, change).await
            }
            ClientMessage::TrackRemoved => {
                self.update_track_count(&player_id, CountChange::Removed)
                    .await
            }
            ClientMessage::TracksSubmitted { tracks } => {
                self.submit_tracks(&player_id, tracks).await
            }
            ClientMessage::Vote {
                voted_id,
                latency_ms,
            } => self.vote(player_id, voted_id, latency_ms).await,
            ClientMessage::Unknown => {
                debug!(room_id = %self.room_id, player_id = %player_id, "ignoring unknown message type")
            }
        }
    }

    async fn start_selection(&mut self, player_id: &str) {
        if let Err(err) = self.room.machine.apply(RoomEvent::StartSelection) {
            debug!(room_id = %self.room_id, player_id, error = %err, "ignoring startSelection");
            return;
        }
        self.room.begin_selection();
        self.scheduler.reset();
        info!(room_id = %self.room_id, player_id, players = self.room.players.len(), "selection started");

        self.persist().await;
        self.registry
            .broadcast(&room_events::selection_started(&self.room));
        self.registry
            .broadcast(&room_events::selection_progress(&self.room));
        self.broadcast_roster();
    }

    async fn update_track_count(&mut self, player_id: &str, change: CountChange) {
        if self.room.phase() != RoomPhase::Selecting {
            debug!(room_id = %self.room_id, player_id, "ignoring track count outside selection");
            return;
        }
        let limit = self.room.tracks_per_player;
        let Some(player) = self.room.players.get_mut(player_id) else {
            return;
        };

        let before = player.submitted_track_count;
        if !player.has_confirmed_selection {
            player.submitted_track_count = match change {
                CountChange::Added => before.saturating_add(1).min(limit),
                CountChange::Removed => before.saturating_sub(1),
                CountChange::Sync => before,
            };
        }
        let changed = player.submitted_track_count != before;

        if changed {
            self.persist().await;
        }
        self.registry
            .broadcast(&room_events::selection_progress(&self.room));
    }

    async fn submit_tracks(&mut self, player_id: &str, tracks: Vec<TrackInput>) {
        if self.room.phase() != RoomPhase::Selecting {
            debug!(room_id = %self.room_id, player_id, "ignoring tracksSubmitted outside selection");
            return;
        }
        let limit = self.room.tracks_per_player as usize;
        let Some(player) = self.room.players.get_mut(player_id) else {
            return;
        };
        if player.has_confirmed_selection {
            debug!(room_id = %self.room_id, player_id, "ignoring tracksSubmitted from confirmed player");
            return;
        }

        let mut seen = HashSet::new();
        let drafts: Vec<TrackDraft> = tracks
            .into_iter()
            .filter(|track| seen.insert(track.external_id.clone()))
            .take(limit)
            .map(Into::into)
            .collect();

        player.has_confirmed_selection = true;
        player.submitted_track_count = drafts.len() as u32;
        let owner_name = player.display_name.clone();

        let admitted = self.room.pool.submit(player_id, &owner_name, drafts);
        info!(room_id = %self.room_id, player_id, admitted = admitted.len(), pool = self.room.pool.len(), "selection confirmed");
        persistence::catalog_tracks(&self.state, &self.room_id, admitted);

        self.persist().await;
        self.registry
            .broadcast(&room_events::selection_progress(&self.room));

        if self.room.all_confirmed() {
            self.start_game().await;
        }
    }

    async fn start_game(&mut self) {
        if let Err(err) = self.room.machine.apply(RoomEvent::AllConfirmed) {
            warn!(room_id = %self.room_id, error = %err, "cannot start game");
            return;
        }
        if let Err(err) = self.room.pool.shuffle_once(&mut self.rng) {
            warn!(room_id = %self.room_id, error = %err, "keeping existing play order");
        }
        self.room.current_round_index = 0;
        self.room.current_track = None;
        self.room.round_resolved = true;
        self.room.clear_votes();
        self.scheduler.reset();
        info!(room_id = %self.room_id, rounds = self.room.pool.len(), "game starting");

        self.persist().await;
        self.registry.broadcast(&ServerMessage::GameStarting);
        self.scheduler
            .schedule_after(self.state.config().presentation_delay(), |generation| {
                RoomCommand::Advance { generation }
            });
    }

    async fn on_advance(&mut self, generation: u64) {
        if !self.scheduler.is_current(generation)
            || self.scheduler.is_open()
            || self.room.phase() != RoomPhase::Playing
        {
            debug!(room_id = %self.room_id, generation, "ignoring stale advance");
            return;
        }
        self.advance_round().await;
    }

    async fn advance_round(&mut self) {
        let next = self.room.current_round_index + 1;
        let Some(track) = self.room.pool.get(next - 1).cloned() else {
            self.finish_game().await;
            return;
        };

        self.room.current_round_index = next;
        self.room.current_track = Some(track);
        self.room.clear_votes();
        self.room.round_resolved = false;
        info!(room_id = %self.room_id, round = next, total = self.room.pool.len(), "round started");

        self.persist().await;
        if let Some(frame) = room_events::round_started(&self.room) {
            self.registry.broadcast(&frame);
        }
        self.scheduler
            .arm_round(self.state.config().round_duration(), |generation| {
                RoomCommand::RoundExpired { generation }
            });
    }

    async fn vote(&mut self, voter_id: PlayerId, voted_id: PlayerId, latency_ms: u64) {
        if self.room.phase() != RoomPhase::Playing || !self.scheduler.is_open() {
            debug!(room_id = %self.room_id, voter_id = %voter_id, "ignoring vote outside an open round");
            return;
        }
        let Some(owner_id) = self
            .room
            .current_track
            .as_ref()
            .map(|track| track.owner_id.clone())
        else {
            return;
        };
        if voter_id == owner_id {
            debug!(room_id = %self.room_id, voter_id = %voter_id, "ignoring vote from track owner");
            return;
        }
        if self.room.votes.contains_key(&voter_id) {
            debug!(room_id = %self.room_id, voter_id = %voter_id, "ignoring duplicate vote");
            return;
        }
        if !self.room.players.contains_key(&voted_id) {
            debug!(room_id = %self.room_id, voter_id = %voter_id, voted_id = %voted_id, "ignoring vote for unknown player");
            return;
        }

        self.room.votes.insert(voter_id.clone(), voted_id);
        self.room.vote_latency_ms.insert(voter_id, latency_ms);
        self.persist().await;

        let eligible = self.room.eligible_voters(&owner_id).len();
        if self.room.votes.len() >= eligible && self.scheduler.try_resolve() {
            debug!(room_id = %self.room_id, votes = self.room.votes.len(), "every eligible player voted");
            self.resolve_round().await;
        }
    }

    async fn on_round_expired(&mut self, generation: u64) {
        if self.room.phase() == RoomPhase::Playing && self.scheduler.try_resolve_expired(generation) {
            debug!(room_id = %self.room_id, votes = self.room.votes.len(), "round timer expired");
            self.resolve_round().await;
        } else {
            debug!(room_id = %self.room_id, generation, "ignoring stale round timer");
        }
    }

    async fn resolve_round(&mut self) {
        let Some(track) = self.room.current_track.clone() else {
            return;
        };
        self.room.round_resolved = true;

        let voters = self.room.eligible_voters(&track.owner_id);
        let deltas = scoring::resolve_round(
            self.room.game_mode,
            &track.owner_id,
            &self.room.votes,
            &self.room.vote_latency_ms,
            &voters,
        );
        for (player_id, delta) in &deltas {
            if let Some(player) = self.room.players.get_mut(player_id) {
                player.score = player.score.saturating_add(*delta);
            }
        }
        info!(
            room_id = %self.room_id,
            round = self.room.current_round_index,
            owner_id = %track.owner_id,
            votes = self.room.votes.len(),
            discovered = !deltas.contains_key(&track.owner_id),
            "round resolved"
        );

        self.persist().await;
        let resolved = room_events::round_resolved(&self.room, &self.registry, &track);
        self.registry.broadcast(&resolved);
        self.scheduler
            .schedule_after(self.state.config().post_round_delay(), |generation| {
                RoomCommand::Advance { generation }
            });
    }

    async fn finish_game(&mut self) {
        self.registry.broadcast(&room_events::game_ended(&self.room));
        if let Err(err) = self.room.machine.apply(RoomEvent::GameEnded) {
            warn!(room_id = %self.room_id, error = %err, "unexpected phase at game end");
        }
        self.room.end_game();
        self.scheduler.reset();
        info!(room_id = %self.room_id, "game ended");

        self.persist().await;
        self.broadcast_roster();
        if self.registry.is_empty() {
            self.arm_idle();
        }
    }

    async fn reset(&mut self) {
        if let Err(err) = self.room.machine.apply(RoomEvent::Reset) {
            warn!(room_id = %self.room_id, error = %err, "reset refused");
            return;
        }
        self.scheduler.reset();
        self.room.clear_all();
        self.registry.close_all();
        info!(room_id = %self.room_id, "room reset");

        self.persist().await;
        self.arm_idle();
    }

    async fn on_idle_check(&mut self, generation: u64) -> Flow {
        if generation != self.idle_generation {
            return Flow::Continue;
        }
        self.idle_timer = None;
        if !self.registry.is_empty() || self.room.phase() == RoomPhase::Playing {
            return Flow::Continue;
        }
        if self.updated_at.is_some() || !self.room.players.is_empty() {
            self.persist().await;
        }
        Flow::Hibernate
    }

    /// Leave the room registry and hand commands that raced the shutdown to
    /// the next actor of this room.
    fn hibernate(self, mut rx: UnboundedReceiver<RoomCommand>) {
        let instance = self.instance;
        self.state
            .rooms()
            .remove_if(&self.room_id, |_, handle| handle.instance() == instance);
        rx.close();

        let mut forwarded = Vec::new();
        while let Ok(command) = rx.try_recv() {
            if !command.is_timer() {
                forwarded.push(command);
            }
        }
        info!(room_id = %self.room_id, forwarded = forwarded.len(), "room hibernated");

        let state = self.state.clone();
        let room_id = self.room_id.clone();
        drop(self);
        for command in forwarded {
            room_service::dispatch(&state, &room_id, command);
        }
    }

    fn status(&self) -> RoomStatusResponse {
        room_events::room_status(&self.room_id, &self.room, &self.registry)
            .with_updated_at(self.updated_at)
    }

    fn broadcast_roster(&mut self) {
        let roster = room_events::roster(&self.room, &self.registry);
        self.registry.broadcast(&roster);
    }

    async fn persist(&mut self) {
        if !self.loaded && !self.late_restore().await {
            debug!(room_id = %self.room_id, "holding snapshot write until the stored room is read");
            return;
        }
        match persistence::save_room(&self.state, &self.room_id, &self.room).await {
            Ok(updated_at) => self.updated_at = Some(updated_at),
            Err(ServiceError::Degraded) => {
                debug!(room_id = %self.room_id, "skipping snapshot write (degraded mode)")
            }
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "failed to persist room snapshot")
            }
        }
    }

    fn arm_idle(&mut self) {
        self.cancel_idle();
        self.idle_timer = Some(spawn_delayed(
            self.tx.clone(),
            self.state.config().idle_timeout(),
            RoomCommand::IdleCheck {
                generation: self.idle_generation,
            },
        ));
    }

    fn cancel_idle(&mut self) {
        if let Some(handle) = self.idle_timer.take() {
            handle.abort();
        }
        self.idle_generation += 1;
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(handle) = self.idle_timer.take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CountChange {
    Added,
    Removed,
    Sync,
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use indexmap::IndexMap;
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{PlayerEntity, RoomEntity, RoomPhaseEntity, TrackEntity},
            room_store::{RoomStore, memory::MemoryRoomStore},
        },
        state::AppState,
    };

    const ROOM: &str = "room-1";

    struct TestClient {
        connection_id: ConnectionId,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl TestClient {
        /// Wait for the next frame of type `kind`, skipping the others.
        async fn next_of(&mut self, kind: &str) -> Value {
            loop {
                let message = tokio::time::timeout(Duration::from_secs(120), self.rx.recv())
                    .await
                    .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
                    .unwrap_or_else(|| panic!("connection closed while waiting for {kind}"));
                if let Some(frame) = decode(message) {
                    if frame["type"] == kind {
                        return frame;
                    }
                }
            }
        }

        /// Frames already delivered, without waiting.
        fn drain(&mut self) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                frames.extend(decode(message));
            }
            frames
        }
    }

    fn decode(message: Message) -> Option<Value> {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
            _ => None,
        }
    }

    async fn test_state(config: AppConfig) -> (SharedState, MemoryRoomStore) {
        let state = AppState::new(config);
        let store = MemoryRoomStore::new();
        state.install_room_store(Arc::new(store.clone())).await;
        (state, store)
    }

    fn start_room(state: &SharedState) -> RoomHandle {
        let handle = spawn_with_rng(state.clone(), ROOM.into(), StdRng::seed_from_u64(7));
        state.rooms().insert(ROOM.into(), handle.clone());
        handle
    }

    fn join(handle: &RoomHandle, id: &str, name: &str, settings: RoomSettings) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = PlayerConnection::new(tx);
        let connection_id = connection.id;
        handle
            .send(RoomCommand::Join {
                player_id: id.into(),
                display_name: name.into(),
                settings,
                connection,
            })
            .unwrap();
        TestClient {
            connection_id,
            rx,
        }
    }

    fn send(handle: &RoomHandle, player_id: &str, message: ClientMessage) {
        handle
            .send(RoomCommand::Client {
                player_id: player_id.into(),
                message,
            })
            .unwrap();
    }

    async fn status(handle: &RoomHandle) -> RoomStatusResponse {
        let (reply, rx) = oneshot::channel();
        handle.send(RoomCommand::Status { reply }).unwrap();
        rx.await.unwrap()
    }

    fn track(id: &str) -> TrackInput {
        TrackInput {
            external_id: id.into(),
            title: format!("title {id}"),
            artist: format!("artist {id}"),
            preview_url: format!("https://cdn.example/{id}.mp3"),
            cover_url: format!("https://cdn.example/{id}.jpg"),
        }
    }

    fn submit(handle: &RoomHandle, player_id: &str, ids: &[&str]) {
        send(
            handle,
            player_id,
            ClientMessage::TracksSubmitted {
                tracks: ids.iter().map(|id| track(id)).collect(),
            },
        );
    }

    fn vote(handle: &RoomHandle, voter: &str, voted: &str, latency_ms: u64) {
        send(
            handle,
            voter,
            ClientMessage::Vote {
                voted_id: voted.into(),
                latency_ms,
            },
        );
    }

    fn settings(mode: GameMode, tracks_per_player: u32) -> RoomSettings {
        RoomSettings {
            mode: Some(mode),
            tracks_per_player: Some(tracks_per_player),
        }
    }

    /// Owner of the announced track, looked up by its preview URL.
    fn owner_of(frame: &Value, owners: &[(&str, &str)]) -> String {
        let url = frame["track"]["previewUrl"].as_str().unwrap();
        owners
            .iter()
            .find(|(track_id, _)| url.ends_with(&format!("/{track_id}.mp3")))
            .map(|(_, owner)| owner.to_string())
            .unwrap()
    }

    fn score_of(status: &RoomStatusResponse, player_id: &str) -> u32 {
        status
            .players
            .iter()
            .find(|p| p.id == player_id)
            .map(|p| p.score)
            .unwrap()
    }

    /// Two players, one track each, everyone confirmed: rounds are about to start.
    async fn two_player_game(mode: GameMode) -> (SharedState, MemoryRoomStore, RoomHandle, TestClient, TestClient) {
        let (state, store) = test_state(AppConfig::default()).await;
        let handle = start_room(&state);
        let a = join(&handle, "a", "Ana", settings(mode, 1));
        let b = join(&handle, "b", "Bia", RoomSettings::default());

        send(&handle, "a", ClientMessage::StartSelection);
        submit(&handle, "a", &["t1"]);
        submit(&handle, "b", &["t2"]);
        assert_eq!(status(&handle).await.phase, crate::dto::phase::VisibleRoomPhase::Playing);

        (state, store, handle, a, b)
    }

    #[tokio::test(start_paused = true)]
    async fn both_players_discover_each_other() {
        let (_state, _store, handle, mut a, mut b) = two_player_game(GameMode::Relaxed).await;
        let owners = [("t1", "a"), ("t2", "b")];
        a.next_of("gameStarting").await;

        for round in 1..=2 {
            let started = a.next_of("roundStarted").await;
            assert_eq!(started["number"], round);
            assert_eq!(started["totalRounds"], 2);
            assert!(started["track"].get("ownerId").is_none());

            let owner = owner_of(&started, &owners);
            let voter = if owner == "a" { "b" } else { "a" };
            // The owner's own vote never counts.
            vote(&handle, &owner, voter, 500);
            vote(&handle, voter, &owner, 1_000);

            let resolved = b.next_of("roundResolved").await;
            assert_eq!(resolved["ownerId"], owner.as_str());
            assert_eq!(resolved["votes"], json!({ voter: owner }));
        }

        let ended = a.next_of("gameEnded").await;
        assert_eq!(
            ended["finalScoreboard"],
            json!([{"name": "Ana", "score": 1}, {"name": "Bia", "score": 1}])
        );

        let status = status(&handle).await;
        assert_eq!(status.phase, crate::dto::phase::VisibleRoomPhase::Waiting);
        assert_eq!(score_of(&status, "a"), 1);
        assert_eq!(score_of(&status, "b"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_round_rewards_owner() {
        let (_state, _store, handle, mut a, _b) = two_player_game(GameMode::Relaxed).await;
        let owners = [("t1", "a"), ("t2", "b")];

        let started = a.next_of("roundStarted").await;
        let owner = owner_of(&started, &owners);
        let resolved = a.next_of("roundResolved").await;

        assert_eq!(resolved["ownerId"], owner.as_str());
        assert_eq!(resolved["votes"], json!({}));
        assert_eq!(score_of(&status(&handle).await, &owner), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_intense_round_rewards_owner() {
        let (_state, _store, handle, mut a, _b) = two_player_game(GameMode::Intense).await;
        let owners = [("t1", "a"), ("t2", "b")];

        let started = a.next_of("roundStarted").await;
        let owner = owner_of(&started, &owners);
        a.next_of("roundResolved").await;

        assert_eq!(score_of(&status(&handle).await, &owner), 40);
    }

    fn assert_elapsed(start: tokio::time::Instant, secs: u64) {
        let elapsed = start.elapsed();
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "expected ~{secs}s, got {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn configured_timings_drive_the_rounds() {
        let config = AppConfig::default().with_timings(
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(2),
        );
        let (state, _store) = test_state(config).await;
        let handle = start_room(&state);
        let mut a = join(&handle, "a", "Ana", settings(GameMode::Relaxed, 1));
        let _b = join(&handle, "b", "Bia", RoomSettings::default());

        send(&handle, "a", ClientMessage::StartSelection);
        submit(&handle, "a", &["t1"]);
        submit(&handle, "b", &["t2"]);
        a.next_of("gameStarting").await;
        let start = tokio::time::Instant::now();

        a.next_of("roundStarted").await;
        assert_elapsed(start, 1);
        a.next_of("roundResolved").await;
        assert_elapsed(start, 11);
        a.next_of("roundStarted").await;
        assert_elapsed(start, 13);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_vote_changes_nothing() {
        let (state, _store) = test_state(AppConfig::default()).await;
        let handle = start_room(&state);
        let mut a = join(&handle, "a", "Ana", settings(GameMode::Relaxed, 1));
        let _b = join(&handle, "b", "Bia", RoomSettings::default());
        let _c = join(&handle, "c", "Caio", RoomSettings::default());
        let owners = [("t1", "a"), ("t2", "b"), ("t3", "c")];

        send(&handle, "a", ClientMessage::StartSelection);
        submit(&handle, "a", &["t1"]);
        submit(&handle, "b", &["t2"]);
        submit(&handle, "c", &["t3"]);

        let started = a.next_of("roundStarted").await;
        let owner = owner_of(&started, &owners);
        let voters: Vec<&str> = ["a", "b", "c"].into_iter().filter(|id| *id != owner).collect();

        vote(&handle, voters[0], &owner, 1_000);
        vote(&handle, voters[0], voters[1], 2_000);
        status(&handle).await;
        assert!(a.drain().iter().all(|frame| frame["type"] != "roundResolved"));

        vote(&handle, voters[1], voters[0], 3_000);
        let resolved = a.next_of("roundResolved").await;
        assert_eq!(resolved["votes"][voters[0]], owner.as_str());

        let status = status(&handle).await;
        assert_eq!(score_of(&status, voters[0]), 1);
        assert_eq!(score_of(&status, voters[1]), 0);
        assert_eq!(score_of(&status, &owner), 0);

        // The next frame is the following round, not a second resolution.
        let next = a.next_of("roundStarted").await;
        assert_eq!(next["number"], 2);
        assert!(a.drain().iter().all(|frame| frame["type"] != "roundResolved"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_submission_is_idempotent() {
        let (state, store) = test_state(AppConfig::default()).await;
        let handle = start_room(&state);
        let mut a = join(&handle, "a", "Ana", settings(GameMode::Relaxed, 2));
        let _b = join(&handle, "b", "Bia", RoomSettings::default());

        send(&handle, "a", ClientMessage::StartSelection);
        submit(&handle, "a", &["t1", "t1", "t2", "t3"]);
        submit(&handle, "a", &["t1", "t2"]);
        status(&handle).await;

        let snapshot = store.room(ROOM).unwrap();
        assert_eq!(snapshot.phase, RoomPhaseEntity::Selecting);
        let ids: Vec<_> = snapshot.track_pool.iter().map(|t| t.external_id.as_str()).collect();
        assert_eq!(ids, ["t1", "t2"]);
        assert_eq!(snapshot.players[0].submitted_track_count, 2);
        assert!(snapshot.players[0].has_confirmed_selection);

        let progress = a
            .drain()
            .into_iter()
            .filter(|frame| frame["type"] == "selectionProgress")
            .last()
            .unwrap();
        assert_eq!(progress["totalSubmitted"], 2);
        assert_eq!(progress["confirmedIds"], json!(["a"]));
        assert_eq!(progress["totalPlayers"], 2);

        // Catalog writes are fire-and-forget.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.track("t1").is_some());
        assert!(store.track("t3").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn track_counts_are_clamped_and_sync_only_rebroadcasts() {
        let (state, _store) = test_state(AppConfig::default()).await;
        let handle = start_room(&state);
        let mut a = join(&handle, "a", "Ana", settings(GameMode::Relaxed, 2));

        send(&handle, "a", ClientMessage::StartSelection);
        for _ in 0..3 {
            send(&handle, "a", ClientMessage::TrackAdded { sync: false });
        }
        send(&handle, "a", ClientMessage::TrackAdded { sync: true });
        status(&handle).await;

        let counts: Vec<_> = a
            .drain()
            .into_iter()
            .filter(|frame| frame["type"] == "selectionProgress")
            .map(|frame| frame["perPlayer"][0]["count"].as_u64().unwrap())
            .collect();
        assert_eq!(counts, [0, 1, 2, 2, 2]);

        send(&handle, "a", ClientMessage::TrackRemoved);
        send(&handle, "a", ClientMessage::TrackRemoved);
        send(&handle, "a", ClientMessage::TrackRemoved);
        status(&handle).await;
        let last = a.drain().pop().unwrap();
        assert_eq!(last["perPlayer"][0]["count"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_preserves_score_and_confirmation() {
        let (state, _store) = test_state(AppConfig::default()).await;
        let handle = start_room(&state);
        let a = join(&handle, "a", "Ana", settings(GameMode::Relaxed, 1));
        let mut b = join(&handle, "b", "Bia", RoomSettings::default());

        send(&handle, "a", ClientMessage::StartSelection);
        submit(&handle, "a", &["t1"]);
        handle
            .send(RoomCommand::Leave {
                connection_id: a.connection_id,
            })
            .unwrap();
        status(&handle).await;

        let roster = b
            .drain()
            .into_iter()
            .filter(|frame| frame["type"] == "roster")
            .last()
            .unwrap();
        assert_eq!(roster["players"][0]["online"], false);

        let mut a = join(&handle, "a", "Ana", RoomSettings::default());
        let roster = a.next_of("roster").await;
        assert_eq!(roster["players"][0]["online"], true);
        let started = a.next_of("selectionStarted").await;
        assert_eq!(started["tracksPerPlayer"], 1);
        let progress = a.next_of("selectionProgress").await;
        assert_eq!(progress["perPlayer"][0]["confirmed"], true);
        assert_eq!(progress["perPlayer"][0]["count"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_connection_replaces_first() {
        let (state, _store) = test_state(AppConfig::default()).await;
        let handle = start_room(&state);
        let mut first = join(&handle, "a", "Ana", RoomSettings::default());
        let _second = join(&handle, "a", "Ana", RoomSettings::default());
        status(&handle).await;

        let closed = std::iter::from_fn(|| first.rx.try_recv().ok())
            .any(|message| matches!(message, Message::Close(_)));
        assert!(closed);

        // The stale socket closing must not take the new one offline.
        handle
            .send(RoomCommand::Leave {
                connection_id: first.connection_id,
            })
            .unwrap();
        let status = status(&handle).await;
        assert!(status.players[0].online);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_only_apply_in_lobby() {
        let (state, _store) = test_state(AppConfig::default()).await;
        let handle = start_room(&state);
        let _a = join(&handle, "a", "Ana", settings(GameMode::Intense, 3));
        assert_eq!(status(&handle).await.tracks_per_player, 3);

        send(&handle, "a", ClientMessage::StartSelection);
        let _b = join(&handle, "b", "Bia", settings(GameMode::Relaxed, 1));
        let status = status(&handle).await;
        assert_eq!(status.tracks_per_player, 3);
        assert_eq!(status.game_mode, GameMode::Intense);
    }

    #[tokio::test(start_paused = true)]
    async fn storage_failures_do_not_block_the_game() {
        let (_state, store, handle, mut a, _b) = two_player_game(GameMode::Relaxed).await;
        store.set_offline(true);

        let started = a.next_of("roundStarted").await;
        assert_eq!(started["number"], 1);
        a.next_of("roundResolved").await;
        assert_eq!(status(&handle).await.current_round, 1);
    }

    fn seeded_playing_room() -> RoomEntity {
        let player = |id: &str, name: &str, score| PlayerEntity {
            id: id.into(),
            display_name: name.into(),
            score,
            has_confirmed_selection: true,
            submitted_track_count: 1,
        };
        let track = |id: &str, owner: &str, name: &str| TrackEntity {
            external_id: id.into(),
            title: format!("title {id}"),
            artist: format!("artist {id}"),
            preview_url: format!("https://cdn.example/{id}.mp3"),
            cover_url: format!("https://cdn.example/{id}.jpg"),
            owner_id: owner.into(),
            owner_name: name.into(),
        };
        RoomEntity {
            id: ROOM.into(),
            phase: RoomPhaseEntity::Playing,
            version: 2,
            players: vec![player("a", "Ana", 5), player("b", "Bia", 2)],
            track_pool: vec![track("t2", "b", "Bia"), track("t1", "a", "Ana")],
            pool_shuffled: true,
            current_round_index: 1,
            current_track: Some(track("t2", "b", "Bia")),
            votes: IndexMap::new(),
            vote_latency_ms: IndexMap::new(),
            round_resolved: false,
            game_mode: GameMode::Relaxed,
            tracks_per_player: 1,
            updated_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_resumes_interrupted_round() {
        let (state, store) = test_state(AppConfig::default()).await;
        store.save_room(seeded_playing_room()).await.unwrap();
        let handle = start_room(&state);

        let mut a = join(&handle, "a", "Ana", RoomSettings::default());
        let roster = a.next_of("roster").await;
        assert_eq!(roster["players"][0]["score"], 5);
        let started = a.next_of("roundStarted").await;
        assert_eq!(started["number"], 1);

        // Restored round times out on its own: owner b was not discovered.
        let resolved = a.next_of("roundResolved").await;
        assert_eq!(resolved["ownerId"], "b");
        let next = a.next_of("roundStarted").await;
        assert_eq!(next["number"], 2);
        assert_eq!(score_of(&status(&handle).await, "b"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn late_storage_keeps_the_saved_game() {
        let state = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        store.save_room(seeded_playing_room()).await.unwrap();
        let handle = start_room(&state);

        let mut a = join(&handle, "a", "Ana", RoomSettings::default());
        let before = status(&handle).await;
        assert_eq!(before.phase, crate::dto::phase::VisibleRoomPhase::Waiting);
        assert_eq!(store.room(ROOM).unwrap().players[0].score, 5);

        state.install_room_store(Arc::new(store.clone())).await;
        let _b = join(&handle, "b", "Bia", RoomSettings::default());

        let started = a.next_of("roundStarted").await;
        assert_eq!(started["number"], 1);
        let after = status(&handle).await;
        assert_eq!(after.phase, crate::dto::phase::VisibleRoomPhase::Playing);
        assert_eq!(after.total_rounds, 2);
        assert_eq!(score_of(&after, "a"), 5);
        assert_eq!(score_of(&after, "b"), 2);

        let snapshot = store.room(ROOM).unwrap();
        assert_eq!(snapshot.phase, RoomPhaseEntity::Playing);
        assert_eq!(snapshot.track_pool.len(), 2);
        assert_eq!(snapshot.players[0].score, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn restored_round_with_every_vote_resolves_at_once() {
        let (state, store) = test_state(AppConfig::default()).await;
        let mut seeded = seeded_playing_room();
        seeded.votes.insert("a".into(), "b".into());
        seeded.vote_latency_ms.insert("a".into(), 1_000);
        store.save_room(seeded).await.unwrap();

        let start = tokio::time::Instant::now();
        let handle = start_room(&state);
        let mut a = join(&handle, "a", "Ana", RoomSettings::default());

        let resolved = a.next_of("roundResolved").await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(resolved["ownerId"], "b");
        assert_eq!(resolved["votes"], json!({"a": "b"}));
        assert_eq!(score_of(&status(&handle).await, "a"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_room_hibernates_and_reloads() {
        let config = AppConfig::default().with_idle_timeout(Duration::from_secs(60));
        let (state, store) = test_state(config).await;
        let handle = start_room(&state);

        let a = join(&handle, "a", "Ana", RoomSettings::default());
        status(&handle).await;
        handle
            .send(RoomCommand::Leave {
                connection_id: a.connection_id,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(state.rooms().get(ROOM).is_none());
        assert!(handle.is_closed());
        assert_eq!(store.room(ROOM).unwrap().players.len(), 1);

        let status = room_service::room_status(&state, ROOM).await.unwrap();
        assert_eq!(status.players[0].id, "a");
        assert!(!status.players[0].online);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_room_does_not_hibernate() {
        let config = AppConfig::default().with_idle_timeout(Duration::from_secs(60));
        let (state, _store) = test_state(config).await;
        let handle = start_room(&state);
        let _a = join(&handle, "a", "Ana", RoomSettings::default());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(!handle.is_closed());
        assert!(state.rooms().get(ROOM).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_room_and_closes_connections() {
        let (state, store, handle, mut a, _b) = two_player_game(GameMode::Relaxed).await;

        let (reply, rx) = oneshot::channel();
        handle.send(RoomCommand::Reset { reply }).unwrap();
        let status = rx.await.unwrap();

        assert_eq!(status.phase, crate::dto::phase::VisibleRoomPhase::Waiting);
        assert!(status.players.is_empty());
        assert_eq!(status.total_rounds, 0);
        let closed = std::iter::from_fn(|| a.rx.try_recv().ok())
            .any(|message| matches!(message, Message::Close(_)));
        assert!(closed);

        let snapshot = store.room(ROOM).unwrap();
        assert!(snapshot.players.is_empty());
        assert_eq!(snapshot.phase, RoomPhaseEntity::Waiting);

        // Pending presentation timer must not start a round after the reset.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(state.rooms().get(ROOM).map(|h| h.is_closed()), Some(false));
    }
}
