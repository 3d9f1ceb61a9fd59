use thiserror::Error;

/// Top-level phases a room cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Lobby: players gather, nothing is being played.
    Waiting,
    /// Players are picking the tracks the others will have to attribute.
    Selecting,
    /// Rounds are being played and voted on.
    Playing,
}

/// Events that can be applied to the room state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    /// A player opened track selection from the lobby.
    StartSelection,
    /// Every player in the roster confirmed their selection.
    AllConfirmed,
    /// The last round resolved and the final scoreboard was shown.
    GameEnded,
    /// Administrative teardown of the whole room.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: RoomPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoomEvent,
}

/// Linear Waiting -> Selecting -> Playing -> Waiting cycle with a version counter
/// bumped on every applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStateMachine {
    phase: RoomPhase,
    version: usize,
}

impl Default for RoomStateMachine {
    fn default() -> Self {
        Self {
            phase: RoomPhase::Waiting,
            version: 0,
        }
    }
}

impl RoomStateMachine {
    /// Create a new state machine initialised in the waiting state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state machine from persisted values.
    pub fn restore(phase: RoomPhase, version: usize) -> Self {
        Self { phase, version }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Number of transitions applied since the room was created.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Apply `event`, returning the new phase or leaving the machine untouched on error.
    pub fn apply(&mut self, event: RoomEvent) -> Result<RoomPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: RoomEvent) -> Result<RoomPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (RoomPhase::Waiting, RoomEvent::StartSelection) => RoomPhase::Selecting,
            (RoomPhase::Selecting, RoomEvent::AllConfirmed) => RoomPhase::Playing,
            (RoomPhase::Playing, RoomEvent::GameEnded) => RoomPhase::Waiting,
            (_, RoomEvent::Reset) => RoomPhase::Waiting,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
