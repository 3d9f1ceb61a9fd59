//! Point awards for a resolved round.

use indexmap::IndexMap;

use crate::state::room::{GameMode, PlayerId};

/// Points an owner earns in relaxed mode when nobody found them out.
const RELAXED_EVASION_POINTS: u32 = 3;
/// Points an owner earns in intense mode when nobody found them out.
const INTENSE_EVASION_POINTS: u32 = 40;
/// Numerator of the intense discovery formula, in points-seconds.
const INTENSE_DISCOVERY_BUDGET: f64 = 30.0;

/// Compute per-player point deltas for a round.
///
/// Only votes cast by a player listed in `voter_ids` count. Every correct
/// voter is rewarded; when nobody targeted `owner_id` the owner is rewarded
/// instead. Players without an award are absent from the result.
pub fn resolve_round(
    mode: GameMode,
    owner_id: &str,
    votes: &IndexMap<PlayerId, PlayerId>,
    vote_latency_ms: &IndexMap<PlayerId, u64>,
    voter_ids: &[PlayerId],
) -> IndexMap<PlayerId, u32> {
    let mut deltas = IndexMap::new();

    for (voter_id, voted_id) in votes {
        if voted_id != owner_id || !voter_ids.contains(voter_id) {
            continue;
        }
        let latency = vote_latency_ms.get(voter_id).copied().unwrap_or_default();
        deltas.insert(voter_id.clone(), discovery_points(mode, latency));
    }

    if deltas.is_empty() {
        deltas.insert(owner_id.to_string(), evasion_points(mode));
    }

    deltas
}

/// Points for a correct guess cast after `latency_ms`.
pub fn discovery_points(mode: GameMode, latency_ms: u64) -> u32 {
    match mode {
        GameMode::Relaxed => 1,
        GameMode::Intense => {
            let seconds = (latency_ms as f64 / 1000.0).max(1.0);
            (INTENSE_DISCOVERY_BUDGET / seconds).round() as u32
        }
    }
}

/// Points for an owner nobody identified.
pub fn evasion_points(mode: GameMode) -> u32 {
    match mode {
        GameMode::Relaxed => RELAXED_EVASION_POINTS,
        GameMode::Intense => INTENSE_EVASION_POINTS,
    }
}
