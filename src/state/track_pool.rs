use rand::{Rng, seq::SliceRandom};
use thiserror::Error;

use crate::state::room::Track;

/// A track as submitted by a client, before ownership is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDraft {
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
}

/// Error returned when the play order is requested twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("track pool play order is already fixed")]
pub struct AlreadyShuffled;

/// Deduplicated, ownership-tagged tracks for one game.
///
/// Tracks are unique by external id and the first submitter keeps ownership.
/// Once [`TrackPool::shuffle_once`] ran the pool is frozen until cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackPool {
    tracks: Vec<Track>,
    shuffled: bool,
}

impl TrackPool {
    /// Empty, unshuffled pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a pool from persisted tracks.
    pub fn restore(tracks: Vec<Track>, shuffled: bool) -> Self {
        Self { tracks, shuffled }
    }

    /// Merge `drafts` submitted by `owner_id`, returning the tracks actually admitted.
    ///
    /// Drafts whose external id is already pooled are skipped, which makes a
    /// repeated submission a no-op. A frozen pool admits nothing.
    pub fn submit(
        &mut self,
        owner_id: &str,
        owner_name: &str,
        drafts: impl IntoIterator<Item = TrackDraft>,
    ) -> Vec<Track> {
        if self.shuffled {
            return Vec::new();
        }

        let mut admitted = Vec::new();
        for draft in drafts {
            if self.contains(&draft.external_id) {
                continue;
            }
            let track = Track {
                external_id: draft.external_id,
                title: draft.title,
                artist: draft.artist,
                preview_url: draft.preview_url,
                cover_url: draft.cover_url,
                owner_id: owner_id.to_string(),
                owner_name: owner_name.to_string(),
            };
            self.tracks.push(track.clone());
            admitted.push(track);
        }
        admitted
    }

    /// Fix the authoritative play order. Only the first call shuffles.
    pub fn shuffle_once<R>(&mut self, rng: &mut R) -> Result<(), AlreadyShuffled>
    where
        R: Rng + ?Sized,
    {
        if self.shuffled {
            return Err(AlreadyShuffled);
        }
        self.tracks.shuffle(rng);
        self.shuffled = true;
        Ok(())
    }

    /// Whether a track with this external id is pooled.
    pub fn contains(&self, external_id: &str) -> bool {
        self.tracks
            .iter()
            .any(|track| track.external_id == external_id)
    }

    /// Track at `index` in play order.
    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Pooled tracks in play order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Number of pooled tracks (and therefore of rounds).
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// True when no track was admitted.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether the play order has been fixed.
    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    /// Forget every track and unfreeze the pool for the next game.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.shuffled = false;
    }

    /// Consume the pool, yielding the tracks in play order.
    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }
}
