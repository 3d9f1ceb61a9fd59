use serde::{Deserialize, Serialize};

use crate::dao::models::{RoomEntity, TrackEntity};

pub const ROOM_PREFIX: &str = "room::";
pub const TRACK_PREFIX: &str = "track::";

pub fn room_doc_id(room_id: &str) -> String {
    format!("{ROOM_PREFIX}{room_id}")
}

pub fn track_doc_id(external_id: &str) -> String {
    format!("{TRACK_PREFIX}{external_id}")
}

/// Room snapshot as stored in CouchDB. The entity already carries its own
/// `id`, the document id only adds the key prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRoomDocument {
    #[serde(rename = "_id")]
    pub doc_id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub room: RoomEntity,
}

impl From<(RoomEntity, Option<String>)> for CouchRoomDocument {
    fn from((room, rev): (RoomEntity, Option<String>)) -> Self {
        Self {
            doc_id: room_doc_id(&room.id),
            rev,
            room,
        }
    }
}

/// Catalog entry for a track that was submitted at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchTrackDocument {
    #[serde(rename = "_id")]
    pub doc_id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub track: TrackEntity,
}

impl From<(TrackEntity, Option<String>)> for CouchTrackDocument {
    fn from((track, rev): (TrackEntity, Option<String>)) -> Self {
        Self {
            doc_id: track_doc_id(&track.external_id),
            rev,
            track,
        }
    }
}

/// Minimal projection used to fetch the current revision before a write.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_rev")]
    pub rev: String,
}
