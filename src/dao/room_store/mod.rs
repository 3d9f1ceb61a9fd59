#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use crate::dao::models::{RoomEntity, TrackEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the durable key/value store holding room snapshots and
/// the catalog of tracks ever submitted.
pub trait RoomStore: Send + Sync {
    fn load_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn save_track(&self, track: TrackEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
