pub mod registry;
pub mod room;
pub mod state_machine;
pub mod track_pool;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};

use crate::{config::AppConfig, dao::room_store::RoomStore, services::room_actor::RoomHandle};

pub type SharedState = Arc<AppState>;
/// Upper bound for a single storage round-trip issued by a room actor.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Central application state: configuration, storage handle and the live room actors.
pub struct AppState {
    config: Arc<AppConfig>,
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    rooms: DashMap<String, RoomHandle>,
    degraded: watch::Sender<bool>,
    storage_timeout: Duration,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config: Arc::new(config),
            room_store: RwLock::new(None),
            rooms: DashMap::new(),
            degraded: degraded_tx,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        })
    }

    /// Gameplay configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn install_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.room_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Live room actors keyed by room id.
    pub fn rooms(&self) -> &DashMap<String, RoomHandle> {
        &self.rooms
    }

    /// Upper bound for a single storage call.
    pub fn storage_timeout(&self) -> Duration {
        self.storage_timeout
    }

    /// Broadcast the degraded flag when the value changes.
    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
