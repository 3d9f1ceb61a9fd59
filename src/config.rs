//! Application-level configuration loading: gameplay timings and room defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::state::room::GameMode;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TAIACU_BACK_CONFIG_PATH";

const DEFAULT_ROUND_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_PRESENTATION_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_POST_ROUND_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TRACKS_PER_PLAYER: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    round_duration: Duration,
    presentation_delay: Duration,
    post_round_delay: Duration,
    idle_timeout: Duration,
    default_tracks_per_player: u32,
    default_game_mode: GameMode,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        round_ms = app_config.round_duration.as_millis() as u64,
                        tracks_per_player = app_config.default_tracks_per_player,
                        "loaded gameplay settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Time players get to vote on a round.
    pub fn round_duration(&self) -> Duration {
        self.round_duration
    }

    /// Pause between `gameStarting` and the first round.
    pub fn presentation_delay(&self) -> Duration {
        self.presentation_delay
    }

    /// Pause between a round resolution and the next round.
    pub fn post_round_delay(&self) -> Duration {
        self.post_round_delay
    }

    /// How long an empty room lingers before hibernating.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Tracks per player for rooms created without an explicit setting.
    pub fn default_tracks_per_player(&self) -> u32 {
        self.default_tracks_per_player
    }

    /// Scoring formula for rooms created without an explicit setting.
    pub fn default_game_mode(&self) -> GameMode {
        self.default_game_mode
    }

    /// Override the gameplay timings, mostly useful to shorten them in tests.
    pub fn with_timings(
        mut self,
        round_duration: Duration,
        presentation_delay: Duration,
        post_round_delay: Duration,
    ) -> Self {
        self.round_duration = round_duration;
        self.presentation_delay = presentation_delay;
        self.post_round_delay = post_round_delay;
        self
    }

    /// Override the idle hibernation timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_duration: DEFAULT_ROUND_DURATION,
            presentation_delay: DEFAULT_PRESENTATION_DELAY,
            post_round_delay: DEFAULT_POST_ROUND_DELAY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            default_tracks_per_player: DEFAULT_TRACKS_PER_PLAYER,
            default_game_mode: GameMode::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
/// Every key is optional and falls back to its built-in default.
struct RawConfig {
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "round_duration_ms")]
    round_duration: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "presentation_delay_ms")]
    presentation_delay: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "post_round_delay_ms")]
    post_round_delay: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "idle_timeout_ms")]
    idle_timeout: Option<Duration>,
    #[serde(default)]
    default_tracks_per_player: Option<u32>,
    #[serde(default)]
    default_game_mode: Option<GameMode>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            round_duration: value.round_duration.unwrap_or(defaults.round_duration),
            presentation_delay: value
                .presentation_delay
                .unwrap_or(defaults.presentation_delay),
            post_round_delay: value.post_round_delay.unwrap_or(defaults.post_round_delay),
            idle_timeout: value.idle_timeout.unwrap_or(defaults.idle_timeout),
            default_tracks_per_player: value
                .default_tracks_per_player
                .unwrap_or(defaults.default_tracks_per_player)
                .max(1),
            default_game_mode: value
                .default_game_mode
                .unwrap_or(defaults.default_game_mode),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
