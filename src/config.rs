//! Engine-level configuration loading, including stake and clock defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::chess::ClockConfig;

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TABLE_DUEL_BACK_CONFIG_PATH";
/// Hard ceiling on the stake of a single game.
const DEFAULT_STAKE_CEILING: u32 = 5000;
/// Chess move history keeps at most this many entries.
const DEFAULT_MOVE_HISTORY_CAP: usize = 300;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared by the session service.
pub struct EngineConfig {
    /// Maximum stake a game may be created with.
    pub stake_ceiling: u32,
    /// Clock configuration used when a chess game requests none.
    pub default_clock: ClockConfig,
    /// Cap on retained chess move-history entries.
    pub move_history_cap: usize,
}

impl EngineConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        stake_ceiling = config.stake_ceiling,
                        "loaded engine configuration"
                    );
                    config
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
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stake_ceiling: DEFAULT_STAKE_CEILING,
            default_clock: ClockConfig::default(),
            move_history_cap: DEFAULT_MOVE_HISTORY_CAP,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file.
struct RawConfig {
    stake_ceiling: Option<u32>,
    clock: Option<RawClock>,
    move_history_cap: Option<usize>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of the default chess clock.
struct RawClock {
    base_seconds: u64,
    increment_seconds: u64,
}

impl From<RawConfig> for EngineConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            stake_ceiling: value.stake_ceiling.unwrap_or(defaults.stake_ceiling),
            default_clock: value
                .clock
                .map(|clock| ClockConfig::clamped(clock.base_seconds, clock.increment_seconds))
                .unwrap_or(defaults.default_clock),
            move_history_cap: value.move_history_cap.unwrap_or(defaults.move_history_cap),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_fills_gaps_with_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"stake_ceiling": 800}"#).unwrap();
        let config: EngineConfig = raw.into();
        assert_eq!(config.stake_ceiling, 800);
        assert_eq!(config.default_clock, ClockConfig::default());
        assert_eq!(config.move_history_cap, DEFAULT_MOVE_HISTORY_CAP);
    }

    #[test]
    fn requested_clock_is_clamped() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"clock": {"base_seconds": 10, "increment_seconds": 99}}"#)
                .unwrap();
        let config: EngineConfig = raw.into();
        assert_eq!(config.default_clock.base_secs, 60);
        assert_eq!(config.default_clock.increment_secs, 30);
    }
}
