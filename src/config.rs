//! Application-level configuration loading, including battle timing defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::battle::WinCondition;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PK_BATTLE_BACK_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Seconds counted down before a battle goes active.
    pub countdown_secs: u64,
    /// Total battle budget applied when a create request omits one.
    pub default_duration_secs: u64,
    /// Number of rounds applied when a create request omits one.
    pub default_total_rounds: u32,
    /// Round length applied when a create request omits one.
    pub default_round_duration_minutes: u64,
    /// Accumulated shoots required to convert into one goal.
    pub goal_threshold: u32,
    /// Pause between two rounds before play resumes.
    pub round_break_secs: u64,
    /// Win condition applied when a create request omits one. `None` derives
    /// the policy from the round count (goals for multi-round battles, raw
    /// score otherwise).
    pub default_win_condition: Option<WinCondition>,
    /// Capacity of each per-channel broadcast buffer.
    pub channel_capacity: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded battle configuration from config file");
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            default_duration_secs: 300,
            default_total_rounds: 1,
            default_round_duration_minutes: 5,
            goal_threshold: 5,
            round_break_secs: 10,
            default_win_condition: None,
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
///
/// Every field is optional; missing entries keep their built-in default.
struct RawConfig {
    countdown_secs: Option<u64>,
    default_duration_secs: Option<u64>,
    default_total_rounds: Option<u32>,
    default_round_duration_minutes: Option<u64>,
    goal_threshold: Option<u32>,
    round_break_secs: Option<u64>,
    default_win_condition: Option<WinCondition>,
    channel_capacity: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            countdown_secs: raw.countdown_secs.unwrap_or(defaults.countdown_secs),
            default_duration_secs: raw
                .default_duration_secs
                .unwrap_or(defaults.default_duration_secs),
            default_total_rounds: raw
                .default_total_rounds
                .unwrap_or(defaults.default_total_rounds),
            default_round_duration_minutes: raw
                .default_round_duration_minutes
                .unwrap_or(defaults.default_round_duration_minutes),
            goal_threshold: raw.goal_threshold.unwrap_or(defaults.goal_threshold),
            round_break_secs: raw.round_break_secs.unwrap_or(defaults.round_break_secs),
            default_win_condition: raw.default_win_condition.or(defaults.default_win_condition),
            channel_capacity: raw.channel_capacity.unwrap_or(defaults.channel_capacity),
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
    fn partial_raw_config_keeps_defaults_for_missing_fields() {
        let raw: RawConfig = serde_json::from_str(r#"{"goal_threshold": 10}"#).unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.goal_threshold, 10);
        assert_eq!(config.countdown_secs, AppConfig::default().countdown_secs);
        assert_eq!(
            config.round_break_secs,
            AppConfig::default().round_break_secs
        );
    }

    #[test]
    fn win_condition_parses_from_config() {
        let raw: RawConfig = serde_json::from_str(r#"{"default_win_condition": "score"}"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.default_win_condition, Some(WinCondition::Score));
    }
}
