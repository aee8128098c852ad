// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving client settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hfp::constants::timing;
use crate::hfp::AudioPolicy;

const APP_DIR: &str = "hfp-client";

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub calls: CallsConfig,
    pub audio: AudioConfig,
    pub looper: LooperConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long the Connecting state waits for the SLC.
    pub connecting_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connecting_timeout_ms: timing::CONNECTING_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsConfig {
    /// Re-query the call list while calls exist.
    pub clcc_poll_during_call: bool,

    pub clcc_poll_interval_ms: u64,

    /// Drop a dialled call the AG never lists after this long.
    pub outgoing_timeout_ms: u64,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            clcc_poll_during_call: true,
            clcc_poll_interval_ms: timing::CLCC_POLL_INTERVAL_MS,
            outgoing_timeout_ms: timing::OUTGOING_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub initial_audio_route_allowed: bool,

    /// Push `default_policy` on Connecting -> Connected and AudioOn -> Connected.
    pub force_default_audio_policy: bool,

    pub default_policy: AudioPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            initial_audio_route_allowed: true,
            force_default_audio_policy: false,
            default_policy: AudioPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    pub max_requeue: u32,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            max_requeue: timing::MAX_REQUEUE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` directive, extended by `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hfp_client=info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the user config directory, writing the
    /// defaults there on first run.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn connecting_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.connecting_timeout_ms)
    }

    pub fn clcc_poll_interval(&self) -> Duration {
        Duration::from_millis(self.calls.clcc_poll_interval_ms)
    }

    pub fn outgoing_timeout(&self) -> Duration {
        Duration::from_millis(self.calls.outgoing_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfp::PolicyValue;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connecting_timeout(), Duration::from_secs(10));
        assert!(config.calls.clcc_poll_during_call);
        assert!(config.audio.initial_audio_route_allowed);
        assert!(!config.audio.force_default_audio_policy);
        assert_eq!(config.audio.default_policy, AudioPolicy::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [connection]
            connecting_timeout_ms = 500

            [audio]
            force_default_audio_policy = true

            [audio.default_policy]
            call_establish = "allowed"
            in_band_ringtone = "not_allowed"
            "#,
        )
        .unwrap();

        assert_eq!(config.connecting_timeout(), Duration::from_millis(500));
        assert!(config.audio.force_default_audio_policy);
        assert!(config.audio.initial_audio_route_allowed);
        assert_eq!(config.audio.default_policy.call_establish, PolicyValue::Allowed);
        assert_eq!(
            config.audio.default_policy.active_device_after_connection,
            PolicyValue::Unspecified
        );
        assert_eq!(config.audio.default_policy.in_band_ringtone, PolicyValue::NotAllowed);
        assert_eq!(config.looper.max_requeue, timing::MAX_REQUEUE);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.calls.clcc_poll_during_call = false;
        config.logging.filter = "hfp_client=debug".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_reports_bad_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[connection]\nconnecting_timeout_ms = \"soon\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
