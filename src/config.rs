// src/config.rs - Application settings, loadable from a JSON file
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actuator::AdapterConfig;
use crate::converter::ConverterConfig;
use crate::live::LiveConfig;
use crate::mapping::Workspace;
use crate::mediapipe_bridge::DetectorCommand;
use crate::playback::PlaybackConfig;
use crate::tracking::TrackerConfig;

/// Playback and arm settings. Times are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub speed: f64,
    pub loop_playback: bool,
    pub base_unit_secs: f64,
    pub pause_poll_secs: f64,
    pub home_timeout_secs: f64,
    pub home_settle_secs: f64,
    pub move_timeout_secs: f64,
    /// Serial port; auto-detected when unset.
    pub port: Option<String>,
    /// Drive the in-process simulated arm instead of hardware.
    pub simulate: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_playback: false,
            base_unit_secs: 0.1,
            pause_poll_secs: 0.05,
            home_timeout_secs: 30.0,
            home_settle_secs: 3.0,
            move_timeout_secs: 10.0,
            port: None,
            simulate: false,
        }
    }
}

fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}

impl PlaybackSettings {
    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            base_unit: secs(self.base_unit_secs),
            pause_poll: secs(self.pause_poll_secs),
        }
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            home_timeout: secs(self.home_timeout_secs),
            home_settle: secs(self.home_settle_secs),
        }
    }

    pub fn move_timeout(&self) -> Duration {
        secs(self.move_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub workspace: Workspace,
    pub converter: ConverterConfig,
    pub tracker: TrackerConfig,
    pub live: LiveConfig,
    pub playback: PlaybackSettings,
    pub detector: DetectorCommand,
    pub output_directory: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: Workspace::default(),
            converter: ConverterConfig::default(),
            tracker: TrackerConfig::default(),
            live: LiveConfig::default(),
            playback: PlaybackSettings::default(),
            detector: DetectorCommand::default(),
            output_directory: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("HandToRobot")))
                .unwrap_or_else(|| PathBuf::from("./output")),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Timestamped path inside the output directory.
    pub fn session_path(&self, stem: &str, extension: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.output_directory.join(format!("{}_{}.{}", stem, stamp, extension))
    }
}
