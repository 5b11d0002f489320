//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hotkey::KeyBindings;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Command slot polled by the renderer
    pub command_file: PathBuf,

    /// Diagnostic marker holding the current mode code
    pub state_file: PathBuf,

    pub settings: Settings,
}

/// Tunables, optionally overridden by `config.json` in the data directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timing: Timing,
    pub amplitude: AmplitudeSettings,
    pub bindings: KeyBindings,
    pub pipeline: PipelineSettings,
}

/// Tick rates and delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Tick interval while Idle or Listening
    pub tick_ms: u64,
    /// Tick interval inside the game
    pub game_tick_ms: u64,
    /// Tick interval inside the screensaver
    pub screensaver_tick_ms: u64,
    /// Hold time after every channel write; must exceed the renderer poll interval
    pub settle_ms: u64,
    /// Inactivity before the screensaver starts on its own
    pub idle_timeout_secs: u64,
    /// Pause after leaving the game or screensaver
    pub exit_debounce_ms: u64,
    /// Pause between a spoken reply and the mode it asked for
    pub command_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            game_tick_ms: 33,
            screensaver_tick_ms: 100,
            settle_ms: 100,
            idle_timeout_secs: 20,
            exit_debounce_ms: 300,
            command_delay_ms: 500,
        }
    }
}

impl Timing {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn game_tick(&self) -> Duration {
        Duration::from_millis(self.game_tick_ms)
    }

    pub fn screensaver_tick(&self) -> Duration {
        Duration::from_millis(self.screensaver_tick_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn exit_debounce(&self) -> Duration {
        Duration::from_millis(self.exit_debounce_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }
}

/// Amplitude levels and scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplitudeSettings {
    /// Midpoint used for Idle and as the paddle's home
    pub neutral: u8,
    /// Level while speaking
    pub full: u8,
    /// Paddle movement per game tick
    pub paddle_step: u8,
    /// Microphone RMS to amplitude multiplier
    pub rms_scale: f32,
    /// Minimum spacing between forwarded microphone levels
    pub meter_interval_ms: u64,
}

impl Default for AmplitudeSettings {
    fn default() -> Self {
        Self {
            neutral: 128,
            full: 255,
            paddle_step: 24,
            rms_scale: 4000.0,
            meter_interval_ms: 100,
        }
    }
}

impl AmplitudeSettings {
    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms.max(1))
    }
}

/// Voice pipeline helper invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub program: String,
    pub args: Vec<String>,
    /// Limit for capture, transcription and reply generation
    pub timeout_secs: u64,
    /// Limit for playback once the reply is announced
    pub playback_timeout_secs: u64,
    /// Honour `command:` tags in replies
    pub embedded_commands: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["audio/pipeline.py".to_string()],
            timeout_secs: 25,
            playback_timeout_secs: 60,
            embedded_commands: true,
        }
    }
}

impl PipelineSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_secs)
    }
}

impl Config {
    /// Load configuration from environment, the optional settings file and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("KAREN_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(&home).join(".local").join("share").join("karen")
            }
        };

        let settings = Settings::load(&data_dir.join("config.json"))?;

        let command_file = std::env::var_os("KAREN_COMMAND_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("vio_command.txt"));
        let state_file = std::env::var_os("KAREN_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("vio_state.txt"));

        Ok(Self {
            data_dir,
            command_file,
            state_file,
            settings,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

impl Settings {
    /// Read settings from `path`; a missing file means all defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw)
                .with_context(|| format!("invalid settings in {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
