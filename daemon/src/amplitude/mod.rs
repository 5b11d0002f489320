//! Amplitude sources for the waveform display
//!
//! Exactly one source is live at a time, chosen by the mode being entered:
//! - Manual: the game paddle
//! - Sampled: live microphone level while listening
//! - Static: a fixed level (or none) for every other mode

mod meter;
mod monitor;
mod paddle;

pub use meter::{LevelForwarder, LevelMeter};
#[cfg(feature = "mic")]
pub use monitor::CpalMonitor;
pub use monitor::LevelMonitor;
#[cfg(test)]
pub use monitor::MonitorError;
#[cfg(any(test, not(feature = "mic")))]
pub use monitor::NullMonitor;
pub use paddle::Paddle;

use crate::config::AmplitudeSettings;
use crate::state::Mode;

/// Which producer drives the amplitude
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmplitudeSource {
    /// Paddle position, stepped by the direction keys
    Manual,
    /// Microphone RMS from the audio callback
    Sampled,
    /// One fixed level emitted on entry; `None` emits nothing
    Static(Option<u8>),
}

impl AmplitudeSource {
    pub fn for_mode(mode: Mode, levels: &AmplitudeSettings) -> Self {
        match mode {
            Mode::Game => AmplitudeSource::Manual,
            Mode::Listening => AmplitudeSource::Sampled,
            Mode::SpeakingNeutral | Mode::SpeakingAngry => AmplitudeSource::Static(Some(levels.full)),
            Mode::Idle => AmplitudeSource::Static(Some(levels.neutral)),
            Mode::Screensaver => AmplitudeSource::Static(None),
        }
    }
}
