//! Presentation modes and the mirrored display state

use serde::{Deserialize, Serialize};

/// The six mutually exclusive presentation modes of the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Flat line, waiting for input
    #[default]
    Idle,
    /// Hold-to-talk is held; waveform follows the microphone
    Listening,
    /// Reply is being spoken in a neutral mood
    SpeakingNeutral,
    /// Reply is being spoken in an angry mood
    SpeakingAngry,
    /// Colour wash, entered manually or after inactivity
    Screensaver,
    /// Paddle game; amplitude is the paddle position
    Game,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Idle,
        Mode::Listening,
        Mode::SpeakingNeutral,
        Mode::SpeakingAngry,
        Mode::Screensaver,
        Mode::Game,
    ];

    /// Renderer state code
    pub fn code(self) -> u8 {
        match self {
            Mode::Idle => 0,
            Mode::Listening => 1,
            Mode::SpeakingNeutral => 2,
            Mode::SpeakingAngry => 3,
            Mode::Screensaver => 4,
            Mode::Game => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.code() == code)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "Idle"),
            Mode::Listening => write!(f, "Listening"),
            Mode::SpeakingNeutral => write!(f, "SpeakingNeutral"),
            Mode::SpeakingAngry => write!(f, "SpeakingAngry"),
            Mode::Screensaver => write!(f, "Screensaver"),
            Mode::Game => write!(f, "Game"),
        }
    }
}

/// Current mode plus amplitude, as last decided by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayState {
    pub mode: Mode,
    pub amplitude: u8,
}

impl DisplayState {
    pub fn new(amplitude: u8) -> Self {
        Self {
            mode: Mode::Idle,
            amplitude,
        }
    }
}
