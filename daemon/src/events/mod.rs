//! Events module for mode transitions
//!
//! Structured events emitted by the controller for every mode change and
//! every completed or failed voice turn.

use serde::{Deserialize, Serialize};

use crate::pipeline::{CommandTag, Mood};
use crate::state::Mode;

/// Events emitted by the mode controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModeEvent {
    /// The display switched mode
    ModeChanged {
        from: Mode,
        to: Mode,
        /// Time spent in the previous mode
        duration_ms: u64,
    },

    /// No interaction for the configured threshold while Idle
    IdleTimeout {
        idle_ms: u64,
    },

    /// A voice turn finished
    TurnCompleted {
        mood: Mood,
        command: CommandTag,
        spoken: bool,
        duration_ms: u64,
    },

    /// A voice turn failed and the display returned to Idle
    TurnFailed {
        reason: String,
        duration_ms: u64,
    },
}

impl std::fmt::Display for ModeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeEvent::ModeChanged { from, to, duration_ms } => {
                write!(f, "MODE_CHANGED {} -> {} ({}ms)", from, to, duration_ms)
            }
            ModeEvent::IdleTimeout { idle_ms } => write!(f, "IDLE_TIMEOUT ({}ms)", idle_ms),
            ModeEvent::TurnCompleted { mood, command, duration_ms, .. } => {
                write!(f, "TURN_COMPLETED mood={} command={} ({}ms)", mood, command, duration_ms)
            }
            ModeEvent::TurnFailed { reason, duration_ms } => {
                write!(f, "TURN_FAILED {} ({}ms)", reason, duration_ms)
            }
        }
    }
}
