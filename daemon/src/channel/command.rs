//! Renderer command definitions and wire format
//!
//! One command per write, plain text: `state <0-5>` or `amp <0-255>`.
//! The whole slot content is the current command; there is no framing.

use std::fmt;
use std::str::FromStr;

use crate::state::Mode;

/// An instruction for the external renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Switch the rendered mode
    SetState(Mode),
    /// Set the waveform amplitude
    SetAmplitude(u8),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetState(mode) => write!(f, "state {}", mode.code()),
            Command::SetAmplitude(level) => write!(f, "amp {}", level),
        }
    }
}

/// Errors decoding a command string
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command kind: {0}")]
    UnknownKind(String),

    #[error("invalid value for {kind}: {value}")]
    InvalidValue { kind: &'static str, value: String },
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let kind = parts.next().ok_or(ParseCommandError::Empty)?;
        let value = parts.next().unwrap_or_default();
        let invalid = |kind: &'static str| ParseCommandError::InvalidValue {
            kind,
            value: value.to_string(),
        };

        if parts.next().is_some() {
            return Err(invalid("command"));
        }

        match kind {
            "state" => value
                .parse::<u8>()
                .ok()
                .and_then(Mode::from_code)
                .map(Command::SetState)
                .ok_or_else(|| invalid("state")),
            "amp" => value
                .parse::<u8>()
                .map(Command::SetAmplitude)
                .map_err(|_| invalid("amp")),
            other => Err(ParseCommandError::UnknownKind(other.to_string())),
        }
    }
}

impl Command {
    /// Build a command from hand-typed parts, accepting `s`/`a` shorthands
    pub fn from_console(kind: &str, value: &str) -> Result<Self, ParseCommandError> {
        let kind = match kind {
            "s" => "state",
            "a" => "amp",
            other => other,
        };
        format!("{kind} {value}").parse()
    }
}
