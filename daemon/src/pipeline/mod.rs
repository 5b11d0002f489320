//! Voice interaction pipeline boundary
//!
//! Capture, transcription, reply generation and speech playback happen
//! outside the daemon. The controller sees one blocking call per turn that
//! reports the annotated reply before playback and the outcome afterwards.

mod process;
mod reply;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use process::ProcessPipeline;

/// Mood the reply is spoken in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Angry,
    #[default]
    Neutral,
    Inquisitive,
    Happy,
}

impl Mood {
    /// Decode a mood tag; anything unrecognized is `Neutral`
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "angry" => Mood::Angry,
            "inquisitive" => Mood::Inquisitive,
            "happy" => Mood::Happy,
            _ => Mood::Neutral,
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mood::Angry => write!(f, "angry"),
            Mood::Neutral => write!(f, "neutral"),
            Mood::Inquisitive => write!(f, "inquisitive"),
            Mood::Happy => write!(f, "happy"),
        }
    }
}

/// Mode switch requested by the reply, applied after it has been spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTag {
    #[default]
    None,
    Game,
    Screensaver,
}

impl CommandTag {
    /// Decode a command tag; anything unrecognized is `None`
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "game" => CommandTag::Game,
            "screensaver" => CommandTag::Screensaver,
            _ => CommandTag::None,
        }
    }
}

impl std::fmt::Display for CommandTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandTag::None => write!(f, "none"),
            CommandTag::Game => write!(f, "game"),
            CommandTag::Screensaver => write!(f, "screensaver"),
        }
    }
}

/// Annotated reply, available before playback starts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub mood: Mood,
    pub command: CommandTag,
    pub text: String,
}

/// Result of a completed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    pub mood: Mood,
    pub command: CommandTag,
    /// Whether the reply was actually played back
    pub spoken: bool,
}

/// Ways a voice turn can fail
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("audio capture failed: {0}")]
    Capture(String),

    #[error("speech recognition failed: {0}")]
    Recognition(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One conversational turn as a single blocking unit of work
pub trait VoicePipeline: Send {
    /// Run a turn
    ///
    /// `on_reply` is called once, after the reply is generated and before it
    /// is played. The call must fail with [`PipelineError::Timeout`] rather
    /// than block past `timeout` waiting for the reply.
    fn interact(
        &mut self,
        timeout: Duration,
        on_reply: &mut dyn FnMut(&Reply),
    ) -> Result<TurnOutcome, PipelineError>;
}
