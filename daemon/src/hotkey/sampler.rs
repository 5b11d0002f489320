//! Level-triggered key sampling
//!
//! The sampler has no memory of earlier ticks; edge handling and debouncing
//! belong to the controller.

use tracing::{info, warn};

use super::keys::Key;

/// Errors reading key state
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("key state unavailable: {0}")]
    Unavailable(String),
}

/// Anything that can answer "is this key held right now"
pub trait KeySource: Send {
    fn is_pressed(&self, key: Key) -> Result<bool, InputError>;
}

/// Every key's state at one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputFrame {
    pub talk: bool,
    pub quit: bool,
    pub game: bool,
    pub screensaver: bool,
    pub cancel: bool,
    pub left: bool,
    pub right: bool,
}

/// Polls a [`KeySource`], turning read failures into "not pressed"
pub struct InputSampler {
    source: Box<dyn KeySource>,
    faulted: bool,
}

impl InputSampler {
    pub fn new(source: Box<dyn KeySource>) -> Self {
        Self {
            source,
            faulted: false,
        }
    }

    pub fn is_pressed(&mut self, key: Key) -> bool {
        match self.source.is_pressed(key) {
            Ok(pressed) => {
                if self.faulted {
                    info!("key input recovered");
                    self.faulted = false;
                }
                pressed
            }
            Err(e) => {
                if !self.faulted {
                    warn!(error = %e, "key input unavailable, treating as released");
                    self.faulted = true;
                }
                false
            }
        }
    }

    /// Sample all keys once
    pub fn sample(&mut self) -> InputFrame {
        InputFrame {
            talk: self.is_pressed(Key::Talk),
            quit: self.is_pressed(Key::Quit),
            game: self.is_pressed(Key::Game),
            screensaver: self.is_pressed(Key::Screensaver),
            cancel: self.is_pressed(Key::Cancel),
            left: self.is_pressed(Key::Left),
            right: self.is_pressed(Key::Right),
        }
    }
}

#[cfg(test)]
pub(crate) use scripted::ScriptedKeys;
