//! Hotkey module for global keyboard input
//!
//! Uses macOS CGEventTap to track pressed keys; the sampler exposes them to
//! the controller as level-triggered queries.

mod keys;
mod listener;
mod sampler;

pub use keys::KeyBindings;
pub use listener::{HotkeyListener, PressedKeys};
pub use sampler::{InputFrame, InputSampler};

#[cfg(test)]
pub(crate) use keys::Key;
#[cfg(test)]
pub(crate) use sampler::ScriptedKeys;
