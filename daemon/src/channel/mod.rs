//! Command channel to the external waveform renderer
//!
//! The renderer is a separate process that polls a single command slot.
//! All state and amplitude updates funnel through one [`CommandChannel`].

mod bridge;
mod command;
mod slot;

pub use bridge::CommandChannel;
pub use command::Command;
pub use slot::{FileSlot, Slot};

#[cfg(test)]
pub(crate) use slot::MemorySlot;
