//! Serialized, settling writer for the renderer command slot
//!
//! The renderer polls the slot at a fixed interval and never acknowledges.
//! Every write therefore holds the channel lock for the settling delay, so
//! the value is observed before any other writer can replace it.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use tracing::{trace, warn};

use super::command::Command;
use super::slot::Slot;
use crate::schedule::Clock;

/// Errors that can occur writing to the command slot
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to write `{command}` to the command slot: {source}")]
    Write {
        command: Command,
        #[source]
        source: io::Error,
    },
}

/// The single outbound link to the external renderer
pub struct CommandChannel {
    slot: Box<dyn Slot>,
    lock: Mutex<()>,
    settle: Duration,
    clock: Arc<dyn Clock>,
}

impl CommandChannel {
    /// Create a channel writing to `slot`, settling `settle` after each write
    pub fn new(slot: Box<dyn Slot>, settle: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slot,
            lock: Mutex::new(()),
            settle,
            clock,
        }
    }

    /// Write a command, blocking until the settling delay has passed
    pub fn send(&self, command: Command) -> Result<(), ChannelError> {
        let _guard = lock_or_recover(&self.lock, "command channel");
        self.write_locked(command)
    }

    /// Write a command only if no other writer holds the channel
    ///
    /// Returns `Ok(false)` when the command was dropped because the channel
    /// was busy.
    pub fn try_send(&self, command: Command) -> Result<bool, ChannelError> {
        let _guard = match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                trace!(%command, "command channel busy, dropping");
                return Ok(false);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.write_locked(command).map(|()| true)
    }

    fn write_locked(&self, command: Command) -> Result<(), ChannelError> {
        let wire = command.to_string();
        self.slot
            .write(&wire)
            .map_err(|source| ChannelError::Write { command, source })?;
        trace!(%command, "command written");
        self.clock.sleep(self.settle);
        Ok(())
    }
}

/// Take a mutex, recovering the guard if a previous holder panicked
fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(context, "mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
