//! Display state mirror
//!
//! Owns the current [`DisplayState`] and writes every change to the command
//! channel and the diagnostic state marker. A failed channel write leaves the
//! mirror stale; `resync` re-sends from the owned state on the next tick.
//! While the microphone drives the waveform the amplitude is released and
//! never re-sent from here.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::mode::{DisplayState, Mode};
use crate::channel::{Command, CommandChannel, Slot};
use crate::events::ModeEvent;
use crate::schedule::Clock;

pub struct Display {
    state: DisplayState,
    channel: Arc<CommandChannel>,
    marker: Box<dyn Slot>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<ModeEvent>,
    /// Time when the current mode was entered
    entered_at: Instant,
    stale_mode: bool,
    stale_amplitude: bool,
    amplitude_owned: bool,
}

impl Display {
    pub fn new(
        channel: Arc<CommandChannel>,
        marker: Box<dyn Slot>,
        clock: Arc<dyn Clock>,
        event_tx: broadcast::Sender<ModeEvent>,
        amplitude: u8,
    ) -> Self {
        let entered_at = clock.now();
        Self {
            state: DisplayState::new(amplitude),
            channel,
            marker,
            clock,
            event_tx,
            entered_at,
            stale_mode: false,
            stale_amplitude: false,
            amplitude_owned: true,
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    /// Switch mode and write it out, even if unchanged
    pub fn set_mode(&mut self, mode: Mode) {
        let old_mode = self.state.mode;
        if old_mode != mode {
            let now = self.clock.now();
            let duration_ms = now.saturating_duration_since(self.entered_at).as_millis() as u64;

            info!(
                from = %old_mode,
                to = %mode,
                duration_ms = duration_ms,
                "state transition"
            );

            self.state.mode = mode;
            self.entered_at = now;
            self.emit(ModeEvent::ModeChanged {
                from: old_mode,
                to: mode,
                duration_ms,
            });
        }
        self.write_mode();
    }

    pub fn set_amplitude(&mut self, level: u8) {
        self.state.amplitude = level;
        self.amplitude_owned = true;
        self.write_amplitude();
    }

    /// Hand the amplitude to another writer until the next `set_amplitude`
    pub fn release_amplitude(&mut self) {
        self.amplitude_owned = false;
        self.stale_amplitude = false;
    }

    /// Re-send whatever the last failed writes left out of date
    pub fn resync(&mut self) {
        if !self.is_stale() {
            return;
        }
        if self.stale_mode {
            debug!(mode = %self.state.mode, "re-sending state");
            self.write_mode();
        }
        if self.stale_amplitude && self.amplitude_owned {
            debug!(amplitude = self.state.amplitude, "re-sending amplitude");
            self.write_amplitude();
        }
    }

    fn is_stale(&self) -> bool {
        self.stale_mode || self.stale_amplitude
    }

    pub fn emit(&self, event: ModeEvent) {
        debug!(%event, "emitting mode event");
        let _ = self.event_tx.send(event);
    }

    fn write_mode(&mut self) {
        let mode = self.state.mode;
        if let Err(e) = self.marker.write(&mode.code().to_string()) {
            warn!(?e, "failed to update state marker");
        }
        match self.channel.send(Command::SetState(mode)) {
            Ok(()) => self.stale_mode = false,
            Err(e) => {
                warn!(error = %e, "state not delivered, will retry");
                self.stale_mode = true;
            }
        }
    }

    fn write_amplitude(&mut self) {
        match self.channel.send(Command::SetAmplitude(self.state.amplitude)) {
            Ok(()) => self.stale_amplitude = false,
            Err(e) => {
                warn!(error = %e, "amplitude not delivered, will retry");
                self.stale_amplitude = true;
            }
        }
    }
}
