//! Output stage: the display mirror plus whichever amplitude source is live
//!
//! Entering a mode always selects its [`AmplitudeSource`]. The microphone
//! monitor and its level forwarder only run while the source is `Sampled`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::display::Display;
use super::mode::{DisplayState, Mode};
use crate::amplitude::{AmplitudeSource, LevelForwarder, LevelMeter, LevelMonitor, Paddle};
use crate::channel::CommandChannel;
use crate::config::AmplitudeSettings;
use crate::events::ModeEvent;

pub struct Stage {
    display: Display,
    channel: Arc<CommandChannel>,
    meter: Arc<LevelMeter>,
    monitor: Box<dyn LevelMonitor>,
    forwarder: Option<LevelForwarder>,
    paddle: Paddle,
    source: AmplitudeSource,
    levels: AmplitudeSettings,
}

impl Stage {
    pub fn new(
        display: Display,
        channel: Arc<CommandChannel>,
        meter: Arc<LevelMeter>,
        monitor: Box<dyn LevelMonitor>,
        levels: AmplitudeSettings,
    ) -> Self {
        Self {
            display,
            channel,
            meter,
            monitor,
            forwarder: None,
            paddle: Paddle::new(levels.neutral, levels.paddle_step),
            source: AmplitudeSource::for_mode(Mode::Idle, &levels),
            levels,
        }
    }

    pub fn mode(&self) -> Mode {
        self.display.mode()
    }

    /// Mirrored state, with the live microphone level while sampling
    pub fn state(&self) -> DisplayState {
        let mut state = self.display.state();
        if self.source == AmplitudeSource::Sampled {
            state.amplitude = self.meter.level();
        }
        state
    }

    /// Switch to `mode` and hand the amplitude to its source
    pub fn enter(&mut self, mode: Mode) {
        self.enter_with_repeats(mode, 1);
    }

    /// Like [`Stage::enter`], writing the state twice before the amplitude
    ///
    /// Used for returns to Idle the renderer must not miss.
    pub fn enter_confirmed(&mut self, mode: Mode) {
        self.enter_with_repeats(mode, 2);
    }

    fn enter_with_repeats(&mut self, mode: Mode, repeats: usize) {
        let source = AmplitudeSource::for_mode(mode, &self.levels);
        if self.source == AmplitudeSource::Sampled && source != AmplitudeSource::Sampled {
            self.stop_sampling();
        }

        for _ in 0..repeats {
            self.display.set_mode(mode);
        }

        match source {
            AmplitudeSource::Manual => {
                let home = self.paddle.reset();
                self.display.set_amplitude(home);
            }
            AmplitudeSource::Sampled => {
                self.display.release_amplitude();
                if self.source != AmplitudeSource::Sampled {
                    self.start_sampling();
                }
            }
            AmplitudeSource::Static(Some(level)) => self.display.set_amplitude(level),
            AmplitudeSource::Static(None) => {}
        }
        self.source = source;
    }

    /// Move the paddle for one game tick
    pub fn steer(&mut self, left: bool, right: bool) {
        if self.source != AmplitudeSource::Manual {
            return;
        }
        if let Some(position) = self.paddle.advance(left, right) {
            self.display.set_amplitude(position);
        }
    }

    pub fn resync(&mut self) {
        self.display.resync();
    }

    pub fn emit(&self, event: ModeEvent) {
        self.display.emit(event);
    }

    fn start_sampling(&mut self) {
        self.meter.activate();
        match LevelForwarder::spawn(
            Arc::clone(&self.meter),
            Arc::clone(&self.channel),
            self.levels.meter_interval(),
        ) {
            Ok(forwarder) => self.forwarder = Some(forwarder),
            Err(e) => warn!(error = %e, "failed to start level forwarder"),
        }
        if let Err(e) = self.monitor.start(Arc::clone(&self.meter)) {
            // Listening still works, the waveform just stays where it was
            info!(error = %e, "microphone level unavailable");
        }
    }

    fn stop_sampling(&mut self) {
        self.meter.deactivate();
        if let Some(mut forwarder) = self.forwarder.take() {
            forwarder.stop();
        }
        self.monitor.stop();
        debug!(last_level = self.meter.level(), "sampling stopped");
    }
}
