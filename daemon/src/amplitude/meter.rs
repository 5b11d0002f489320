//! Microphone energy to amplitude
//!
//! The audio callback only computes a level and parks it in an atomic slot.
//! A forwarder thread, running while sampling is live, picks the newest
//! parked level up at a fixed interval and offers it to the command channel.
//! Levels that arrive faster than that, or while the channel is busy, are
//! coalesced away.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::channel::{Command, CommandChannel};

/// Root-mean-square of a block of samples
pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt()
}

/// Linear RMS to amplitude conversion with saturation
pub(crate) fn level_from_rms(rms: f32, scale: f32) -> u8 {
    let scaled = rms * scale;
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= 255.0 {
        255
    } else {
        scaled as u8
    }
}

/// Latest microphone level, written from the audio callback
pub struct LevelMeter {
    scale: f32,
    active: AtomicBool,
    pending: AtomicBool,
    level: AtomicU8,
    dropped: AtomicU64,
}

impl LevelMeter {
    pub fn new(scale: f32) -> Self {
        Self {
            scale,
            active: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            level: AtomicU8::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn activate(&self) {
        self.dropped.store(0, Ordering::Relaxed);
        self.pending.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.pending.store(false, Ordering::SeqCst);
            debug!(dropped = self.dropped(), "level meter stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Most recent computed level, forwarded or not
    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }

    /// Levels coalesced away since activation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Handle one block of audio from the callback thread
    ///
    /// Returns `false` when the block was ignored or replaced a level that
    /// had not been forwarded yet.
    pub fn on_samples(&self, samples: &[f32]) -> bool {
        if !self.is_active() {
            return false;
        }

        let level = level_from_rms(rms(samples), self.scale);
        self.level.store(level, Ordering::Relaxed);
        if self.pending.swap(true, Ordering::AcqRel) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Take the parked level, if there is one
    fn take(&self) -> Option<u8> {
        if self.pending.swap(false, Ordering::AcqRel) {
            Some(self.level())
        } else {
            None
        }
    }

    /// Forward the parked level without waiting for the channel
    ///
    /// A busy channel leaves the level parked for the next attempt.
    pub(crate) fn forward_pending(&self, channel: &CommandChannel) -> bool {
        let Some(level) = self.take() else {
            return false;
        };

        match channel.try_send(Command::SetAmplitude(level)) {
            Ok(true) => {
                trace!(level, "microphone level forwarded");
                true
            }
            Ok(false) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if self.is_active() {
                    self.pending.store(true, Ordering::Release);
                }
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to forward microphone level");
                false
            }
        }
    }
}

/// Thread moving parked levels from a [`LevelMeter`] to the channel
pub struct LevelForwarder {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LevelForwarder {
    pub fn spawn(
        meter: Arc<LevelMeter>,
        channel: Arc<CommandChannel>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("level-forwarder".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        meter.forward_pending(&channel);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("level forwarder panicked");
            }
        }
    }
}

impl Drop for LevelForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}
