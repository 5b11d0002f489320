//! Audio input feeding the level meter
//!
//! The monitor owns the platform input stream; the meter only sees sample
//! blocks delivered on the audio backend's own thread.

use std::sync::Arc;

use super::meter::LevelMeter;

/// Errors starting microphone level monitoring
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[cfg(any(test, not(feature = "mic")))]
    #[error("no audio backend compiled in")]
    Unavailable,

    #[error("no default input device")]
    NoInputDevice,

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Starts and stops the audio stream behind the level meter
pub trait LevelMonitor {
    fn start(&mut self, meter: Arc<LevelMeter>) -> Result<(), MonitorError>;

    fn stop(&mut self);
}

/// Used when the daemon is built without an audio backend
#[cfg(any(test, not(feature = "mic")))]
#[derive(Debug, Default)]
pub struct NullMonitor;

#[cfg(any(test, not(feature = "mic")))]
impl LevelMonitor for NullMonitor {
    fn start(&mut self, _meter: Arc<LevelMeter>) -> Result<(), MonitorError> {
        Err(MonitorError::Unavailable)
    }

    fn stop(&mut self) {}
}

#[cfg(feature = "mic")]
pub use cpal_backend::CpalMonitor;

#[cfg(feature = "mic")]
mod cpal_backend {
    use std::sync::Arc;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{debug, warn};

    use super::{LevelMonitor, MonitorError};
    use crate::amplitude::meter::LevelMeter;

    /// Default input device through cpal, one stream per listening session
    #[derive(Default)]
    pub struct CpalMonitor {
        stream: Option<cpal::Stream>,
    }

    impl CpalMonitor {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl LevelMonitor for CpalMonitor {
        fn start(&mut self, meter: Arc<LevelMeter>) -> Result<(), MonitorError> {
            if self.stream.is_some() {
                return Ok(());
            }

            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or(MonitorError::NoInputDevice)?;
            let supported = device
                .default_input_config()
                .map_err(|e| MonitorError::Backend(e.to_string()))?;
            let format = supported.sample_format();
            let config: cpal::StreamConfig = supported.into();
            let channels = usize::from(config.channels.max(1));

            let stream = match format {
                cpal::SampleFormat::F32 => build_stream(&device, &config, meter, channels, |s: f32| s),
                cpal::SampleFormat::I16 => build_stream(&device, &config, meter, channels, i16_sample),
                cpal::SampleFormat::U16 => build_stream(&device, &config, meter, channels, u16_sample),
                other => {
                    return Err(MonitorError::Backend(format!(
                        "unsupported sample format {other:?}"
                    )))
                }
            }
            .map_err(|e| MonitorError::Backend(e.to_string()))?;
            stream
                .play()
                .map_err(|e| MonitorError::Backend(e.to_string()))?;

            debug!(
                channels,
                rate = config.sample_rate.0,
                ?format,
                "microphone level stream started"
            );
            self.stream = Some(stream);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                if let Err(e) = stream.pause() {
                    warn!(error = %e, "failed to pause audio input stream");
                }
                debug!("microphone level stream stopped");
            }
        }
    }

    pub(super) fn i16_sample(sample: i16) -> f32 {
        sample as f32 / 32_768.0
    }

    pub(super) fn u16_sample(sample: u16) -> f32 {
        (sample as f32 - 32_768.0) / 32_768.0
    }

    fn build_stream<T, F>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        meter: Arc<LevelMeter>,
        channels: usize,
        convert: F,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::SizedSample,
        F: Fn(T) -> f32 + Send + 'static,
    {
        let mut mono = Vec::new();
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Only the first channel drives the meter
                mono.clear();
                mono.extend(data.iter().step_by(channels).map(|&s| convert(s)));
                meter.on_samples(&mono);
            },
            |err| warn!(error = %err, "audio input stream error"),
            None,
        )
    }
}
