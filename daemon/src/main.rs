//! karen-daemon: interaction controller for a voice assistant's waveform display
//!
//! Runs next to the renderer process and provides:
//! - Global key sampling via CGEventTap
//! - The mode controller (Idle, Listening, Speaking, Screensaver, Game)
//! - A polled command file the renderer follows
//! - Voice turns through an external helper process
//!
//! Speech recognition, reply generation and playback live in the helper;
//! this daemon only decides what the display shows.
//!
//! `karen-daemon send <kind> <value>` writes a single command to the
//! renderer by hand and exits.

mod amplitude;
mod channel;
mod config;
mod events;
mod hotkey;
mod lifecycle;
mod pipeline;
mod schedule;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::amplitude::{LevelMeter, LevelMonitor};
use crate::channel::{Command, CommandChannel, FileSlot};
use crate::config::Config;
use crate::events::ModeEvent;
use crate::hotkey::{HotkeyListener, InputSampler, PressedKeys};
use crate::lifecycle::ShutdownSignal;
use crate::pipeline::ProcessPipeline;
use crate::schedule::{Clock, SystemClock};
use crate::state::{Display, Mode, ModeController, Stage};

#[derive(Debug, Parser)]
#[command(about = "Waveform display controller for the Karen voice assistant", author, version)]
struct Cli {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Send one command to the renderer, e.g. `send state 3` or `send a 200`
    Send {
        /// `state` (or `s`) for a mode code 0-5, `amp` (or `a`) for 0-255
        kind: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "karen-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        command_file = %config.command_file.display(),
        state_file = %config.state_file.display(),
        "configuration loaded"
    );

    if let Some(CliCommand::Send { kind, value }) = cli.command {
        return send_manual(&config, &kind, &value).await;
    }

    let shutdown = ShutdownSignal::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let command_slot = FileSlot::new(&config.command_file);
    command_slot
        .ensure_exists()
        .with_context(|| format!("failed to create {}", command_slot.path().display()))?;
    let channel = Arc::new(CommandChannel::new(
        Box::new(command_slot),
        config.settings.timing.settle(),
        Arc::clone(&clock),
    ));

    // Controller -> event logger
    let (event_tx, event_rx) = broadcast::channel::<ModeEvent>(64);

    // Start the key listener (runs on dedicated thread)
    let pressed = PressedKeys::new();
    let hotkey_listener = HotkeyListener::new(pressed.clone());
    match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
        }
        Err(e) => {
            error!(?e, "failed to start hotkey listener");
            warn!("continuing without keyboard input - check Accessibility permissions");
        }
    }

    let running = Arc::new(AtomicBool::new(true));

    // The audio stream behind the monitor is not Send, so the controller is
    // built on the thread that runs it
    let mut controller_task = {
        let config = config.clone();
        let channel = Arc::clone(&channel);
        let running = Arc::clone(&running);
        tokio::task::spawn_blocking(move || {
            let mut controller =
                build_controller(&config, channel, clock, event_tx, pressed, running);
            controller.run();
        })
    };
    let event_logger = tokio::spawn(log_events(event_rx));

    info!("daemon initialized, entering main loop");

    let result = tokio::select! {
        // Quit combination
        result = &mut controller_task => {
            info!("mode controller exited");
            result
        }

        // Wait for shutdown signal
        signal = shutdown.wait() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to listen for shutdown signals"),
            }
            running.store(false, Ordering::SeqCst);
            controller_task.await
        }
    };

    // Cleanup
    info!("shutting down...");
    hotkey_listener.stop();

    if let Err(e) = result {
        error!(error = %e, "mode controller crashed");
        let channel = Arc::clone(&channel);
        let _ = tokio::task::spawn_blocking(move || reset_display(&channel)).await;
        return Err(anyhow!("mode controller crashed: {}", e));
    }

    match event_logger.await {
        Ok(seen) => info!(events = seen, "event log closed"),
        Err(e) => warn!(error = %e, "event logger failed"),
    }

    info!("karen-daemon stopped");

    Ok(())
}

fn build_controller(
    config: &Config,
    channel: Arc<CommandChannel>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<ModeEvent>,
    pressed: PressedKeys,
    running: Arc<AtomicBool>,
) -> ModeController {
    let settings = &config.settings;

    let display = Display::new(
        Arc::clone(&channel),
        Box::new(FileSlot::new(&config.state_file)),
        Arc::clone(&clock),
        event_tx,
        settings.amplitude.neutral,
    );
    let meter = Arc::new(LevelMeter::new(settings.amplitude.rms_scale));
    let stage = Stage::new(
        display,
        channel,
        meter,
        level_monitor(),
        settings.amplitude.clone(),
    );

    let sampler = InputSampler::new(Box::new(pressed.bind(settings.bindings.clone())));
    let pipeline = ProcessPipeline::from_settings(&settings.pipeline);

    ModeController::new(
        stage,
        Box::new(pipeline),
        sampler,
        clock,
        settings.timing.clone(),
        settings.pipeline.clone(),
        running,
    )
}

#[cfg(feature = "mic")]
fn level_monitor() -> Box<dyn LevelMonitor> {
    Box::new(amplitude::CpalMonitor::new())
}

#[cfg(not(feature = "mic"))]
fn level_monitor() -> Box<dyn LevelMonitor> {
    info!("built without microphone support, listening waveform stays flat");
    Box::new(amplitude::NullMonitor)
}

/// Deliver one hand-typed command through the same channel the controller uses
async fn send_manual(config: &Config, kind: &str, value: &str) -> Result<()> {
    let command = Command::from_console(kind, value)
        .with_context(|| format!("invalid command `{} {}`", kind, value))?;

    let slot = FileSlot::new(&config.command_file);
    slot.ensure_exists()
        .with_context(|| format!("failed to create {}", slot.path().display()))?;
    let channel = CommandChannel::new(
        Box::new(slot),
        config.settings.timing.settle(),
        Arc::new(SystemClock),
    );

    tokio::task::spawn_blocking(move || channel.send(command))
        .await
        .context("manual send task failed")??;
    info!(%command, "command sent");
    Ok(())
}

/// Best-effort return to Idle after the controller died
fn reset_display(channel: &CommandChannel) {
    for _ in 0..2 {
        if let Err(e) = channel.send(Command::SetState(Mode::Idle)) {
            warn!(error = %e, "failed to reset display");
        }
    }
}

/// Log every mode event until the controller drops its sender
async fn log_events(mut events: broadcast::Receiver<ModeEvent>) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                seen += 1;
                match serde_json::to_string(&event) {
                    Ok(json) => info!(event = %json, "mode event"),
                    Err(e) => warn!(?e, %event, "failed to serialize mode event"),
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "mode event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    seen
}
