//! Helper-process implementation of the voice pipeline
//!
//! The helper does the actual capture, transcription, generation and
//! playback. It prints the annotated reply, then a `---` line right before
//! playback starts, then exits once playback has finished.
//!
//! Exit codes before the delimiter: 2 no speech / capture failure,
//! 3 recognition failure, 4 synthesis failure.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::reply::parse_reply;
use super::{PipelineError, Reply, TurnOutcome, VoicePipeline};
use crate::config::PipelineSettings;

/// Line separating the reply annotation from playback
const REPLY_DELIMITER: &str = "---";

/// How often a finished helper is polled for its exit status
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Runs one helper process per voice turn
#[derive(Debug, Clone)]
pub struct ProcessPipeline {
    program: String,
    args: Vec<String>,
    playback_timeout: Duration,
}

impl ProcessPipeline {
    pub fn new(program: impl Into<String>, args: Vec<String>, playback_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            playback_timeout,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.program.clone(),
            settings.args.clone(),
            settings.playback_timeout(),
        )
    }
}

impl VoicePipeline for ProcessPipeline {
    fn interact(
        &mut self,
        timeout: Duration,
        on_reply: &mut dyn FnMut(&Reply),
    ) -> Result<TurnOutcome, PipelineError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        debug!(program = %self.program, pid = child.id(), "pipeline helper spawned");

        let stdout = child.stdout.take();
        let mut helper = Helper { child };
        let lines = match stdout {
            Some(stdout) => spawn_reader(stdout)?,
            None => return Err(PipelineError::Capture("helper stdout unavailable".to_string())),
        };

        helper.drive(&lines, timeout, self.playback_timeout, on_reply)
    }
}

/// A running helper; killed on drop if it has not exited
struct Helper {
    child: Child,
}

impl Helper {
    fn drive(
        &mut self,
        lines: &Receiver<String>,
        timeout: Duration,
        playback_timeout: Duration,
        on_reply: &mut dyn FnMut(&Reply),
    ) -> Result<TurnOutcome, PipelineError> {
        let reply_deadline = Instant::now() + timeout;
        let mut block = Vec::new();
        let mut delivered = false;

        loop {
            let remaining = reply_deadline.saturating_duration_since(Instant::now());
            match lines.recv_timeout(remaining) {
                Ok(line) if line.trim() == REPLY_DELIMITER => {
                    delivered = true;
                    break;
                }
                Ok(line) => block.push(line),
                Err(RecvTimeoutError::Timeout) => return Err(PipelineError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let reply = parse_reply(&block.join("\n"));

        if !delivered {
            // Helper closed stdout without announcing playback
            let status = self.wait_until(reply_deadline, timeout)?;
            if !status.success() {
                return Err(exit_error(status, false));
            }
            debug!(mood = %reply.mood, "helper finished without playback");
            return Ok(TurnOutcome {
                mood: reply.mood,
                command: reply.command,
                spoken: false,
            });
        }

        info!(mood = %reply.mood, command = %reply.command, text = %reply.text, "reply ready");
        on_reply(&reply);

        let playback_deadline = Instant::now() + playback_timeout;
        loop {
            let remaining = playback_deadline.saturating_duration_since(Instant::now());
            match lines.recv_timeout(remaining) {
                Ok(line) => debug!(line = %line, "helper output"),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PipelineError::Timeout(playback_timeout));
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = self.wait_until(playback_deadline, playback_timeout)?;
        if !status.success() {
            return Err(exit_error(status, true));
        }

        Ok(TurnOutcome {
            mood: reply.mood,
            command: reply.command,
            spoken: true,
        })
    }

    fn wait_until(&mut self, deadline: Instant, limit: Duration) -> Result<ExitStatus, PipelineError> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(PipelineError::Timeout(limit));
            }
            thread::sleep(EXIT_POLL);
        }
    }
}

impl Drop for Helper {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = self.child.id(), "killing pipeline helper");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Forward helper output line by line until it closes stdout
///
/// Bytes that are not UTF-8 are replaced rather than ending the read, and
/// output keeps being drained after the turn stops listening so the helper
/// never blocks on a full pipe.
fn spawn_reader(stdout: ChildStdout) -> std::io::Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("pipeline-stdout".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            let mut listening = true;
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if !listening {
                            continue;
                        }
                        while matches!(buf.last(), Some(b'\n' | b'\r')) {
                            buf.pop();
                        }
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        if tx.send(line).is_err() {
                            debug!("turn finished, discarding remaining helper output");
                            listening = false;
                        }
                    }
                    Err(e) => {
                        warn!(?e, "failed to read helper output");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

fn exit_error(status: ExitStatus, replied: bool) -> PipelineError {
    let detail = format!("helper {}", status);
    match status.code() {
        Some(2) => PipelineError::Capture(detail),
        Some(3) => PipelineError::Recognition(detail),
        Some(4) => PipelineError::Synthesis(detail),
        _ if replied => PipelineError::Synthesis(detail),
        _ => PipelineError::Capture(detail),
    }
}
