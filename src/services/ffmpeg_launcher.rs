//! FFmpeg process launching and supervision plumbing
//!
//! Each spawned process gets a dedicated task that turns its stderr lines and
//! exit status into typed [`ProcessEvent`]s on an mpsc channel. The consumer
//! (the stream supervisor) reads those serially per job, so all decisions
//! about fallback and cleanup happen in one place.
//!
//! `ProcessLauncher` is a trait so lifecycle logic can be driven in tests by
//! a scripted implementation instead of a real ffmpeg binary.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{RelayError, RelayResult};

const EVENT_BUFFER: usize = 64;

/// What a supervised process reported
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// One stderr line (ffmpeg writes all diagnostics there)
    Diagnostic(String),
    /// Process ended; `None` when killed by signal
    Exited(Option<i32>),
}

/// Handle to a launched process
///
/// Dropping the handle does not kill the process; cancelling the token does.
/// After `Exited` is delivered the channel closes and the pump task ends.
pub struct LaunchedJob {
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<ProcessEvent>,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, args: &[String]) -> RelayResult<LaunchedJob>;
}

/// Real launcher: spawns the configured ffmpeg binary
pub struct FfmpegLauncher {
    ffmpeg_command: String,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg_command: String) -> Self {
        Self { ffmpeg_command }
    }
}

#[async_trait]
impl ProcessLauncher for FfmpegLauncher {
    async fn launch(&self, args: &[String]) -> RelayResult<LaunchedJob> {
        let mut cmd = Command::new(&self.ffmpeg_command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| RelayError::ProcessSpawnFailed(e.to_string()))?;
        let pid = child.id();
        debug!("Spawned ffmpeg pid={:?}", pid);

        let stderr_lines = child
            .stderr
            .take()
            .map(|stderr| BufReader::new(stderr).lines());
        if stderr_lines.is_none() {
            warn!("ffmpeg pid={:?} has no stderr pipe", pid);
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump_process(child, stderr_lines, tx, cancel.clone()));

        Ok(LaunchedJob {
            pid,
            events: rx,
            cancel,
        })
    }
}

async fn next_diagnostic(lines: &mut Option<Lines<BufReader<ChildStderr>>>) -> Option<String> {
    match lines {
        Some(reader) => match reader.next_line().await {
            Ok(Some(line)) => Some(line),
            _ => None,
        },
        // No pipe: never yields, exit arm of the select resolves instead
        None => std::future::pending().await,
    }
}

enum PumpEnd {
    Exited(Option<i32>),
    Cancelled,
    ConsumerGone,
}

async fn pump_process(
    mut child: Child,
    mut lines: Option<Lines<BufReader<ChildStderr>>>,
    tx: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
) {
    // The child is only touched after the loop so no select branch body
    // conflicts with the `wait()` borrow
    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break PumpEnd::Cancelled,
            line = next_diagnostic(&mut lines) => {
                match line {
                    Some(text) => {
                        if tx.send(ProcessEvent::Diagnostic(text)).await.is_err() {
                            break PumpEnd::ConsumerGone;
                        }
                    }
                    None => {
                        // stderr closed; keep waiting for the exit status
                        lines = None;
                    }
                }
            }
            status = child.wait() => {
                break PumpEnd::Exited(status.ok().and_then(|s| s.code()));
            }
        }
    };

    match end {
        PumpEnd::Exited(code) => {
            let _ = tx.send(ProcessEvent::Exited(code)).await;
        }
        PumpEnd::Cancelled => {
            if let Err(e) = child.start_kill() {
                debug!("Kill after cancel failed (already gone?): {}", e);
            }
            let code = child.wait().await.ok().and_then(|s| s.code());
            let _ = tx.send(ProcessEvent::Exited(code)).await;
        }
        PumpEnd::ConsumerGone => {
            // Consumer dropped the receiver; reap the orphan quietly
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
