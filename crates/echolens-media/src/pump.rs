//! Audio pump: the producer task moving frames from a source into the client.

use std::io;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use echolens_client::{ChunkOutcome, SessionClient};
use echolens_core::session::ConnectionState;

/// Why the pump stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    SourceEnded,
    Cancelled,
    /// The client lost its connection mid-stream.
    Disconnected,
    /// The client refused a frame (session ended, wrong mode, ...).
    Rejected(String),
    SourceError(String),
}

/// Counters for one pump run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    pub frames_read: u64,
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
    pub bytes_queued: u64,
    pub stopped: StopReason,
}

enum Target {
    Session(String),
    Raw,
}

/// Feeds audio frames to a [`SessionClient`] without ever blocking on the
/// network; backpressure shows up as dropped frames in the report.
pub struct AudioPump {
    client: SessionClient,
    target: Target,
    cancel: CancellationToken,
}

impl AudioPump {
    /// Stream into a started session with client-assigned sequence numbers.
    pub fn session(client: SessionClient, session_id: impl Into<String>) -> Self {
        Self {
            client,
            target: Target::Session(session_id.into()),
            cancel: CancellationToken::new(),
        }
    }

    /// Stream raw PCM frames (raw mode).
    pub fn raw(client: SessionClient) -> Self {
        Self {
            client,
            target: Target::Raw,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<S>(self, frames: S) -> JoinHandle<PumpReport>
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + Unpin + 'static,
    {
        tokio::spawn(self.run(frames))
    }

    pub async fn run<S>(self, mut frames: S) -> PumpReport
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
    {
        let mut report = PumpReport {
            frames_read: 0,
            frames_queued: 0,
            frames_dropped: 0,
            frames_skipped: 0,
            bytes_queued: 0,
            stopped: StopReason::SourceEnded,
        };
        info!(target_session = ?self.session_id(), "Audio pump started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.stopped = StopReason::Cancelled;
                    break;
                }
                next = frames.next() => next,
            };

            let frame = match next {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!(%e, "Audio source failed");
                    report.stopped = StopReason::SourceError(e.to_string());
                    break;
                }
            };
            report.frames_read += 1;

            if frame.is_empty() {
                report.frames_skipped += 1;
                continue;
            }

            if self.client.state() == ConnectionState::Disconnected {
                warn!(target_session = ?self.session_id(), "Connection lost, stopping pump");
                report.stopped = StopReason::Disconnected;
                break;
            }

            let len = frame.len() as u64;
            let outcome = match &self.target {
                Target::Session(id) => match self.client.send_audio(id, frame) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(session_id = %id, %e, "Client rejected audio, stopping pump");
                        report.stopped = StopReason::Rejected(e.to_string());
                        break;
                    }
                },
                Target::Raw => self.client.send_raw(frame),
            };

            match outcome {
                ChunkOutcome::Queued => {
                    report.frames_queued += 1;
                    report.bytes_queued += len;
                }
                ChunkOutcome::Dropped => {
                    report.frames_dropped += 1;
                    debug!(bytes = len, "Frame dropped under backpressure");
                }
            }
        }

        info!(
            frames_read = report.frames_read,
            frames_queued = report.frames_queued,
            frames_dropped = report.frames_dropped,
            stopped = ?report.stopped,
            "Audio pump stopped"
        );
        report
    }

    fn session_id(&self) -> Option<&str> {
        match &self.target {
            Target::Session(id) => Some(id),
            Target::Raw => None,
        }
    }
}
