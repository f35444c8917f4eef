//! Connection and session state machines.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one transport connection.
///
/// `Disconnected → Connecting → Open → Closing → Disconnected`. A reconnect
/// re-enters `Connecting` from `Disconnected` only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one transcription session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Started,
    Streaming,
    Ended,
    Aborted,
}

impl SessionState {
    /// Started or Streaming.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Started | Self::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Streaming => "streaming",
            Self::Ended => "ended",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {op} session '{id}' in state {state}")]
    Invalid {
        id: String,
        op: &'static str,
        state: SessionState,
    },

    #[error("sequence {got} does not follow {last} in session '{id}'")]
    SequenceRegression { id: String, last: u64, got: u64 },

    #[error("sequence numbers exhausted in session '{id}'")]
    SequenceExhausted { id: String },
}

/// Result of ending a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// The session moved to Ended; an End message should be sent.
    Ended,
    /// The session was already Ended; nothing to send.
    AlreadyEnded,
}

/// A bounded unit of audio-to-transcript work.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: SessionState,
    /// `None` once `u64::MAX` has been claimed.
    next_seq: Option<u64>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            next_seq: Some(0),
        }
    }

    /// Generate a fresh opaque session id.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The sequence number the next implicit chunk will carry, or `None` when
    /// the session has used up every number.
    pub fn next_seq(&self) -> Option<u64> {
        self.next_seq
    }

    /// `Idle → Started`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("start"));
        }
        self.state = SessionState::Started;
        Ok(())
    }

    /// Reserve a sequence number for an audio chunk.
    ///
    /// With `Some(seq)` the caller's number is validated (it must not repeat or
    /// go backwards); with `None` the next number is assigned. Either way the
    /// number is consumed even if the chunk is later dropped.
    pub fn claim_seq(&mut self, seq: Option<u64>) -> Result<u64, TransitionError> {
        if !self.state.is_live() {
            return Err(self.invalid("send audio on"));
        }
        let Some(next) = self.next_seq else {
            return Err(TransitionError::SequenceExhausted {
                id: self.id.clone(),
            });
        };
        let seq = match seq {
            Some(seq) if seq < next => {
                return Err(TransitionError::SequenceRegression {
                    id: self.id.clone(),
                    last: next - 1,
                    got: seq,
                });
            }
            Some(seq) => seq,
            None => next,
        };
        self.next_seq = seq.checked_add(1);
        self.state = SessionState::Streaming;
        Ok(seq)
    }

    /// `Started | Streaming → Ended`; idempotent once Ended.
    pub fn end(&mut self) -> Result<EndOutcome, TransitionError> {
        match self.state {
            SessionState::Started | SessionState::Streaming => {
                self.state = SessionState::Ended;
                Ok(EndOutcome::Ended)
            }
            SessionState::Ended => Ok(EndOutcome::AlreadyEnded),
            SessionState::Idle | SessionState::Aborted => Err(self.invalid("end")),
        }
    }

    /// Move any non-terminal session to Aborted. Returns true if it changed.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SessionState::Aborted;
        true
    }

    fn invalid(&self, op: &'static str) -> TransitionError {
        TransitionError::Invalid {
            id: self.id.clone(),
            op,
            state: self.state,
        }
    }
}
