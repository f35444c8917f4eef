//! Transport abstraction between the session client and the wire.
//!
//! A [`Transport`] opens one connection at a time. Everything the connection
//! observes (open, inbound frames, close, failure) is published into a single
//! [`EventSender`]; writes go through the returned [`TransportSink`], which
//! only the client's send loop and its close path ever touch.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// A frame written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Notifications published by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and writable.
    Open,
    Text(String),
    Binary(Vec<u8>),
    /// The peer closed the connection.
    Closed { code: u16, reason: String },
    /// The connection failed (before or after opening).
    Failure(String),
}

/// Sender half of the per-connection event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half of the per-connection event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Write half of one transport connection.
#[async_trait]
pub trait TransportSink: Send + 'static {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Start a graceful close handshake.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Connection factory.
pub trait Transport: Send + Sync + 'static {
    /// Begin opening a connection and return its write half immediately.
    ///
    /// The attempt proceeds in the background and reports through `events`.
    /// Cancelling `cancel` must release every resource the connection holds,
    /// whether or not a graceful close has completed.
    fn open(&self, events: EventSender, cancel: CancellationToken) -> Box<dyn TransportSink>;
}
