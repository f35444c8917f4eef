//! Result and error broadcasting to any number of listeners.

use std::fmt;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use echolens_core::protocol::InboundMessage;

/// Message of the error emitted when the transport never opens.
pub const CONNECT_TIMEOUT_MESSAGE: &str = "Timeout: connection not established";

/// Lazy, unbounded sequence of inbound results.
pub type ResultStream = BoxStream<'static, InboundMessage>;

/// Lazy, unbounded sequence of asynchronous errors.
pub type ErrorStream = BoxStream<'static, ErrorEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The transport did not open in time.
    ConnectionTimeout,
    /// The connection failed or dropped.
    TransportFailure,
    /// The peer closed the connection.
    ClosedByPeer,
    /// The service reported an error message.
    Remote,
}

/// An error delivered on the error stream, never raised to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: None,
            message: message.into(),
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Broadcast hub shared by every connection of one client.
///
/// Senders live as long as the client, so listeners survive reconnects.
pub(crate) struct EventHub {
    results: broadcast::Sender<InboundMessage>,
    errors: broadcast::Sender<ErrorEvent>,
}

impl EventHub {
    pub(crate) fn new(results_capacity: usize, errors_capacity: usize) -> Self {
        let (results, _) = broadcast::channel(results_capacity.max(1));
        let (errors, _) = broadcast::channel(errors_capacity.max(1));
        Self { results, errors }
    }

    pub(crate) fn publish_result(&self, message: InboundMessage) {
        let kind = message.kind();
        // No listener is not an error: results are simply unobserved.
        let listeners = self.results.send(message).unwrap_or(0);
        debug!(kind, listeners, "Published result");
    }

    pub(crate) fn publish_error(&self, event: ErrorEvent) {
        let listeners = self.errors.send(event.clone()).unwrap_or(0);
        warn!(kind = ?event.kind, session_id = ?event.session_id, message = %event.message, listeners, "Published error");
    }

    pub(crate) fn subscribe_results(&self) -> broadcast::Receiver<InboundMessage> {
        self.results.subscribe()
    }

    pub(crate) fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    pub(crate) fn result_stream(&self) -> ResultStream {
        lossy(self.results.subscribe(), "results")
    }

    pub(crate) fn error_stream(&self) -> ErrorStream {
        lossy(self.errors.subscribe(), "errors")
    }
}

/// Turn a broadcast receiver into a stream that skips over missed events.
fn lossy<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
    name: &'static str,
) -> BoxStream<'static, T> {
    BroadcastStream::new(rx)
        .filter_map(move |item| async move {
            match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(stream = name, missed, "Slow listener missed events");
                    None
                }
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_listener_sees_every_event() {
        let hub = EventHub::new(8, 8);
        let mut a = hub.result_stream();
        let mut b = hub.result_stream();

        hub.publish_result(InboundMessage::Pong);

        assert_eq!(a.next().await, Some(InboundMessage::Pong));
        assert_eq!(b.next().await, Some(InboundMessage::Pong));
    }

    #[tokio::test]
    async fn test_no_replay_for_late_listener() {
        let hub = EventHub::new(8, 8);
        hub.publish_error(ErrorEvent::new(ErrorKind::Remote, "early"));

        let mut late = hub.subscribe_errors();
        assert!(late.try_recv().is_err());

        hub.publish_error(ErrorEvent::new(ErrorKind::Remote, "late"));
        assert_eq!(late.try_recv().unwrap().message, "late");
    }

    #[tokio::test]
    async fn test_lagging_listener_skips_missed_events() {
        let hub = EventHub::new(2, 2);
        let mut stream = hub.result_stream();
        for text in ["a", "b", "c", "d"] {
            hub.publish_result(InboundMessage::Transcription {
                text: Some(text.into()),
            });
        }
        // Oldest two were overwritten; the stream resumes with what is left.
        assert_eq!(
            stream.next().await,
            Some(InboundMessage::Transcription {
                text: Some("c".into())
            })
        );
    }

    #[test]
    fn test_error_event_display() {
        let event = ErrorEvent::new(ErrorKind::ConnectionTimeout, CONNECT_TIMEOUT_MESSAGE)
            .with_session(Some("s1".into()));
        assert_eq!(event.to_string(), CONNECT_TIMEOUT_MESSAGE);
        assert_eq!(event.session_id.as_deref(), Some("s1"));
    }
}
