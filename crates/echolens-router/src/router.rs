//! Classifies inbound results and forwards substantive text to a sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use echolens_core::protocol::InboundMessage;

use crate::sink::TextSink;

/// Where a single inbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Pong: the service is alive. Never forwarded.
    Liveness,
    /// Blank text or a bracketed marker such as `[silence]`.
    Marker { text: String },
    /// Substantive text for the sink.
    Deliver { text: String, is_final: bool },
    /// Not for this router (other session, or not a result).
    Ignored,
}

/// Notifications the router reports alongside sink delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouterEvent {
    Liveness {
        at: DateTime<Utc>,
    },
    Marker {
        session_id: Option<String>,
        text: String,
    },
    Delivered {
        session_id: Option<String>,
        is_final: bool,
    },
    /// A final result arrived; ending the session is up to the caller.
    Final {
        session_id: Option<String>,
    },
}

pub type RouterEventSender = mpsc::UnboundedSender<RouterEvent>;

/// Routes results to one [`TextSink`].
pub struct ResultRouter {
    sink: Arc<dyn TextSink>,
    session_filter: Option<String>,
    events: Option<RouterEventSender>,
}

impl ResultRouter {
    pub fn new(sink: Arc<dyn TextSink>) -> Self {
        Self {
            sink,
            session_filter: None,
            events: None,
        }
    }

    /// Only route results for `session_id` (results without an id still pass).
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_filter = Some(session_id.into());
        self
    }

    pub fn with_events(mut self, events: RouterEventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Decide what to do with `message` without side effects.
    pub fn classify(&self, message: &InboundMessage) -> Route {
        if let (Some(wanted), Some(got)) = (&self.session_filter, message.session_id()) {
            if wanted != got {
                return Route::Ignored;
            }
        }

        match message {
            InboundMessage::Pong => Route::Liveness,
            InboundMessage::Result {
                is_final,
                transcript,
                translation,
                ..
            } => {
                let text = translation
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .or(transcript.as_deref())
                    .unwrap_or_default();
                text_route(text, *is_final)
            }
            // Raw-mode transcriptions carry complete utterances.
            InboundMessage::Transcription { text } => {
                text_route(text.as_deref().unwrap_or_default(), true)
            }
            InboundMessage::Error { .. } => Route::Ignored,
        }
    }

    /// Classify `message`, deliver it if substantive, and report events.
    pub async fn route(&self, message: InboundMessage) -> Route {
        let route = self.classify(&message);
        let session_id = message.session_id().map(str::to_owned);
        if route == Route::Ignored {
            debug!(kind = message.kind(), session_id = ?session_id, "Result not routed");
            return route;
        }

        match &route {
            Route::Liveness => {
                debug!("Liveness signal received");
                self.emit(RouterEvent::Liveness { at: Utc::now() });
            }
            Route::Marker { text } => {
                debug!(session_id = ?session_id, marker = %text, "Suppressed non-substantive result");
                self.emit(RouterEvent::Marker {
                    session_id: session_id.clone(),
                    text: text.clone(),
                });
            }
            Route::Deliver { text, is_final } => {
                match self.sink.deliver(text, *is_final).await {
                    Ok(()) => {
                        self.emit(RouterEvent::Delivered {
                            session_id: session_id.clone(),
                            is_final: *is_final,
                        });
                    }
                    Err(e) => {
                        error!(sink = self.sink.id(), session_id = ?session_id, %e, "Failed to deliver text");
                    }
                }
            }
            Route::Ignored => {}
        }

        if message.is_final() {
            info!(session_id = ?session_id, "Final result received");
            self.emit(RouterEvent::Final { session_id });
        }
        route
    }

    /// Route every message of `results` until the stream ends.
    pub fn spawn<S>(self, mut results: S) -> JoinHandle<()>
    where
        S: Stream<Item = InboundMessage> + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            info!(sink = self.sink.id(), session = ?self.session_filter, "Result router started");
            while let Some(message) = results.next().await {
                self.route(message).await;
            }
            info!(sink = self.sink.id(), "Result router stopped");
        })
    }

    fn emit(&self, event: RouterEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn text_route(text: &str, is_final: bool) -> Route {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('[') {
        Route::Marker {
            text: trimmed.to_owned(),
        }
    } else {
        Route::Deliver {
            text: trimmed.to_owned(),
            is_final,
        }
    }
}
