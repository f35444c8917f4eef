//! WebSocket transport backed by tokio-tungstenite.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{EventSender, Frame, Transport, TransportEvent, TransportSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WriterSlot = Arc<Mutex<Option<WsWriter>>>;

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Opens `ws://` / `wss://` connections to the transcription service.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    write_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            write_timeout: Duration::from_secs(5),
        }
    }

    /// Bound on a single frame write; a stuck write fails instead of hanging.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, events: EventSender, cancel: CancellationToken) -> Box<dyn TransportSink> {
        let writer: WriterSlot = Arc::new(Mutex::new(None));
        tokio::spawn(run_connection(
            self.url.clone(),
            writer.clone(),
            events,
            cancel,
        ));
        Box::new(WebSocketSink {
            writer,
            write_timeout: self.write_timeout,
        })
    }
}

/// Connect, then pump inbound frames into the event channel until the
/// connection ends or is cancelled.
async fn run_connection(
    url: String,
    writer: WriterSlot,
    events: EventSender,
    cancel: CancellationToken,
) {
    info!(url = %url, "Connecting to transcription service");

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(url = %url, "Connection attempt cancelled");
            return;
        }
        result = connect_async(url.as_str()) => result,
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(url = %url, %e, "WebSocket connect failed");
            let _ = events.send(TransportEvent::Failure(e.to_string()));
            return;
        }
    };

    let (ws_tx, ws_rx) = ws.split();
    *writer.lock().await = Some(ws_tx);
    info!(url = %url, "WebSocket open");
    let _ = events.send(TransportEvent::Open);

    read_loop(ws_rx, &events, &cancel).await;

    // Dropping both halves releases the socket.
    writer.lock().await.take();
    debug!(url = %url, "WebSocket resources released");
}

async fn read_loop(
    mut ws_rx: SplitStream<WsStream>,
    events: &EventSender,
    cancel: &CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = ws_rx.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                let _ = events.send(TransportEvent::Text(text.as_str().to_owned()));
            }
            Some(Ok(Message::Binary(bytes))) => {
                let _ = events.send(TransportEvent::Binary(bytes.to_vec()));
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((ABNORMAL_CLOSE_CODE, String::new()));
                debug!(code, %reason, "Peer closed WebSocket");
                let _ = events.send(TransportEvent::Closed { code, reason });
                break;
            }
            Some(Ok(_)) => {
                // tungstenite answers pings itself
            }
            Some(Err(e)) => {
                warn!(%e, "WebSocket error");
                let _ = events.send(TransportEvent::Failure(e.to_string()));
                break;
            }
            None => {
                let _ = events.send(TransportEvent::Closed {
                    code: ABNORMAL_CLOSE_CODE,
                    reason: "stream ended".into(),
                });
                break;
            }
        }
    }
}

struct WebSocketSink {
    writer: WriterSlot,
    write_timeout: Duration,
}

impl WebSocketSink {
    async fn write(&self, message: Message) -> Result<(), TransportError> {
        let mut slot = self.writer.lock().await;
        let writer = slot.as_mut().ok_or(TransportError::NotOpen)?;
        match tokio::time::timeout(self.write_timeout, writer.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.write(message).await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.write(Message::Close(Some(frame))).await
    }
}
