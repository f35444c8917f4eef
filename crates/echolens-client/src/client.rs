//! Streaming session client.
//!
//! One [`SessionClient`] owns at most one connection at a time. Each
//! `connect()` builds a fresh connection record (queue, send loop, dispatch
//! task, transport sink); `close()` or a transport failure consumes it whole.
//!
//! Two tasks run per connection:
//! - the **send loop**, the only writer to the transport, draining the
//!   outbound queue in FIFO order;
//! - the **dispatch task**, the only reader of the transport's event channel,
//!   decoding inbound frames and publishing them to the result/error streams.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use echolens_core::config::Config;
use echolens_core::protocol::{
    AudioSpec, Decoded, InboundMessage, NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON, OutboundMessage,
    RawCommand, StreamMode, decode_inbound, encode_outbound, encode_raw_command,
};
use echolens_core::session::{ConnectionState, EndOutcome, Session, SessionState};

use crate::error::ClientError;
use crate::events::{
    CONNECT_TIMEOUT_MESSAGE, ErrorEvent, ErrorKind, ErrorStream, EventHub, ResultStream,
};
use crate::metrics::{ClientStats, Counters};
use crate::queue::{Enqueued, OutboundQueue, OutboundReceiver, outbound_queue};
use crate::transport::{EventReceiver, Frame, Transport, TransportEvent, TransportSink};

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub mode: StreamMode,
    /// Bound on waiting for the transport to open.
    pub connect_timeout: Duration,
    /// Audio frames buffered before the newest is dropped. Zero is raised to one.
    pub queue_capacity: usize,
    /// Bound on flushing the queue and the close handshake.
    pub close_grace: Duration,
    pub results_capacity: usize,
    pub errors_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: StreamMode::Session,
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 64,
            close_grace: Duration::from_secs(2),
            results_capacity: 64,
            errors_capacity: 16,
        }
    }
}

impl ClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.stream_mode(),
            connect_timeout: config.connect_timeout(),
            queue_capacity: config.queue_capacity(),
            close_grace: config.close_grace(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }
}

/// What happened to an audio chunk handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Queued,
    /// Discarded under backpressure (or with no connection); counted in stats.
    Dropped,
}

type SharedSink = Arc<AsyncMutex<Box<dyn TransportSink>>>;

/// Everything one connection owns. Built whole by `connect()`, consumed whole.
struct Connection {
    generation: u64,
    queue: OutboundQueue,
    sink: SharedSink,
    send_cancel: CancellationToken,
    send_task: JoinHandle<()>,
    transport_cancel: CancellationToken,
    dispatch: JoinHandle<()>,
}

impl Connection {
    /// Close the queue, let the send loop flush, attempt a graceful close, then
    /// force the transport to release its resources. Both waits share one
    /// deadline.
    async fn shutdown(self, grace: Duration) {
        let Self {
            generation,
            queue,
            sink,
            send_cancel,
            mut send_task,
            transport_cancel,
            dispatch,
        } = self;
        let deadline = tokio::time::Instant::now() + grace;

        drop(queue);
        if tokio::time::timeout_at(deadline, &mut send_task).await.is_err() {
            warn!(generation, "Send loop did not drain in time, stopping it");
            send_cancel.cancel();
        }

        let graceful = tokio::time::timeout_at(deadline, async {
            sink.lock()
                .await
                .close(NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON)
                .await
        })
        .await;
        match graceful {
            Ok(Ok(())) => debug!(generation, "Close handshake sent"),
            Ok(Err(e)) => debug!(generation, %e, "Graceful close failed"),
            Err(_) => warn!(generation, "Graceful close timed out"),
        }

        transport_cancel.cancel();
        send_cancel.cancel();
        dispatch.abort();
        debug!(generation, "Connection resources released");
    }

    /// Release after the transport already failed; no handshake is possible.
    fn release(self) {
        self.send_cancel.cancel();
        self.transport_cancel.cancel();
    }
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    connection: Option<Connection>,
    session: Option<Session>,
}

struct Shared {
    inner: Mutex<Inner>,
    hub: EventHub,
    counters: Counters,
}

/// How a connection loss should be reported.
enum Loss {
    /// The record was already consumed by close/connect; stay quiet.
    Expected,
    Unexpected { session_id: Option<String> },
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_open(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Open;
        }
    }

    /// The transport dropped underneath us: release the record and abort any
    /// live session.
    fn connection_lost(&self, generation: u64) -> Loss {
        let (connection, session_id) = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.connection.is_none() {
                return Loss::Expected;
            }
            inner.state = ConnectionState::Disconnected;
            let session_id = inner
                .session
                .as_mut()
                .and_then(|s| s.abort().then(|| s.id().to_owned()));
            (inner.connection.take(), session_id)
        };
        if let Some(connection) = connection {
            connection.release();
        }
        if let Some(id) = &session_id {
            warn!(session_id = %id, "Session aborted by connection loss");
        }
        Loss::Unexpected { session_id }
    }

    fn handle_text(&self, text: &str) {
        match decode_inbound(text) {
            Decoded::Message(InboundMessage::Error {
                session_id,
                message,
            }) => {
                self.hub
                    .publish_error(ErrorEvent::new(ErrorKind::Remote, message).with_session(session_id));
            }
            Decoded::Message(message) => self.hub.publish_result(message),
            Decoded::Unrecognized { reason } => {
                self.counters.record_decode_failure();
                warn!(%reason, payload = %preview(text), "Dropping unrecognized inbound message");
            }
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Duplex streaming client for the transcription service.
///
/// Cheap to clone; clones share the same connection and streams, so an audio
/// producer task can hold its own handle.
#[derive(Clone)]
pub struct SessionClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
}

impl SessionClient {
    pub fn new(transport: impl Transport, config: ClientConfig) -> Self {
        let hub = EventHub::new(config.results_capacity, config.errors_capacity);
        Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    connection: None,
                    session: None,
                }),
                hub,
                counters: Counters::default(),
            }),
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.config.mode
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// State of `session_id` if it is the client's current session.
    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.shared
            .lock()
            .session
            .as_ref()
            .filter(|s| s.id() == session_id)
            .map(Session::state)
    }

    /// Id of the Started/Streaming session, if any.
    pub fn live_session(&self) -> Option<String> {
        self.shared
            .lock()
            .session
            .as_ref()
            .filter(|s| s.state().is_live())
            .map(|s| s.id().to_owned())
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.counters.snapshot()
    }

    /// Inbound results (and pongs) from now on. No replay.
    pub fn results(&self) -> ResultStream {
        self.shared.hub.result_stream()
    }

    /// Asynchronous errors from now on. No replay.
    pub fn errors(&self) -> ErrorStream {
        self.shared.hub.error_stream()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<InboundMessage> {
        self.shared.hub.subscribe_results()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.shared.hub.subscribe_errors()
    }

    /// Open a fresh connection, tearing down any previous one first.
    ///
    /// Resolves `true` once the transport reports open, `false` on failure or
    /// after the connect timeout. Failures are reported on [`Self::errors`].
    pub async fn connect(&self) -> bool {
        let previous = self.shared.lock().connection.take();
        if let Some(previous) = previous {
            debug!(generation = previous.generation, "Tearing down previous connection");
            previous.shutdown(self.config.close_grace).await;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport_cancel = CancellationToken::new();
        let sink: SharedSink = Arc::new(AsyncMutex::new(
            self.transport.open(events_tx, transport_cancel.clone()),
        ));
        let (queue, outbound) = outbound_queue(self.config.queue_capacity);
        let send_cancel = CancellationToken::new();
        let (open_tx, open_rx) = oneshot::channel();

        let generation = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            let generation = inner.generation;
            inner.state = ConnectionState::Connecting;
            if let Some(session) = inner.session.as_mut() {
                if session.abort() {
                    warn!(session_id = %session.id(), "Session aborted by reconnect");
                }
            }

            let send_task = tokio::spawn(send_loop(
                outbound,
                sink.clone(),
                send_cancel.clone(),
                self.shared.clone(),
            ));
            let dispatch = tokio::spawn(dispatch_loop(
                events_rx,
                self.shared.clone(),
                open_tx,
                generation,
            ));
            inner.connection = Some(Connection {
                generation,
                queue,
                sink,
                send_cancel,
                send_task,
                transport_cancel,
                dispatch,
            });
            generation
        };

        match tokio::time::timeout(self.config.connect_timeout, open_rx).await {
            Ok(Ok(true)) => {
                info!(generation, mode = %self.config.mode, "Connected");
                true
            }
            Ok(_) => {
                debug!(generation, "Connection failed before opening");
                self.discard(generation).await;
                false
            }
            Err(_) => {
                warn!(
                    generation,
                    timeout_ms = self.config.connect_timeout.as_millis() as u64,
                    "Connection not established in time"
                );
                self.shared.hub.publish_error(ErrorEvent::new(
                    ErrorKind::ConnectionTimeout,
                    CONNECT_TIMEOUT_MESSAGE,
                ));
                self.discard(generation).await;
                false
            }
        }
    }

    /// Drop a connection attempt that never opened.
    async fn discard(&self, generation: u64) {
        let connection = {
            let mut inner = self.shared.lock();
            if inner.generation != generation {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            inner.connection.take()
        };
        if let Some(connection) = connection {
            connection.shutdown(self.config.close_grace).await;
        }
    }

    /// Announce a new session. No acknowledgment is awaited.
    pub fn start(
        &self,
        session_id: impl Into<String>,
        spec: AudioSpec,
        lang: impl Into<String>,
        translate_to: Option<String>,
    ) -> Result<(), ClientError> {
        self.require_mode(StreamMode::Session)?;
        let session_id = session_id.into();

        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        if inner.state != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let Some(connection) = inner.connection.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        if let Some(live) = inner.session.as_ref().filter(|s| s.state().is_live()) {
            return Err(ClientError::SessionAlreadyLive {
                live: live.id().to_owned(),
            });
        }

        let mut session = Session::new(session_id.clone());
        session.start()?;

        let lang = lang.into();
        let frame = encode(&OutboundMessage::Start {
            session_id: session_id.clone(),
            audio: spec,
            lang: lang.clone(),
            translate_to: translate_to.clone(),
        })?;
        if connection.queue.push_control(frame) == Enqueued::Closed {
            return Err(ClientError::NotConnected);
        }

        inner.session = Some(session);
        info!(session_id = %session_id, %lang, translate_to = ?translate_to, "Session started");
        Ok(())
    }

    /// Enqueue an audio chunk with a caller-chosen sequence number.
    ///
    /// Never waits. A full queue drops this chunk and reports
    /// [`ChunkOutcome::Dropped`]; only caller mistakes are errors.
    pub fn send_chunk(
        &self,
        session_id: &str,
        seq: u64,
        bytes: Vec<u8>,
    ) -> Result<ChunkOutcome, ClientError> {
        self.enqueue_audio(session_id, Some(seq), bytes)
    }

    /// Enqueue an audio chunk numbered by the client.
    pub fn send_audio(&self, session_id: &str, bytes: Vec<u8>) -> Result<ChunkOutcome, ClientError> {
        self.enqueue_audio(session_id, None, bytes)
    }

    fn enqueue_audio(
        &self,
        session_id: &str,
        seq: Option<u64>,
        bytes: Vec<u8>,
    ) -> Result<ChunkOutcome, ClientError> {
        self.require_mode(StreamMode::Session)?;

        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let session = inner
            .session
            .as_mut()
            .filter(|s| s.id() == session_id)
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_owned()))?;
        let Some(connection) = inner.connection.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        let seq = session.claim_seq(seq)?;

        let len = bytes.len();
        let frame = encode(&OutboundMessage::Audio {
            session_id: session_id.to_owned(),
            seq,
            data: bytes,
        })?;
        Ok(self.offer_audio(&connection.queue, frame, Some(seq), len))
    }

    /// Enqueue a raw binary PCM frame (raw mode). Never fails.
    pub fn send_raw(&self, bytes: Vec<u8>) -> ChunkOutcome {
        if self.config.mode != StreamMode::Raw {
            warn!(mode = %self.config.mode, "send_raw outside raw mode, dropping frame");
            self.shared.counters.record_dropped();
            return ChunkOutcome::Dropped;
        }

        let guard = self.shared.lock();
        let Some(connection) = guard.connection.as_ref() else {
            debug!(bytes = bytes.len(), "Not connected, dropping raw frame");
            self.shared.counters.record_dropped();
            return ChunkOutcome::Dropped;
        };
        let len = bytes.len();
        self.offer_audio(&connection.queue, Frame::Binary(bytes), None, len)
    }

    fn offer_audio(&self, queue: &OutboundQueue, frame: Frame, seq: Option<u64>, len: usize) -> ChunkOutcome {
        match queue.push_audio(frame) {
            Enqueued::Queued => {
                self.shared.counters.record_enqueued();
                trace!(seq = ?seq, bytes = len, "Chunk queued");
                ChunkOutcome::Queued
            }
            Enqueued::Full => {
                self.shared.counters.record_dropped();
                debug!(seq = ?seq, bytes = len, capacity = queue.capacity(), "Outbound queue full, dropping newest chunk");
                ChunkOutcome::Dropped
            }
            Enqueued::Closed => {
                self.shared.counters.record_dropped();
                debug!(seq = ?seq, bytes = len, "Outbound queue closed, dropping chunk");
                ChunkOutcome::Dropped
            }
        }
    }

    /// Send a liveness probe (raw mode). The reply arrives as a pong result.
    pub fn ping(&self) -> Result<(), ClientError> {
        self.require_mode(StreamMode::Raw)?;
        let guard = self.shared.lock();
        let Some(connection) = guard.connection.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        let text = encode_raw_command(RawCommand::Ping)
            .map_err(|e| ClientError::Encode(e.to_string()))?;
        match connection.queue.push_control(Frame::Text(text)) {
            Enqueued::Queued => Ok(()),
            Enqueued::Full | Enqueued::Closed => Err(ClientError::NotConnected),
        }
    }

    /// Finish a session. Calling it again once Ended is a no-op.
    pub fn end(&self, session_id: &str) -> Result<(), ClientError> {
        self.require_mode(StreamMode::Session)?;

        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let session = inner
            .session
            .as_mut()
            .filter(|s| s.id() == session_id)
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_owned()))?;

        if session.end()? == EndOutcome::AlreadyEnded {
            debug!(session_id, "Session already ended");
            return Ok(());
        }

        let frame = encode(&OutboundMessage::End {
            session_id: session_id.to_owned(),
        })?;
        let queued = inner
            .connection
            .as_ref()
            .is_some_and(|c| c.queue.push_control(frame) == Enqueued::Queued);
        if queued {
            info!(session_id, "Session ended");
        } else {
            warn!(session_id, "Session ended locally; End could not be queued");
        }
        Ok(())
    }

    /// Close the connection. Never fails; safe to call repeatedly and from
    /// any state. A live session becomes Aborted.
    pub async fn close(&self) {
        let connection = {
            let mut inner = self.shared.lock();
            if let Some(session) = inner.session.as_mut() {
                if session.abort() {
                    info!(session_id = %session.id(), "Session aborted by close");
                }
            }
            match inner.connection.take() {
                Some(connection) => {
                    inner.state = ConnectionState::Closing;
                    Some(connection)
                }
                None => {
                    inner.state = ConnectionState::Disconnected;
                    None
                }
            }
        };

        let Some(connection) = connection else {
            debug!("close() without a connection");
            return;
        };

        let generation = connection.generation;
        info!(generation, "Closing connection");
        connection.shutdown(self.config.close_grace).await;

        let mut inner = self.shared.lock();
        if inner.generation == generation && inner.connection.is_none() {
            inner.state = ConnectionState::Disconnected;
        }
    }

    fn require_mode(&self, expected: StreamMode) -> Result<(), ClientError> {
        if self.config.mode == expected {
            Ok(())
        } else {
            Err(ClientError::WrongMode {
                expected,
                actual: self.config.mode,
            })
        }
    }
}

fn encode(message: &OutboundMessage) -> Result<Frame, ClientError> {
    encode_outbound(message)
        .map(Frame::Text)
        .map_err(|e| ClientError::Encode(e.to_string()))
}

/// Sole writer: drain the queue in order until it closes or is cancelled.
async fn send_loop(
    mut outbound: OutboundReceiver,
    sink: SharedSink,
    cancel: CancellationToken,
    shared: Arc<Shared>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let bytes = frame.len();
        let result = sink.lock().await.send(frame).await;
        match result {
            Ok(()) => {
                shared.counters.record_written();
                trace!(bytes, "Frame written");
            }
            Err(e) => {
                shared.counters.record_write_failure();
                warn!(%e, bytes, "Failed to write frame");
            }
        }
    }
    debug!("Send loop stopped");
}

/// Sole reader of the transport's events for one connection.
async fn dispatch_loop(
    mut events: EventReceiver,
    shared: Arc<Shared>,
    open_tx: oneshot::Sender<bool>,
    generation: u64,
) {
    let mut open_tx = Some(open_tx);

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Open => {
                shared.mark_open(generation);
                if let Some(tx) = open_tx.take() {
                    let _ = tx.send(true);
                }
            }
            TransportEvent::Text(text) => shared.handle_text(&text),
            TransportEvent::Binary(bytes) => {
                debug!(bytes = bytes.len(), "Ignoring inbound binary frame");
            }
            TransportEvent::Closed { code, reason } => {
                info!(generation, code, %reason, "Connection closed by peer");
                if let Loss::Unexpected { session_id } = shared.connection_lost(generation) {
                    let message = if reason.is_empty() {
                        format!("Connection closed by peer (code {code})")
                    } else {
                        format!("Connection closed by peer (code {code}: {reason})")
                    };
                    shared.hub.publish_error(
                        ErrorEvent::new(ErrorKind::ClosedByPeer, message).with_session(session_id),
                    );
                }
                if let Some(tx) = open_tx.take() {
                    let _ = tx.send(false);
                }
                break;
            }
            TransportEvent::Failure(reason) => {
                warn!(generation, %reason, "Transport failure");
                if let Loss::Unexpected { session_id } = shared.connection_lost(generation) {
                    shared.hub.publish_error(
                        ErrorEvent::new(ErrorKind::TransportFailure, reason).with_session(session_id),
                    );
                }
                if let Some(tx) = open_tx.take() {
                    let _ = tx.send(false);
                }
                break;
            }
        }
    }
    debug!(generation, "Dispatch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "ñ".repeat(200);
        assert_eq!(preview(&long).chars().count(), 120);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_config_from_file_config() {
        let config: Config = serde_json::from_str(
            r#"{ "service": { "url": "ws://x", "mode": "raw", "connectTimeoutMs": 2500, "queueCapacity": 8 } }"#,
        )
        .unwrap();
        let client_config = ClientConfig::from_config(&config);
        assert_eq!(client_config.mode, StreamMode::Raw);
        assert_eq!(client_config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(client_config.queue_capacity, 8);
        assert_eq!(client_config.results_capacity, 64);
    }

    #[test]
    fn test_zero_queue_capacity_is_raised() {
        assert_eq!(ClientConfig::default().with_queue_capacity(0).queue_capacity, 1);
    }
}
