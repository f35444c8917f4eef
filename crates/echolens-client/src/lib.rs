//! Duplex streaming client for the EchoLens transcription service.
//!
//! The client holds one WebSocket connection, announces sessions, streams
//! audio with drop-newest backpressure, and demultiplexes inbound results
//! and errors onto broadcast streams.
//!
//! ```no_run
//! # async fn demo() {
//! use echolens_client::{ClientConfig, SessionClient, WebSocketTransport};
//! use echolens_core::protocol::AudioSpec;
//!
//! let client = SessionClient::new(
//!     WebSocketTransport::new("wss://stt.example.com/ws/audio"),
//!     ClientConfig::default(),
//! );
//! if client.connect().await {
//!     client.start("s1", AudioSpec::default(), "es", None).ok();
//!     client.send_chunk("s1", 0, vec![0; 3200]).ok();
//!     client.end("s1").ok();
//! }
//! client.close().await;
//! # }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod transport;
pub mod websocket;

pub use client::{ChunkOutcome, ClientConfig, SessionClient};
pub use error::{ClientError, TransportError};
pub use events::{ErrorEvent, ErrorKind, ErrorStream, ResultStream};
pub use metrics::ClientStats;
pub use transport::{Frame, Transport, TransportEvent, TransportSink};
pub use websocket::WebSocketTransport;
