//! End-to-end tests against a real WebSocket server on localhost.
//!
//! Run with: `cargo test -p echolens-client --test websocket`

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use echolens_client::{ClientConfig, ErrorKind, SessionClient, WebSocketTransport};
use echolens_core::protocol::{AudioSpec, InboundMessage};
use echolens_core::session::ConnectionState;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/audio", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one client, answer every audio message with a final result, and
/// return what was received plus the client's close frame.
async fn echo_server(listener: TcpListener) -> anyhow::Result<(Vec<Value>, Option<CloseFrame>)> {
    let (stream, _) = listener.accept().await?;
    let mut ws = accept_async(stream).await?;
    let mut seen = Vec::new();

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text)?;
                if value["type"] == "audio" {
                    let reply = serde_json::json!({
                        "type": "result",
                        "sessionId": value["sessionId"],
                        "seq": value["seq"],
                        "isFinal": true,
                        "transcript": "hola",
                    });
                    ws.send(Message::Text(reply.to_string().into())).await?;
                }
                seen.push(value);
            }
            Message::Close(frame) => return Ok((seen, frame)),
            _ => {}
        }
    }
    Ok((seen, None))
}

#[tokio::test]
async fn test_session_over_websocket() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(echo_server(listener));

    let client = SessionClient::new(WebSocketTransport::new(url), ClientConfig::default());
    let mut results = client.subscribe_results();
    assert!(client.connect().await);

    client.start("s1", AudioSpec::default(), "es", None).unwrap();
    client.send_chunk("s1", 0, vec![0; 640]).unwrap();

    let result = timeout(Duration::from_secs(5), results.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_final());
    assert_eq!(result.session_id(), Some("s1"));
    match result {
        InboundMessage::Result { transcript, .. } => assert_eq!(transcript.as_deref(), Some("hola")),
        other => panic!("unexpected {other:?}"),
    }

    client.end("s1").unwrap();
    client.close().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let (seen, close) = timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let types: Vec<&str> = seen.iter().filter_map(|v| v["type"].as_str()).collect();
    assert_eq!(types, vec!["start", "audio", "end"]);
    assert_eq!(seen[1]["seq"], 0);

    let close = close.expect("client sent a close frame");
    assert_eq!(u16::from(close.code), 1000);
    assert_eq!(close.reason.as_str(), "bye");
}

#[tokio::test]
async fn test_refused_connection_fails_fast() {
    let (listener, url) = bind().await;
    drop(listener);

    let transport = WebSocketTransport::new(url.clone());
    assert_eq!(transport.url(), url);
    let client = SessionClient::new(transport, ClientConfig::default());
    let mut errors = client.subscribe_errors();

    assert!(!client.connect().await);
    let event = timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, ErrorKind::TransportFailure);
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let (listener, url) = bind().await;
    // Accept TCP but never answer the handshake.
    let holder = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let config = ClientConfig::default().with_connect_timeout(Duration::from_millis(200));
    let client = SessionClient::new(WebSocketTransport::new(url), config);
    let mut errors = client.subscribe_errors();

    assert!(!client.connect().await);
    let event = errors.recv().await.unwrap();
    assert_eq!(event.kind, ErrorKind::ConnectionTimeout);
    holder.abort();
}

#[tokio::test]
async fn test_server_close_surfaces_as_error() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Wait for the start message, then hang up.
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    });

    let client = SessionClient::new(WebSocketTransport::new(url), ClientConfig::default());
    let mut errors = client.subscribe_errors();
    assert!(client.connect().await);
    client.start("s1", AudioSpec::default(), "es", None).unwrap();

    let event = timeout(Duration::from_secs(5), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, ErrorKind::ClosedByPeer);
    assert_eq!(event.session_id.as_deref(), Some("s1"));
}
