//! Router task fed from a result stream, delivering to a peripheral link.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use echolens_core::protocol::InboundMessage;
use echolens_router::{PeripheralSink, ResultRouter, RouterEvent};

fn parse(json: &str) -> InboundMessage {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn test_pong_is_liveness_not_text() {
    let (link, mut peer) = tokio::io::duplex(256);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let router = ResultRouter::new(Arc::new(PeripheralSink::new(link))).with_events(events_tx);

    let results = futures::stream::iter(vec![
        parse(r#"{"type":"pong"}"#),
        parse(r#"{"type":"transcription","text":"buenos días"}"#),
        parse(r#"{"type":"transcription","text":"[inaudible]"}"#),
    ])
    .boxed();
    router.spawn(results).await.unwrap();

    assert!(matches!(events.recv().await, Some(RouterEvent::Liveness { .. })));
    assert_eq!(
        events.recv().await,
        Some(RouterEvent::Delivered {
            session_id: None,
            is_final: true
        })
    );
    assert!(matches!(events.recv().await, Some(RouterEvent::Marker { .. })));
    assert_eq!(events.recv().await, None);

    // The router (and its sink) are gone, so the link is closed.
    let mut written = String::new();
    tokio::time::timeout(Duration::from_secs(1), peer.read_to_string(&mut written))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(written, "buenos días\n");
}

#[tokio::test]
async fn test_session_filter_on_stream() {
    let (link, mut peer) = tokio::io::duplex(256);
    let router = ResultRouter::new(Arc::new(PeripheralSink::new(link))).with_session("s1");

    let results = futures::stream::iter(vec![
        parse(r#"{"type":"result","sessionId":"s0","isFinal":true,"transcript":"stale"}"#),
        parse(r#"{"type":"result","sessionId":"s1","isFinal":false,"transcript":"ho"}"#),
        parse(r#"{"type":"result","sessionId":"s1","isFinal":true,"transcript":"hola","translation":"hello"}"#),
    ])
    .boxed();
    router.spawn(results).await.unwrap();

    let mut written = String::new();
    peer.read_to_string(&mut written).await.unwrap();
    assert_eq!(written, "hohello\n");
}
