//! In-memory transport that records everything the client writes.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use echolens_client::error::TransportError;
use echolens_client::transport::EventSender;
use echolens_client::{Frame, Transport, TransportEvent, TransportSink};

/// How a fake connection attempt behaves.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    Immediate,
    Never,
    Fail(String),
}

#[derive(Default)]
struct WireLog {
    frames: Vec<Frame>,
    closes: Vec<(u16, String)>,
    events: Option<EventSender>,
    cancel: Option<CancellationToken>,
    opens: usize,
}

/// Shared view of what crossed the fake wire.
#[derive(Clone, Default)]
pub struct Wire {
    log: Arc<Mutex<WireLog>>,
}

impl Wire {
    pub fn frames(&self) -> Vec<Frame> {
        self.log.lock().unwrap().frames.clone()
    }

    /// Text frames parsed as JSON.
    pub fn json(&self) -> Vec<serde_json::Value> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(serde_json::from_str(&t).unwrap()),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    /// `type` of every text frame, in write order.
    pub fn types(&self) -> Vec<String> {
        self.json()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.log.lock().unwrap().closes.clone()
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }

    /// Whether the latest connection's resources were released.
    pub fn released(&self) -> bool {
        self.log
            .lock()
            .unwrap()
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Deliver an event as if the latest connection observed it.
    pub fn inject(&self, event: TransportEvent) {
        let log = self.log.lock().unwrap();
        log.events
            .as_ref()
            .expect("no connection opened yet")
            .send(event)
            .expect("dispatch task gone");
    }

    pub fn inject_text(&self, text: &str) {
        self.inject(TransportEvent::Text(text.to_owned()));
    }
}

pub struct CapturingTransport {
    wire: Wire,
    behavior: OpenBehavior,
    write_delay: Option<Duration>,
}

impl CapturingTransport {
    pub fn new(behavior: OpenBehavior) -> (Self, Wire) {
        let wire = Wire::default();
        (
            Self {
                wire: wire.clone(),
                behavior,
                write_delay: None,
            },
            wire,
        )
    }

    /// Every write takes `delay`, simulating a slow network.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }
}

impl Transport for CapturingTransport {
    fn open(&self, events: EventSender, cancel: CancellationToken) -> Box<dyn TransportSink> {
        {
            let mut log = self.wire.log.lock().unwrap();
            log.opens += 1;
            log.events = Some(events.clone());
            log.cancel = Some(cancel);
        }
        match &self.behavior {
            OpenBehavior::Immediate => {
                let _ = events.send(TransportEvent::Open);
            }
            OpenBehavior::Never => {}
            OpenBehavior::Fail(reason) => {
                let _ = events.send(TransportEvent::Failure(reason.clone()));
            }
        }
        Box::new(CapturingSink {
            wire: self.wire.clone(),
            write_delay: self.write_delay,
        })
    }
}

struct CapturingSink {
    wire: Wire,
    write_delay: Option<Duration>,
}

#[async_trait]
impl TransportSink for CapturingSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.wire.log.lock().unwrap().frames.push(frame);
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.wire
            .log
            .lock()
            .unwrap()
            .closes
            .push((code, reason.to_owned()));
        Ok(())
    }
}
