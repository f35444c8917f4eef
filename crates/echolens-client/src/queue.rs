//! Outbound queue: bounded for audio, always accepting for control frames.
//!
//! Both kinds share one FIFO so the send loop writes them in enqueue order.
//! Only audio frames count against the capacity; when it is reached the
//! newest audio frame is refused and the producer moves on.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::transport::Frame;

/// Result of offering a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Audio capacity reached; the frame was discarded.
    Full,
    /// The send loop is gone; the frame was discarded.
    Closed,
}

struct Item {
    frame: Frame,
    audio: bool,
}

/// Producer half, owned by the connection record.
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Item>,
    pending_audio: Arc<AtomicUsize>,
    capacity: usize,
}

/// Consumer half, owned by the send loop.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<Item>,
    pending_audio: Arc<AtomicUsize>,
}

/// Create a queue holding at most `capacity` audio frames (at least one).
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::unbounded_channel();
    let pending_audio = Arc::new(AtomicUsize::new(0));
    (
        OutboundQueue {
            tx,
            pending_audio: pending_audio.clone(),
            capacity,
        },
        OutboundReceiver { rx, pending_audio },
    )
}

impl OutboundQueue {
    /// Offer an audio frame without waiting.
    pub fn push_audio(&self, frame: Frame) -> Enqueued {
        let capacity = self.capacity;
        let reserved = self
            .pending_audio
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            return Enqueued::Full;
        }

        if self.tx.send(Item { frame, audio: true }).is_err() {
            self.pending_audio.fetch_sub(1, Ordering::AcqRel);
            return Enqueued::Closed;
        }
        Enqueued::Queued
    }

    /// Enqueue a control frame; accepted whenever the queue is open.
    pub fn push_control(&self, frame: Frame) -> Enqueued {
        match self.tx.send(Item { frame, audio: false }) {
            Ok(()) => Enqueued::Queued,
            Err(_) => Enqueued::Closed,
        }
    }

    /// Audio frames waiting to be written.
    pub fn pending_audio(&self) -> usize {
        self.pending_audio.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl OutboundReceiver {
    /// Next frame in FIFO order; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        let item = self.rx.recv().await?;
        if item.audio {
            self.pending_audio.fetch_sub(1, Ordering::AcqRel);
        }
        Some(item.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(n: u8) -> Frame {
        Frame::Binary(vec![n])
    }

    #[tokio::test]
    async fn test_audio_drops_newest_when_full() {
        let (queue, mut rx) = outbound_queue(2);
        assert_eq!(queue.push_audio(audio(0)), Enqueued::Queued);
        assert_eq!(queue.push_audio(audio(1)), Enqueued::Queued);
        assert_eq!(queue.push_audio(audio(2)), Enqueued::Full);
        assert_eq!(queue.pending_audio(), 2);

        assert_eq!(rx.recv().await, Some(audio(0)));
        assert_eq!(queue.pending_audio(), 1);
        assert_eq!(queue.push_audio(audio(3)), Enqueued::Queued);

        assert_eq!(rx.recv().await, Some(audio(1)));
        assert_eq!(rx.recv().await, Some(audio(3)));
    }

    #[tokio::test]
    async fn test_zero_capacity_still_admits_one_frame() {
        let (queue, mut rx) = outbound_queue(0);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.push_audio(audio(0)), Enqueued::Queued);
        assert_eq!(queue.push_audio(audio(1)), Enqueued::Full);
        assert_eq!(rx.recv().await, Some(audio(0)));
    }

    #[tokio::test]
    async fn test_control_bypasses_capacity_and_keeps_order() {
        let (queue, mut rx) = outbound_queue(1);
        assert_eq!(queue.push_control(Frame::Text("start".into())), Enqueued::Queued);
        assert_eq!(queue.push_audio(audio(0)), Enqueued::Queued);
        assert_eq!(queue.push_audio(audio(1)), Enqueued::Full);
        assert_eq!(queue.push_control(Frame::Text("end".into())), Enqueued::Queued);

        assert_eq!(rx.recv().await, Some(Frame::Text("start".into())));
        assert_eq!(rx.recv().await, Some(audio(0)));
        assert_eq!(rx.recv().await, Some(Frame::Text("end".into())));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (queue, rx) = outbound_queue(4);
        drop(rx);
        assert!(queue.is_closed());
        assert_eq!(queue.push_audio(audio(0)), Enqueued::Closed);
        assert_eq!(queue.pending_audio(), 0);
        assert_eq!(queue.push_control(Frame::Text("end".into())), Enqueued::Closed);
    }

    #[tokio::test]
    async fn test_receiver_ends_when_producer_dropped() {
        let (queue, mut rx) = outbound_queue(4);
        queue.push_audio(audio(9));
        drop(queue);
        assert_eq!(rx.recv().await, Some(audio(9)));
        assert_eq!(rx.recv().await, None);
    }
}
