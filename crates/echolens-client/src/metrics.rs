//! Client counters, mirrored into the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub chunks_enqueued: u64,
    pub chunks_dropped: u64,
    pub frames_written: u64,
    pub write_failures: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    chunks_enqueued: AtomicU64,
    chunks_dropped: AtomicU64,
    frames_written: AtomicU64,
    write_failures: AtomicU64,
    decode_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn record_enqueued(&self) {
        self.chunks_enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("echolens_chunks_enqueued_total").increment(1);
    }

    pub(crate) fn record_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("echolens_chunks_dropped_total").increment(1);
    }

    pub(crate) fn record_written(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("echolens_frames_written_total").increment(1);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("echolens_errors_total", "kind" => "write").increment(1);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("echolens_errors_total", "kind" => "decode").increment(1);
    }

    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            chunks_enqueued: self.chunks_enqueued.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}
