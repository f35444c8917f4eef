//! Result routing: turns the client's result stream into text for a sink.
//!
//! The [`ResultRouter`] drops liveness replies and bracketed markers, prefers
//! translations over transcripts, and hands substantive text to a
//! [`TextSink`] such as the console or a wireless display peripheral.

pub mod router;
pub mod sink;

pub use router::{ResultRouter, Route, RouterEvent, RouterEventSender};
pub use sink::{ConsoleSink, DEFAULT_PERIPHERAL_MTU, PeripheralSink, TextSink};
