//! Core types for EchoLens: wire protocol, session model, config, and errors.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
