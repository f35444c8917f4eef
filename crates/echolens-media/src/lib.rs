//! Audio input for the streaming client.
//!
//! [`source`] turns any byte reader (a file, stdin, a peripheral's audio
//! pipe) into PCM frames, optionally paced like a live microphone;
//! [`pump`] forwards those frames to a [`echolens_client::SessionClient`].

pub mod pump;
pub mod source;

pub use pump::{AudioPump, PumpReport, StopReason};
pub use source::{FrameStream, paced, pcm_frames};
