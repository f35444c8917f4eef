//! EchoLens streaming wire protocol.
//!
//! The transcription service speaks JSON text frames over a WebSocket. Two
//! shapes exist and a deployment picks exactly one of them:
//!
//! - **session** mode: explicit `start` / `audio` / `end` control messages,
//!   audio embedded as base64 text, `result` and `error` replies.
//! - **raw** mode: unframed binary PCM frames, a `ping` command, and `pong` /
//!   `transcription` replies.
//!
//! Encoding and decoding are pure. Decoding never fails: anything that does
//! not match a known shape comes back as [`Decoded::Unrecognized`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Close code sent on a normal shutdown.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close reason sent on a normal shutdown.
pub const NORMAL_CLOSE_REASON: &str = "bye";

/// Sample rate of raw-mode PCM frames.
pub const RAW_SAMPLE_RATE: u32 = 16_000;

/// Which protocol shape a deployment speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Start/audio/end control messages with base64 audio.
    #[default]
    Session,
    /// Unframed binary PCM with ping/pong liveness.
    Raw,
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Raw => f.write_str("raw"),
        }
    }
}

impl std::str::FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown stream mode '{other}' (expected session or raw)")),
        }
    }
}

/// Describes the audio byte stream that follows a `start` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSpec {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub mime_type: String,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            encoding: "pcm16le".into(),
            sample_rate: RAW_SAMPLE_RATE,
            channels: 1,
            mime_type: "audio/raw".into(),
        }
    }
}

impl AudioSpec {
    /// Bytes per sample frame (all channels). Non-PCM encodings are treated as 16-bit.
    pub fn bytes_per_frame(&self) -> u32 {
        let sample_bytes = match self.encoding.as_str() {
            "pcm8" | "pcm_u8" => 1,
            "pcm32le" | "f32le" => 4,
            _ => 2,
        };
        sample_bytes * u32::from(self.channels.max(1))
    }

    /// Playback duration of `len` bytes of this audio.
    pub fn duration_of(&self, len: usize) -> Duration {
        let bytes_per_second = u64::from(self.bytes_per_frame()) * u64::from(self.sample_rate);
        if bytes_per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(len as u64 * 1_000_000 / bytes_per_second)
    }
}

/// Session-mode messages sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    Start {
        session_id: String,
        audio: AudioSpec,
        lang: String,
        translate_to: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Audio {
        session_id: String,
        seq: u64,
        #[serde(rename = "dataB64", with = "base64_bytes")]
        data: Vec<u8>,
    },

    #[serde(rename_all = "camelCase")]
    End { session_id: String },
}

/// Raw-mode control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum RawCommand {
    Ping,
}

/// Messages received from the service, in either mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    Result {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        seq: Option<u64>,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        translation: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        session_id: Option<String>,
        message: String,
    },

    /// Raw-mode liveness reply.
    Pong,

    /// Raw-mode transcription text.
    Transcription {
        #[serde(default)]
        text: Option<String>,
    },
}

impl InboundMessage {
    /// Wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
            Self::Transcription { .. } => "transcription",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Result { session_id, .. } | Self::Error { session_id, .. } => {
                session_id.as_deref()
            }
            Self::Pong | Self::Transcription { .. } => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Result { is_final: true, .. })
    }
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(InboundMessage),
    Unrecognized { reason: String },
}

/// Decode an inbound text frame, keyed on its `type` discriminator.
pub fn decode_inbound(text: &str) -> Decoded {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(message) => Decoded::Message(message),
        Err(e) => Decoded::Unrecognized {
            reason: e.to_string(),
        },
    }
}

/// Encode a session-mode message as a JSON text frame.
pub fn encode_outbound(message: &OutboundMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Encode a raw-mode command as a JSON text frame.
pub fn encode_raw_command(command: RawCommand) -> Result<String> {
    Ok(serde_json::to_string(&command)?)
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_value(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_start_wire_shape() {
        let msg = OutboundMessage::Start {
            session_id: "s1".into(),
            audio: AudioSpec::default(),
            lang: "es".into(),
            translate_to: None,
        };
        let encoded = encode_outbound(&msg).unwrap();
        assert_eq!(
            as_value(&encoded),
            json!({
                "type": "start",
                "sessionId": "s1",
                "audio": {
                    "encoding": "pcm16le",
                    "sampleRate": 16000,
                    "channels": 1,
                    "mimeType": "audio/raw"
                },
                "lang": "es",
                "translateTo": null
            })
        );
    }

    #[test]
    fn test_audio_wire_shape_uses_base64() {
        let msg = OutboundMessage::Audio {
            session_id: "s1".into(),
            seq: 7,
            data: vec![1, 2, 3, 4],
        };
        let encoded = encode_outbound(&msg).unwrap();
        assert_eq!(
            as_value(&encoded),
            json!({"type": "audio", "sessionId": "s1", "seq": 7, "dataB64": "AQIDBA=="})
        );

        let back: OutboundMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_end_and_ping_wire_shapes() {
        let end = encode_outbound(&OutboundMessage::End {
            session_id: "s1".into(),
        })
        .unwrap();
        assert_eq!(as_value(&end), json!({"type": "end", "sessionId": "s1"}));

        let ping = encode_raw_command(RawCommand::Ping).unwrap();
        assert_eq!(as_value(&ping), json!({"command": "ping"}));
    }

    #[test]
    fn test_decode_final_result_without_session() {
        let decoded = decode_inbound(r#"{"type":"result","isFinal":true,"transcript":"hola"}"#);
        assert_eq!(
            decoded,
            Decoded::Message(InboundMessage::Result {
                session_id: None,
                seq: None,
                is_final: true,
                transcript: Some("hola".into()),
                translation: None,
            })
        );
    }

    #[test]
    fn test_decode_full_result() {
        let decoded = decode_inbound(
            r#"{"type":"result","sessionId":"s1","seq":null,"isFinal":false,"transcript":"hola","translation":"hello"}"#,
        );
        let Decoded::Message(msg) = decoded else {
            panic!("expected a message");
        };
        assert_eq!(msg.session_id(), Some("s1"));
        assert!(!msg.is_final());
        assert_eq!(msg.kind(), "result");
    }

    #[test]
    fn test_decode_error_pong_and_transcription() {
        assert_eq!(
            decode_inbound(r#"{"type":"error","sessionId":null,"message":"bad audio"}"#),
            Decoded::Message(InboundMessage::Error {
                session_id: None,
                message: "bad audio".into(),
            })
        );
        assert_eq!(
            decode_inbound(r#"{"type":"pong"}"#),
            Decoded::Message(InboundMessage::Pong)
        );
        assert_eq!(
            decode_inbound(r#"{"type":"transcription","text":"[silence]"}"#),
            Decoded::Message(InboundMessage::Transcription {
                text: Some("[silence]".into()),
            })
        );
    }

    #[test]
    fn test_decode_is_tolerant() {
        for bad in [
            "not json at all",
            "{}",
            r#"{"type":"mystery"}"#,
            r#"{"type":"error"}"#,
            r#"{"type":"result","isFinal":"yes"}"#,
            "[1,2,3]",
        ] {
            assert!(
                matches!(decode_inbound(bad), Decoded::Unrecognized { .. }),
                "expected unrecognized for {bad}"
            );
        }
    }

    #[test]
    fn test_stream_mode_parse() {
        assert_eq!("raw".parse::<StreamMode>().unwrap(), StreamMode::Raw);
        assert_eq!("Session".parse::<StreamMode>().unwrap(), StreamMode::Session);
        assert!("binary".parse::<StreamMode>().is_err());
        assert_eq!(StreamMode::default().to_string(), "session");
    }

    #[test]
    fn test_audio_spec_duration() {
        let spec = AudioSpec::default();
        // 16 kHz mono 16-bit: 32000 bytes per second
        assert_eq!(spec.duration_of(32_000), Duration::from_secs(1));
        assert_eq!(spec.duration_of(4096), Duration::from_millis(128));
    }
}
