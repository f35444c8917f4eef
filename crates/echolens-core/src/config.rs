//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{AudioSpec, StreamMode};

/// Default bound on waiting for the transport to open.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default outbound audio queue capacity (frames).
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default size of one captured audio frame.
pub const DEFAULT_FRAME_BYTES: usize = 4096;

/// Top-level EchoLens configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Remote transcription service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// WebSocket endpoint, e.g. `wss://host/ws/audio`.
    pub url: String,

    #[serde(default)]
    pub mode: StreamMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    /// Outbound audio frames buffered before the newest is dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// How long a graceful close may take before resources are forced free.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_grace_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout_ms: Option<u64>,
}

/// Defaults for sessions started by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub translate_to: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSpec>,
}

/// Audio source framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,

    /// Release file frames at capture cadence instead of as fast as possible.
    #[serde(default = "default_true")]
    pub realtime: bool,
}

fn default_frame_bytes() -> usize {
    DEFAULT_FRAME_BYTES
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "echolens_client=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::EchoLensError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::EchoLensError::Config(e.to_string()))?;

        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Service URL, if one is configured.
    pub fn service_url(&self) -> Option<&str> {
        self.service
            .as_ref()
            .map(|s| s.url.as_str())
            .filter(|u| !u.is_empty())
    }

    pub fn stream_mode(&self) -> StreamMode {
        self.service.as_ref().map(|s| s.mode).unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(
            self.service
                .as_ref()
                .and_then(|s| s.connect_timeout_ms)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        )
    }

    pub fn queue_capacity(&self) -> usize {
        self.service
            .as_ref()
            .and_then(|s| s.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(
            self.service
                .as_ref()
                .and_then(|s| s.close_grace_ms)
                .unwrap_or(2_000),
        )
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(
            self.service
                .as_ref()
                .and_then(|s| s.write_timeout_ms)
                .unwrap_or(5_000),
        )
    }

    pub fn lang(&self) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.lang.clone())
            .unwrap_or_else(|| "es".to_string())
    }

    pub fn translate_to(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.translate_to.clone())
    }

    pub fn audio_spec(&self) -> AudioSpec {
        self.session
            .as_ref()
            .and_then(|s| s.audio.clone())
            .unwrap_or_default()
    }

    pub fn frame_bytes(&self) -> usize {
        self.capture
            .as_ref()
            .map(|c| c.frame_bytes)
            .unwrap_or(DEFAULT_FRAME_BYTES)
    }

    pub fn realtime_capture(&self) -> bool {
        self.capture.as_ref().map(|c| c.realtime).unwrap_or(true)
    }

    /// Get a config value by dotted path (e.g. "service.url", "session.lang").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        match self.service.as_ref() {
            None => warnings.push("No service configured".to_string()),
            Some(service) => {
                if service.url.is_empty() {
                    errors.push("Service URL cannot be empty".to_string());
                } else if !service.url.starts_with("ws://") && !service.url.starts_with("wss://") {
                    errors.push(format!(
                        "Service URL must use ws:// or wss://: {}",
                        service.url
                    ));
                } else if service.url.starts_with("ws://") {
                    warnings.push("Service URL is not encrypted (ws://)".to_string());
                }

                if service.queue_capacity == Some(0) {
                    errors.push("Queue capacity cannot be 0".to_string());
                }
                if service.connect_timeout_ms == Some(0) {
                    errors.push("Connect timeout cannot be 0".to_string());
                }
            }
        }

        if self.capture.as_ref().is_some_and(|c| c.frame_bytes == 0) {
            errors.push("Capture frame size cannot be 0".to_string());
        }

        let audio = self.audio_spec();
        if audio.sample_rate == 0 || audio.channels == 0 {
            errors.push("Audio sample rate and channel count must be non-zero".to_string());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for EchoLens data: `~/.echolens/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".echolens")
}
