//! Configuration module for the bridge server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use verso_bridge::config::BridgeConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = BridgeConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = BridgeConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Configuration load/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Server configuration
///
/// Contains all configuration needed to run the bridge server:
/// - Server settings (host, port, TLS, CORS)
/// - Upstream engine settings (WebSocket URL, REST URL, API key, voice)
/// - Session timing knobs (echo grace, unmute delay, frame wait, idle timeout)
/// - Interjection scheduler settings
/// - Reconnection and heartbeat settings for the upstream link
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Upstream engine settings
    /// WebSocket URL of the upstream conversational engine
    pub engine_url: String,
    /// REST base URL used for direct-session credential minting (optional;
    /// the `/v1/credential` endpoint is disabled without it)
    pub engine_rest_url: Option<String>,
    /// API key for the upstream engine
    pub engine_api_key: Option<String>,
    /// Voice identity requested in the session handshake
    pub engine_voice: Option<String>,
    /// Instruction text sent in the session handshake
    pub engine_instructions: Option<String>,

    // Audio pipeline
    /// Echo-suppression grace period after outbound audio / response end.
    /// Tunable; absorbs device buffering, network RTT and speaker-to-mic delay.
    pub echo_grace_ms: u64,
    /// Delay before the client microphone is unmuted after a response ends,
    /// letting already-buffered audio finish playing
    pub unmute_delay_ms: u64,

    // Visual context
    /// How long to wait for a fresh frame before falling back to a stale one
    pub frame_wait_ms: u64,

    // Interjection scheduler
    /// Evaluation cadence of the interjection timer
    pub interject_tick_ms: u64,
    /// Sensitivity floor below which interjections never fire
    pub interject_min_sensitivity: f32,
    /// Whether barge-in emits a short spoken acknowledgment
    pub bargein_ack: bool,

    // Upstream resilience
    /// Maximum reconnection attempts before the session fails terminally
    pub reconnect_max_attempts: u32,
    /// Heartbeat ping interval toward the engine (seconds)
    pub heartbeat_interval_secs: u64,
    /// Missing-pong window that forces a reconnect cycle (seconds)
    pub heartbeat_timeout_secs: u64,
    /// Outbound audio chunks buffered while reconnecting (oldest dropped)
    pub audio_buffer_chunks: usize,

    /// Idle client timeout; sessions with no client activity are closed
    pub idle_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            cors_allowed_origins: None,
            engine_url: String::new(),
            engine_rest_url: None,
            engine_api_key: None,
            engine_voice: None,
            engine_instructions: None,
            echo_grace_ms: 2000,
            unmute_delay_ms: 500,
            frame_wait_ms: 500,
            interject_tick_ms: 3000,
            interject_min_sensitivity: 0.05,
            bargein_ack: false,
            reconnect_max_attempts: 5,
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 30,
            audio_buffer_chunks: 100,
            idle_timeout_secs: 300,
        }
    }
}

/// YAML file shape; every field optional so the file can override selectively.
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    host: Option<String>,
    port: Option<u16>,
    tls_cert_path: Option<PathBuf>,
    tls_key_path: Option<PathBuf>,
    cors_allowed_origins: Option<String>,
    engine_url: Option<String>,
    engine_rest_url: Option<String>,
    engine_api_key: Option<String>,
    engine_voice: Option<String>,
    engine_instructions: Option<String>,
    echo_grace_ms: Option<u64>,
    unmute_delay_ms: Option<u64>,
    frame_wait_ms: Option<u64>,
    interject_tick_ms: Option<u64>,
    interject_min_sensitivity: Option<f32>,
    bargein_ack: Option<bool>,
    reconnect_max_attempts: Option<u32>,
    heartbeat_interval_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    audio_buffer_chunks: Option<usize>,
    idle_timeout_secs: Option<u64>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
            field: name,
            reason: format!("cannot parse {raw:?}"),
        }),
        None => Ok(None),
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = env_var("BRIDGE_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse::<u16>("BRIDGE_PORT")? {
            config.port = port;
        }

        let cert = env_var("BRIDGE_TLS_CERT_PATH").map(PathBuf::from);
        let key = env_var("BRIDGE_TLS_KEY_PATH").map(PathBuf::from);
        config.tls = match (cert, key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    field: "BRIDGE_TLS_CERT_PATH/BRIDGE_TLS_KEY_PATH",
                    reason: "both must be set to enable TLS".to_string(),
                });
            }
        };

        config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
        if let Some(url) = env_var("ENGINE_URL") {
            config.engine_url = url;
        }
        config.engine_rest_url = env_var("ENGINE_REST_URL");
        config.engine_api_key = env_var("ENGINE_API_KEY");
        config.engine_voice = env_var("ENGINE_VOICE");
        config.engine_instructions = env_var("ENGINE_INSTRUCTIONS");

        if let Some(v) = env_parse::<u64>("ECHO_GRACE_MS")? {
            config.echo_grace_ms = v;
        }
        if let Some(v) = env_parse::<u64>("UNMUTE_DELAY_MS")? {
            config.unmute_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("FRAME_WAIT_MS")? {
            config.frame_wait_ms = v;
        }
        if let Some(v) = env_parse::<u64>("INTERJECT_TICK_MS")? {
            config.interject_tick_ms = v;
        }
        if let Some(v) = env_parse::<f32>("INTERJECT_MIN_SENSITIVITY")? {
            config.interject_min_sensitivity = v;
        }
        if let Some(v) = env_parse::<bool>("BARGEIN_ACK")? {
            config.bargein_ack = v;
        }
        if let Some(v) = env_parse::<u32>("RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect_max_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("HEARTBEAT_TIMEOUT_SECS")? {
            config.heartbeat_timeout_secs = v;
        }
        if let Some(v) = env_parse::<usize>("AUDIO_BUFFER_CHUNKS")? {
            config.audio_buffer_chunks = v;
        }
        if let Some(v) = env_parse::<u64>("IDLE_TIMEOUT_SECS")? {
            config.idle_timeout_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables filling
    /// anything the file leaves unset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let yaml: YamlConfig = serde_yaml::from_str(&raw)?;

        let mut config = Self::from_env().unwrap_or_default();

        if let Some(host) = yaml.host {
            config.host = host;
        }
        if let Some(port) = yaml.port {
            config.port = port;
        }
        match (yaml.tls_cert_path, yaml.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                config.tls = Some(TlsConfig {
                    cert_path,
                    key_path,
                });
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::Invalid {
                    field: "tls_cert_path/tls_key_path",
                    reason: "both must be set to enable TLS".to_string(),
                });
            }
        }
        if yaml.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = yaml.cors_allowed_origins;
        }
        if let Some(url) = yaml.engine_url {
            config.engine_url = url;
        }
        if yaml.engine_rest_url.is_some() {
            config.engine_rest_url = yaml.engine_rest_url;
        }
        if yaml.engine_api_key.is_some() {
            config.engine_api_key = yaml.engine_api_key;
        }
        if yaml.engine_voice.is_some() {
            config.engine_voice = yaml.engine_voice;
        }
        if yaml.engine_instructions.is_some() {
            config.engine_instructions = yaml.engine_instructions;
        }
        if let Some(v) = yaml.echo_grace_ms {
            config.echo_grace_ms = v;
        }
        if let Some(v) = yaml.unmute_delay_ms {
            config.unmute_delay_ms = v;
        }
        if let Some(v) = yaml.frame_wait_ms {
            config.frame_wait_ms = v;
        }
        if let Some(v) = yaml.interject_tick_ms {
            config.interject_tick_ms = v;
        }
        if let Some(v) = yaml.interject_min_sensitivity {
            config.interject_min_sensitivity = v;
        }
        if let Some(v) = yaml.bargein_ack {
            config.bargein_ack = v;
        }
        if let Some(v) = yaml.reconnect_max_attempts {
            config.reconnect_max_attempts = v;
        }
        if let Some(v) = yaml.heartbeat_interval_secs {
            config.heartbeat_interval_secs = v;
        }
        if let Some(v) = yaml.heartbeat_timeout_secs {
            config.heartbeat_timeout_secs = v;
        }
        if let Some(v) = yaml.audio_buffer_chunks {
            config.audio_buffer_chunks = v;
        }
        if let Some(v) = yaml.idle_timeout_secs {
            config.idle_timeout_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.interject_min_sensitivity) {
            return Err(ConfigError::Invalid {
                field: "interject_min_sensitivity",
                reason: "must be within 0.0..=1.0".to_string(),
            });
        }
        if self.interject_tick_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "interject_tick_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.heartbeat_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::Invalid {
                field: "heartbeat_timeout_secs",
                reason: "must exceed heartbeat_interval_secs".to_string(),
            });
        }
        if self.audio_buffer_chunks == 0 {
            return Err(ConfigError::Invalid {
                field: "audio_buffer_chunks",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Server bind address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether TLS is configured.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn echo_grace(&self) -> Duration {
        Duration::from_millis(self.echo_grace_ms)
    }

    pub fn unmute_delay(&self) -> Duration {
        Duration::from_millis(self.unmute_delay_ms)
    }

    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }

    pub fn interject_tick(&self) -> Duration {
        Duration::from_millis(self.interject_tick_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.echo_grace_ms, 2000);
        assert_eq!(config.unmute_delay_ms, 500);
        assert_eq!(config.frame_wait_ms, 500);
        assert_eq!(config.reconnect_max_attempts, 5);
        assert_eq!(config.audio_buffer_chunks, 100);
        assert!(!config.is_tls_enabled());
    }

    #[test]
    fn test_address() {
        let config = BridgeConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_rejects_bad_sensitivity_floor() {
        let config = BridgeConfig {
            interject_min_sensitivity: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_heartbeat_inversion() {
        let config = BridgeConfig {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "port: 9443\nengine_url: wss://engine.example/v1/session\necho_grace_ms: 1500"
        )
        .expect("write yaml");

        let config = BridgeConfig::from_file(file.path()).expect("load");
        assert_eq!(config.port, 9443);
        assert_eq!(config.engine_url, "wss://engine.example/v1/session");
        assert_eq!(config.echo_grace_ms, 1500);
        // Untouched fields keep defaults
        assert_eq!(config.unmute_delay_ms, 500);
    }

    #[test]
    fn test_from_file_rejects_partial_tls() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "tls_cert_path: /tmp/cert.pem").expect("write yaml");

        let result = BridgeConfig::from_file(file.path());
        assert!(result.is_err());
    }
}
