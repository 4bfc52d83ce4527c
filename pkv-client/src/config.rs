//! # Client Configuration
//!
//! Purpose: Collect every tunable of a connection in one plain struct that
//! can be built in code or loaded from JSON.
//!
//! ## Notes
//! - Durations are expressed as integer milliseconds when serialized.
//! - Missing JSON fields fall back to `Default`.

use std::time::Duration;

use pkv_common::{ProtocolVersion, DEFAULT_MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// What to do with pending commands after an unexpected disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayPolicy {
    /// Resend everything (at-least-once, only safe for idempotent workloads).
    ReplayAll,
    /// Resend idempotent commands, fail the rest.
    #[default]
    ReplayIdempotentOnly,
    /// Fail everything that was pending.
    FailAll,
}

/// How `invoke` behaves while the connection is not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectedBehavior {
    /// Buffer commands until the connection is ready again.
    #[default]
    Queue,
    /// Reject commands immediately.
    FailFast,
}

/// Reconnect delay policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay after a failure.
    #[serde(with = "duration_ms")]
    pub floor: Duration,
    /// Upper bound on any delay.
    #[serde(with = "duration_ms")]
    pub cap: Duration,
    /// Fraction of each delay that is randomized, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            floor: Duration::from_millis(50),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

/// Configuration for one logical connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Socket establishment plus handshake deadline.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Default per-command deadline; `None` waits forever.
    #[serde(with = "option_duration_ms")]
    pub command_timeout: Option<Duration>,
    /// Reconnect delays.
    pub backoff: BackoffConfig,
    /// Commands allowed in flight (queued or awaiting reply) at once.
    pub max_in_flight: usize,
    /// Replay policy after a disconnect.
    pub replay: ReplayPolicy,
    /// Behavior of `invoke` while not ready.
    pub disconnected_behavior: DisconnectedBehavior,
    /// Largest frame accepted from the server.
    pub max_frame_size: usize,
    /// Protocol version requested in the handshake.
    pub protocol: ProtocolVersion,
    /// Connection name announced to the server.
    pub client_name: Option<String>,
    /// Database selected after connecting; 0 skips `SELECT`.
    pub database: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Some(Duration::from_secs(60)),
            backoff: BackoffConfig::default(),
            max_in_flight: 64 * 1024,
            replay: ReplayPolicy::default(),
            disconnected_behavior: DisconnectedBehavior::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            protocol: ProtocolVersion::Resp3,
            client_name: None,
            database: 0,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> ClientResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(text).map_err(|err| ClientError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the connection cannot run with.
    pub fn validate(&self) -> ClientResult<()> {
        if self.addr.is_empty() {
            return Err(ClientError::InvalidConfig("addr must not be empty".into()));
        }
        if self.max_in_flight == 0 {
            return Err(ClientError::InvalidConfig("max_in_flight must be positive".into()));
        }
        if self.max_frame_size == 0 {
            return Err(ClientError::InvalidConfig("max_frame_size must be positive".into()));
        }
        if self.backoff.floor > self.backoff.cap {
            return Err(ClientError::InvalidConfig("backoff floor exceeds cap".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ClientError::InvalidConfig("backoff jitter must be within 0.0..=1.0".into()));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}
