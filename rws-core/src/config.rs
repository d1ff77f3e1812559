//! Immutable-after-construction configuration surface. Everything here
//! derives `Deserialize` so a caller's own file-loading layer can produce
//! a `ConnectionConfig` from a `config::Config` built over a TOML/YAML
//! file. Optional fields default via a `typed-builder` builder, mirroring
//! a pooled HTTP/ingestor client's construction style.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::backoff::{BackoffKind, BackoffPolicy};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl Endpoint {
    pub fn url(&self) -> Result<url::Url, ConfigError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let raw = format!("{scheme}://{}:{}{}", self.host, self.port, self.path);
        url::Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct Timeouts {
    #[serde(with = "duration_millis")]
    #[builder(default = Duration::from_secs(10))]
    pub connect: Duration,
    #[serde(with = "duration_millis")]
    #[builder(default = Duration::from_secs(30))]
    pub request: Duration,
    #[serde(with = "duration_millis")]
    #[builder(default = Duration::from_secs(10))]
    pub await_upgrade: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts::builder().build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxAttempts {
    Finite(u32),
    Unbounded,
}

impl MaxAttempts {
    pub fn allows(&self, attempt: u32) -> bool {
        match self {
            MaxAttempts::Finite(n) => attempt < *n,
            MaxAttempts::Unbounded => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct ReconnectPolicy {
    #[serde(with = "duration_millis")]
    #[builder(default = Duration::from_millis(200))]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    #[builder(default = Duration::from_secs(30))]
    pub max_delay: Duration,
    #[builder(default = MaxAttempts::Unbounded)]
    pub max_attempts: MaxAttempts,
    #[builder(default = BackoffKind::Exponential)]
    pub backoff_kind: BackoffKind,
    #[builder(default = true)]
    pub reconnect_on_error: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::builder().build()
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_kind, self.base_delay, self.max_delay)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::NonPositiveTimeout("reconnect_policy.base_delay"));
        }
        if self.max_delay.is_zero() {
            return Err(ConfigError::NonPositiveTimeout("reconnect_policy.max_delay"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct RateLimitConfig {
    #[builder(default = 100)]
    pub capacity: u64,
    #[builder(default = 10)]
    pub refill_rate: u64,
    #[serde(with = "duration_millis")]
    #[builder(default = Duration::from_secs(1))]
    pub refill_interval: Duration,
    #[builder(default = 256)]
    pub queue_limit: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig::builder().build()
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refill_rate == 0 || self.refill_interval.is_zero() {
            return Err(ConfigError::NonPositiveRefill);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    #[builder(default)]
    pub timeouts: Timeouts,
    #[builder(default)]
    pub reconnect_policy: ReconnectPolicy,
    #[builder(default)]
    pub rate_limit: RateLimitConfig,
    #[builder(default = true)]
    pub auto_reauthenticate: bool,
    /// Max number of `{payload, reply_to}` entries `RequestBuffer` retains
    /// while status != WebsocketConnected.
    #[builder(default = 1024)]
    pub request_buffer_limit: usize,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint.url()?;
        self.reconnect_policy.validate()?;
        self.rate_limit.validate()?;
        if self.timeouts.connect.is_zero() || self.timeouts.request.is_zero() || self.timeouts.await_upgrade.is_zero()
        {
            return Err(ConfigError::NonPositiveTimeout("timeouts"));
        }
        Ok(())
    }
}

/// `serde_with`-style millisecond duration (de)serialization, written by
/// hand to avoid pulling in the whole `serde_with` derive machinery for
/// one field shape.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
