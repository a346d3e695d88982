//! Startup configuration bundle.
//!
//! Everything the agent needs to know about its environment arrives once, at
//! startup: where the broker is, who the device is, and how aggressively to
//! publish and retry. [`AgentConfig::from_json`] reads the bundle straight out
//! of a byte slice without copying any strings.
//!
//! ```rust
//! use iotlink::agent::AgentConfig;
//!
//! let raw = br#"{
//!     "endpoint": { "host": "broker.example.net" },
//!     "device_id": "esp32-lab-01",
//!     "publish_interval_ms": 5000
//! }"#;
//! let config = AgentConfig::from_json(raw).unwrap();
//! assert_eq!(config.endpoint.port, 8883);
//! assert_eq!(config.publish_interval_ms, 5000);
//! assert_eq!(config.tick_ms, 50);
//! ```

use crate::network::application::mqtt::session::MAX_TOPIC_LEN;
use crate::network::application::mqtt::{Options, QoS};
use crate::network::transport::{CredentialError, CredentialKind, DEFAULT_PORT, Endpoint};
use core::fmt::Write as _;
use heapless::String;
use serde::de::{Deserializer, Error as _, Unexpected};
use serde::Deserialize;

/// Default publish interval.
pub const DEFAULT_PUBLISH_INTERVAL_MS: u32 = 2000;
/// Default scheduler tick.
pub const DEFAULT_TICK_MS: u32 = 50;
/// Default MQTT keep-alive.
pub const DEFAULT_KEEP_ALIVE_SECONDS: u16 = 60;
/// Default bound on link acquisition.
pub const DEFAULT_LINK_TIMEOUT_MS: u32 = 20_000;
/// Default bound on the broker handshake, from CONNECT to CONNACK.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u32 = 10_000;
/// Default number of consecutive credential failures before escalation.
pub const DEFAULT_ESCALATE_AFTER: u8 = 5;

/// Bounds of the reconnect backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_ms: u32,
    /// Ceiling the delay never exceeds.
    pub max_ms: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AgentConfig<'a> {
    /// Broker endpoint.
    #[serde(borrow)]
    pub endpoint: Endpoint<'a>,
    /// Device identifier. Used as MQTT client id and in topic names.
    pub device_id: &'a str,
    /// Time between telemetry publishes.
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u32,
    /// Length of one scheduler tick, the yield between iterations.
    #[serde(default = "default_tick")]
    pub tick_ms: u32,
    /// MQTT keep-alive in seconds. Zero disables keep-alive pings.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u16,
    /// How long link acquisition may take before it counts as failed.
    #[serde(default = "default_link_timeout")]
    pub link_timeout_ms: u32,
    /// How long to wait for CONNACK after CONNECT.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u32,
    /// Reconnect backoff bounds.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Consecutive credential-related handshake failures that raise an
    /// escalation.
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u8,
    /// QoS requested for the command subscription.
    #[serde(default = "default_command_qos", deserialize_with = "qos_from_level")]
    pub command_qos: QoS,
}

fn default_publish_interval() -> u32 {
    DEFAULT_PUBLISH_INTERVAL_MS
}

fn default_tick() -> u32 {
    DEFAULT_TICK_MS
}

fn default_keep_alive() -> u16 {
    DEFAULT_KEEP_ALIVE_SECONDS
}

fn default_link_timeout() -> u32 {
    DEFAULT_LINK_TIMEOUT_MS
}

fn default_handshake_timeout() -> u32 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_escalate_after() -> u8 {
    DEFAULT_ESCALATE_AFTER
}

fn default_command_qos() -> QoS {
    QoS::AtLeastOnce
}

fn qos_from_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<QoS, D::Error> {
    match u8::deserialize(deserializer)? {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        other => Err(D::Error::invalid_value(
            Unexpected::Unsigned(u64::from(other)),
            &"0 or 1",
        )),
    }
}

/// Rejected configuration.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The bundle is not valid JSON of the expected shape.
    Malformed,
    /// Broker host is empty.
    EmptyHost,
    /// Broker port is zero.
    ZeroPort,
    /// Device identifier is empty.
    EmptyDeviceId,
    /// Device identifier contains `/`, `+` or `#`.
    InvalidDeviceId,
    /// Derived topic names do not fit the topic buffers.
    TopicTooLong,
    /// Publish interval is zero.
    ZeroInterval,
    /// Tick is zero.
    ZeroTick,
    /// Initial backoff is zero or larger than the ceiling.
    InvalidBackoff,
    /// Escalation threshold is zero.
    ZeroEscalation,
    /// Credential material is malformed.
    Credential(CredentialKind, CredentialError),
}

impl<'a> AgentConfig<'a> {
    /// Configuration with defaults for everything but the broker host and
    /// the device identifier.
    pub fn new(host: &'a str, device_id: &'a str) -> Self {
        Self {
            endpoint: Endpoint {
                host,
                port: DEFAULT_PORT,
            },
            device_id,
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS,
            tick_ms: DEFAULT_TICK_MS,
            keep_alive_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            link_timeout_ms: DEFAULT_LINK_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            backoff: BackoffConfig::default(),
            escalate_after: DEFAULT_ESCALATE_AFTER,
            command_qos: default_command_qos(),
        }
    }

    /// Parse and validate a JSON configuration bundle.
    ///
    /// Strings are borrowed from `bytes`, so a string containing escape
    /// sequences is rejected as [`ConfigError::Malformed`].
    pub fn from_json(bytes: &'a [u8]) -> Result<Self, ConfigError> {
        let mut unescaped = [0u8; 64];
        let (config, _) =
            serde_json_core::from_slice_escaped::<AgentConfig<'a>>(bytes, &mut unescaped)
                .map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.endpoint.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.device_id.is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }
        if self.device_id.contains(['/', '+', '#']) {
            return Err(ConfigError::InvalidDeviceId);
        }
        if self.publish_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.backoff.initial_ms == 0 || self.backoff.initial_ms > self.backoff.max_ms {
            return Err(ConfigError::InvalidBackoff);
        }
        if self.escalate_after == 0 {
            return Err(ConfigError::ZeroEscalation);
        }
        Topics::for_device(self.device_id).map(|_| ())
    }

    /// CONNECT options for this device.
    pub fn session_options(&self) -> Options<'a> {
        Options {
            client_id: self.device_id,
            keep_alive_seconds: self.keep_alive_seconds,
            clean_session: true,
        }
    }
}

/// The device's publish and subscribe topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Telemetry goes here.
    pub publish: String<MAX_TOPIC_LEN>,
    /// Commands arrive here.
    pub subscribe: String<MAX_TOPIC_LEN>,
}

impl Topics {
    /// `devices/<id>/data` and `devices/<id>/commands`.
    pub fn for_device(device_id: &str) -> Result<Self, ConfigError> {
        let mut publish = String::new();
        let mut subscribe = String::new();
        write!(publish, "devices/{}/data", device_id).map_err(|_| ConfigError::TopicTooLong)?;
        write!(subscribe, "devices/{}/commands", device_id)
            .map_err(|_| ConfigError::TopicTooLong)?;
        Ok(Self { publish, subscribe })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware() {
        let config = AgentConfig::new("broker.example.net", "lab-01");
        assert_eq!(config.endpoint.port, 8883);
        assert_eq!(config.publish_interval_ms, 2000);
        assert_eq!(config.keep_alive_seconds, 60);
        assert_eq!(config.command_qos, QoS::AtLeastOnce);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn parses_full_bundle() {
        let raw = br#"{
            "endpoint": {"host": "a1b2c3.iot.example.com", "port": 443},
            "device_id": "lab-01",
            "publish_interval_ms": 1000,
            "tick_ms": 20,
            "keep_alive_seconds": 30,
            "link_timeout_ms": 5000,
            "handshake_timeout_ms": 4000,
            "backoff": {"initial_ms": 250, "max_ms": 8000},
            "escalate_after": 3,
            "command_qos": 0,
            "comment": "ignored"
        }"#;
        let config = AgentConfig::from_json(raw).unwrap();
        assert_eq!(config.endpoint.host, "a1b2c3.iot.example.com");
        assert_eq!(config.endpoint.port, 443);
        assert_eq!(config.tick_ms, 20);
        assert_eq!(
            config.backoff,
            BackoffConfig {
                initial_ms: 250,
                max_ms: 8000
            }
        );
        assert_eq!(config.escalate_after, 3);
        assert_eq!(config.command_qos, QoS::AtMostOnce);
    }

    #[test]
    fn rejects_bad_bundles() {
        assert_eq!(
            AgentConfig::from_json(b"{\"device_id\":\"x\"}"),
            Err(ConfigError::Malformed)
        );
        assert_eq!(
            AgentConfig::from_json(
                br#"{"endpoint":{"host":"h"},"device_id":"x","command_qos":2}"#
            ),
            Err(ConfigError::Malformed)
        );
        assert_eq!(
            AgentConfig::from_json(br#"{"endpoint":{"host":"h","port":0},"device_id":"x"}"#),
            Err(ConfigError::ZeroPort)
        );
    }

    #[test]
    fn escaped_strings_are_rejected() {
        assert_eq!(
            AgentConfig::from_json(br#"{"endpoint":{"host":"bro\u006ber"},"device_id":"x"}"#),
            Err(ConfigError::Malformed)
        );
        assert_eq!(
            AgentConfig::from_json(br#"{"endpoint":{"host":"h"},"device_id":"lab\"01"}"#),
            Err(ConfigError::Malformed)
        );
        assert!(AgentConfig::from_json(br#"{"endpoint":{"host":"h"},"device_id":"lab-01"}"#).is_ok());
    }

    #[test]
    fn validation_catches_unusable_values() {
        let base = AgentConfig::new("h", "lab-01");

        let mut config = base;
        config.endpoint.host = "";
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));

        let mut config = base;
        config.device_id = "";
        assert_eq!(config.validate(), Err(ConfigError::EmptyDeviceId));

        for id in ["lab/01", "lab+", "#"] {
            let mut config = base;
            config.device_id = id;
            assert_eq!(config.validate(), Err(ConfigError::InvalidDeviceId));
        }

        let mut config = base;
        config.publish_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInterval));

        let mut config = base;
        config.tick_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTick));

        let mut config = base;
        config.backoff = BackoffConfig {
            initial_ms: 10_000,
            max_ms: 1000,
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidBackoff));

        let mut config = base;
        config.escalate_after = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroEscalation));

        let long_id = "x".repeat(MAX_TOPIC_LEN);
        let mut config = base;
        config.device_id = &long_id;
        assert_eq!(config.validate(), Err(ConfigError::TopicTooLong));
    }

    #[test]
    fn topics_follow_device_id() {
        let topics = Topics::for_device("esp32-7f").unwrap();
        assert_eq!(topics.publish.as_str(), "devices/esp32-7f/data");
        assert_eq!(topics.subscribe.as_str(), "devices/esp32-7f/commands");
    }
}
