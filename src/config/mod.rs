// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge configuration.
//!
//! [`BridgeConfig`] mirrors the JSON configuration file. It is turned into
//! validated [`Settings`] with [`Settings::from_config`], which applies
//! defaults and reports bad values.
//!
//! ```json
//! {
//!   "mqtt_conf": { "host": "broker.local", "topic_prefix": "mf", "ping_topic": "mf/ping" },
//!   "fan_ips": ["192.168.1.0/24", ["10.0.0.10", "10.0.0.20"]],
//!   "fans": { "MF_A8032ADD0220": { "name": "Porch", "boost_on_start": true } },
//!   "speed_boost_time": 10,
//!   "fan_set_topic": "mf/+/set/+",
//!   "command_topic": "mf/command",
//!   "homeassistant": { "discovery_enable": true, "topic_prefix": "homeassistant" }
//! }
//! ```

mod settings;

pub use settings::{PresentationSettings, Settings, StaticDevice, Timing};

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::range::RangeEntry;
use crate::types::is_true;

/// The configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Broker connection and topic layout.
    pub mqtt_conf: MqttConf,
    /// How long a probed address is not probed again.
    pub discover_expire: Option<DurationValue>,
    /// Poll interval of active devices.
    pub poll_active: Option<DurationValue>,
    /// Poll interval of idle devices.
    pub poll_idle: Option<DurationValue>,
    /// Consecutive failures tolerated before a device is dead.
    pub poll_retries: Option<u32>,
    /// How long a power-on boost lasts. Zero disables boosting.
    pub speed_boost_time: Option<DurationValue>,
    /// Prefix of derived hostnames.
    pub hostname_prefix: Option<String>,
    /// Slug separator.
    pub slug_separator: Option<String>,
    /// Statically configured devices, keyed by identifier.
    pub fans: BTreeMap<String, DeviceConfig>,
    /// Ranges to scan. The local network is scanned when absent.
    pub fan_ips: Option<Vec<RangeEntry>>,
    /// Topic template of device announcements.
    pub new_fan_topic: Option<String>,
    /// JSON field of an announcement that holds the address.
    pub new_fan_attribute: Option<String>,
    /// Topic template of device commands.
    pub fan_set_topic: Option<String>,
    /// Topic template of scan requests.
    pub command_topic: Option<String>,
    /// Topic receiving `start` at startup and `stop` as last will.
    pub status_topic: Option<String>,
    /// Presentation layer discovery.
    pub homeassistant: Option<HomeAssistantConf>,
    /// Log lifecycle events.
    pub verbose: Flag,
    /// Log everything.
    pub debug: Flag,
}

impl BridgeConfig {
    /// Loads the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, or
    /// `ConfigError::Json` if it does not have the expected layout.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Parses the configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Json` if the text does not have the expected
    /// layout.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keepalive: Option<u64>,
    /// Client identifier.
    pub client_id: Option<String>,
    /// Prefix of every device topic.
    pub topic_prefix: String,
    /// Heartbeat topic.
    pub ping_topic: Option<String>,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            keepalive: None,
            client_id: None,
            topic_prefix: "mf".to_string(),
            ping_topic: None,
        }
    }
}

/// A statically configured device.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Display name.
    pub name: Option<String>,
    /// Slug. Derived from the name when absent.
    pub slug: Option<String>,
    /// Hostname. Derived from the identifier when absent.
    pub hostname: Option<String>,
    /// Address. The hostname is resolved when absent.
    pub ip: Option<String>,
    /// Whether the device has a light.
    pub has_light: Option<bool>,
    /// Fan entity name.
    pub fan_name: Option<String>,
    /// Light entity name.
    pub light_name: Option<String>,
    /// Highest fan speed.
    pub max_speed: Option<i64>,
    /// Device type.
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    /// Device model.
    pub model: Option<String>,
    /// Presentation template.
    pub template: Option<String>,
    /// Manufacturer.
    pub manufacturer: Option<String>,
    /// Boost to full speed on power-on.
    pub boost_on_start: Option<bool>,
}

/// Presentation layer discovery settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConf {
    /// Publish discovery descriptors.
    pub discovery_enable: Flag,
    /// Retain descriptors.
    pub retain: Flag,
    /// Topic on which the presentation layer announces itself.
    pub status_topic: Option<String>,
    /// Payload announcing that the presentation layer (re)started.
    pub startup_payload: Option<String>,
    /// Prefix of descriptor topics.
    pub topic_prefix: Option<String>,
}

/// A boolean written as a JSON boolean or as text such as `"yes"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    /// A JSON boolean.
    Bool(bool),
    /// A JSON number, true unless zero.
    Number(i64),
    /// Text, true for `on`, `true`, `yes` and `1`.
    Text(String),
}

impl Default for Flag {
    fn default() -> Self {
        Self::Bool(false)
    }
}

impl Flag {
    /// Returns the flag value.
    #[must_use]
    pub fn is_set(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0,
            Self::Text(s) => is_true(s),
        }
    }
}

/// A duration written as seconds or as text such as `"12h"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    /// Seconds, possibly fractional.
    Seconds(f64),
    /// Seconds as text, or a human readable duration.
    Text(String),
}

impl DurationValue {
    /// Converts the value to a [`Duration`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDuration` if the value is negative or
    /// cannot be parsed.
    pub fn to_duration(&self, field: &'static str) -> Result<Duration, ConfigError> {
        let invalid = || ConfigError::InvalidDuration {
            field,
            value: self.to_string(),
        };

        match self {
            Self::Seconds(secs) => Duration::try_from_secs_f64(*secs).map_err(|_| invalid()),
            Self::Text(text) => {
                let text = text.trim();
                if let Ok(secs) = text.parse::<f64>() {
                    return Duration::try_from_secs_f64(secs).map_err(|_| invalid());
                }
                humantime::parse_duration(text).map_err(|_| invalid())
            }
        }
    }
}

impl std::fmt::Display for DurationValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seconds(secs) => write!(f, "{secs}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}
