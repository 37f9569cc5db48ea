// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validated bridge settings.

use std::net::Ipv4Addr;
use std::time::Duration;

use super::{BridgeConfig, DeviceConfig, DurationValue};
use crate::error::ConfigError;
use crate::range::RangeSpec;
use crate::registry::{DeviceProfile, Naming};
use crate::router::RouterTopics;
use crate::types::{DeviceId, SLUG_SEPARATORS};

/// Timers of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// How long a probed address is not probed again.
    pub discover_expire: Duration,
    /// Poll interval of active devices.
    pub poll_active: Duration,
    /// Poll interval of idle devices.
    pub poll_idle: Duration,
    /// How long a device stays active without changes.
    pub quiet_window: Duration,
    /// Delay before a freshly installed poller runs.
    pub transition_delay: Duration,
    /// Delay between discovery and the first state snapshot.
    pub settle_delay: Duration,
    /// Delay before probing an announced device.
    pub new_device_delay: Duration,
    /// Delay before republishing descriptors when the presentation layer starts.
    pub republish_delay: Duration,
    /// Delay before a requested scan starts.
    pub scan_delay: Duration,
    /// Spacing between probe dispatches.
    pub stagger: Duration,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// How often bus inactivity is checked.
    pub watchdog_interval: Duration,
    /// Bus silence after which the bridge stops.
    pub inactivity_window: Duration,
    /// Length of a power-on boost. Zero disables boosting.
    pub boost_duration: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            discover_expire: Duration::from_secs(12 * 3600),
            poll_active: Duration::from_secs(5),
            poll_idle: Duration::from_secs(5),
            quiet_window: Duration::from_secs(60),
            transition_delay: Duration::from_millis(500),
            settle_delay: Duration::from_secs(2),
            new_device_delay: Duration::from_secs(5),
            republish_delay: Duration::from_secs(30),
            scan_delay: Duration::from_millis(100),
            stagger: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(60),
            watchdog_interval: Duration::from_secs(10),
            inactivity_window: Duration::from_secs(90),
            boost_duration: Duration::ZERO,
        }
    }
}

/// Presentation layer discovery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationSettings {
    /// Prefix of descriptor topics.
    pub topic_prefix: String,
    /// Retain descriptors.
    pub retain: bool,
    /// Topic on which the presentation layer announces itself.
    pub status_topic: String,
    /// Payload announcing that the presentation layer (re)started.
    pub birth_payload: String,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            topic_prefix: "homeassistant".to_string(),
            retain: false,
            status_topic: "homeassistant/status".to_string(),
            birth_payload: "online".to_string(),
        }
    }
}

/// A device from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDevice {
    /// Canonical identifier.
    pub id: DeviceId,
    /// Profile with configured values and defaults.
    pub profile: DeviceProfile,
    /// Configured address.
    pub address: Option<Ipv4Addr>,
}

/// Everything the bridge needs to run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Prefix of every device topic.
    pub topic_prefix: String,
    /// Heartbeat topic.
    pub heartbeat_topic: String,
    /// Device command template.
    pub set_topic: Option<String>,
    /// Scan request template.
    pub command_topic: Option<String>,
    /// Device announcement template.
    pub new_device_topic: Option<String>,
    /// JSON field of an announcement that holds the address.
    pub new_device_field: Option<String>,
    /// Topic receiving `start` at startup and `stop` as last will.
    pub status_topic: Option<String>,
    /// Presentation layer discovery, if enabled.
    pub presentation: Option<PresentationSettings>,
    /// Ranges to scan. `None` scans the local network.
    pub ranges: Option<Vec<RangeSpec>>,
    /// Devices from the configuration file.
    pub static_devices: Vec<StaticDevice>,
    /// Naming of discovered devices.
    pub naming: Naming,
    /// Timers.
    pub timing: Timing,
    /// Consecutive failures tolerated before a device is dead.
    pub poll_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_prefix("mf")
    }
}

impl Settings {
    /// Default settings for the given topic prefix.
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            topic_prefix: prefix.to_string(),
            heartbeat_topic: format!("{prefix}/ping"),
            set_topic: Some(format!("{prefix}/+/set/+")),
            command_topic: Some(format!("{prefix}/command")),
            new_device_topic: None,
            new_device_field: None,
            status_topic: None,
            presentation: None,
            ranges: None,
            static_devices: Vec::new(),
            naming: Naming::default(),
            timing: Timing::default(),
            poll_retries: 3,
        }
    }

    /// Validates a configuration file and fills in defaults.
    ///
    /// Malformed ranges and device addresses are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidSeparator` for a slug separator outside
    /// the allowed set, or `ConfigError::InvalidDuration` for an unparseable
    /// duration.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let prefix = config.mqtt_conf.topic_prefix.trim_end_matches('/');
        let mut settings = Self::with_prefix(prefix);

        if let Some(ping) = &config.mqtt_conf.ping_topic {
            settings.heartbeat_topic.clone_from(ping);
        }
        if let Some(set) = &config.fan_set_topic {
            settings.set_topic = Some(set.clone());
        }
        if let Some(command) = &config.command_topic {
            settings.command_topic = Some(command.clone());
        }
        settings.new_device_topic.clone_from(&config.new_fan_topic);
        settings.new_device_field.clone_from(&config.new_fan_attribute);
        settings.status_topic.clone_from(&config.status_topic);

        if let Some(separator) = &config.slug_separator {
            let mut chars = separator.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if SLUG_SEPARATORS.contains(&c) => settings.naming.separator = c,
                _ => return Err(ConfigError::InvalidSeparator(separator.clone())),
            }
        }
        if let Some(hostname_prefix) = &config.hostname_prefix {
            settings.naming.hostname_prefix.clone_from(hostname_prefix);
        }

        let timing = &mut settings.timing;
        // Zero means "use the default" for intervals, as in the file format
        let nonzero = |value: &Option<DurationValue>, field, default| -> Result<Duration, ConfigError> {
            match value {
                Some(value) => {
                    let duration = value.to_duration(field)?;
                    Ok(if duration.is_zero() { default } else { duration })
                }
                None => Ok(default),
            }
        };
        timing.discover_expire = nonzero(&config.discover_expire, "discover_expire", timing.discover_expire)?;
        timing.poll_active = nonzero(&config.poll_active, "poll_active", timing.poll_active)?;
        timing.poll_idle = nonzero(&config.poll_idle, "poll_idle", timing.poll_idle)?;
        if let Some(boost) = &config.speed_boost_time {
            timing.boost_duration = boost.to_duration("speed_boost_time")?;
        }
        if let Some(retries) = config.poll_retries.filter(|r| *r > 0) {
            settings.poll_retries = retries;
        }

        settings.ranges = config.fan_ips.as_ref().map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match entry.parse() {
                    Ok(spec) => Some(spec),
                    Err(e) => {
                        tracing::warn!(range = ?entry, error = %e, "Skipping badly formed range");
                        None
                    }
                })
                .collect()
        });

        if let Some(hass) = &config.homeassistant
            && hass.discovery_enable.is_set()
        {
            let defaults = PresentationSettings::default();
            let topic_prefix = hass
                .topic_prefix
                .clone()
                .unwrap_or(defaults.topic_prefix);
            settings.presentation = Some(PresentationSettings {
                status_topic: hass
                    .status_topic
                    .clone()
                    .unwrap_or_else(|| format!("{topic_prefix}/status")),
                topic_prefix,
                retain: hass.retain.is_set(),
                birth_payload: hass
                    .startup_payload
                    .clone()
                    .unwrap_or(defaults.birth_payload),
            });
        }

        settings.static_devices = config
            .fans
            .iter()
            .map(|(id, device)| static_device(id, device, &settings.naming))
            .collect();

        Ok(settings)
    }

    /// Returns the templates the topic router is built from.
    #[must_use]
    pub fn router_topics(&self) -> RouterTopics {
        RouterTopics {
            heartbeat: self.heartbeat_topic.clone(),
            new_device: self.new_device_topic.clone(),
            bus_status: self
                .presentation
                .as_ref()
                .map(|p| p.status_topic.clone()),
            set: self.set_topic.clone(),
            management: self.command_topic.clone(),
        }
    }

    /// Returns the topic of one device attribute or of its liveness.
    #[must_use]
    pub fn device_topic(&self, slug: &str, suffix: &str) -> String {
        format!("{}/{slug}/{suffix}", self.topic_prefix)
    }
}

fn static_device(id: &str, config: &DeviceConfig, naming: &Naming) -> StaticDevice {
    let id = DeviceId::new(id);
    let name = config.name.clone().unwrap_or_else(|| id.to_string());
    let mut profile = DeviceProfile::named(&id, &name, naming);

    // A configured slug is used as written, unless it cannot be a topic level
    if let Some(slug) = config.slug.as_deref().map(str::trim) {
        if slug.is_empty() || slug.contains(['/', '+', '#']) {
            tracing::warn!(id = %id, slug = %slug, "Slug is not a valid topic level, normalizing");
            profile.slug = naming.slug(slug);
        } else {
            profile.slug = slug.to_string();
        }
    }
    if let Some(hostname) = &config.hostname {
        profile.hostname.clone_from(hostname);
    }
    if let Some(fan_name) = &config.fan_name {
        profile.fan_name.clone_from(fan_name);
    }
    if let Some(light_name) = &config.light_name {
        profile.light_name.clone_from(light_name);
    }
    if let Some(has_light) = config.has_light {
        profile.has_light = has_light;
    }
    if let Some(max_speed) = config.max_speed.filter(|s| *s > 0) {
        profile.max_speed = max_speed;
    }
    if let Some(device_type) = &config.device_type {
        profile.device_type.clone_from(device_type);
    }
    if let Some(boost) = config.boost_on_start {
        profile.boost_on_start = boost;
    }
    profile.model.clone_from(&config.model);
    profile.template.clone_from(&config.template);
    profile.manufacturer.clone_from(&config.manufacturer);

    let address = config.ip.as_deref().and_then(|ip| match ip.trim().parse() {
        Ok(address) => Some(address),
        Err(_) => {
            tracing::warn!(id = %id, ip = %ip, "Ignoring invalid device address");
            None
        }
    });

    StaticDevice {
        id,
        profile,
        address,
    }
}
