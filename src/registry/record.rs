// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device records.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::TaskSlot;
use crate::types::{Attribute, AttributeValue, DeviceId, slugify};

/// Device type assumed when none is configured.
pub const DEFAULT_DEVICE_TYPE: &str = "MF_FAN";

/// Highest fan speed assumed when none is configured.
pub const DEFAULT_MAX_SPEED: i64 = 6;

/// Polling state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollState {
    /// Loaded from configuration, never answered a probe.
    Undiscovered,
    /// Polled at the active interval.
    Active,
    /// Polled at the idle interval.
    Idle,
    /// Not polled until rediscovered or revived.
    Dead,
}

impl PollState {
    /// Returns true if devices in this state have a running poller.
    #[must_use]
    pub const fn is_polled(self) -> bool {
        matches!(self, Self::Active | Self::Idle)
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undiscovered => "undiscovered",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Dead => "dead",
        })
    }
}

/// How names are derived for devices that are not configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    /// Prefix of derived hostnames.
    pub hostname_prefix: String,
    /// Separator used when building slugs.
    pub separator: char,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            hostname_prefix: "mf_fan_".to_string(),
            separator: '_',
        }
    }
}

impl Naming {
    /// Derives the hostname of a device from its identifier.
    ///
    /// ```
    /// use fanbridge::registry::Naming;
    /// use fanbridge::types::DeviceId;
    ///
    /// let naming = Naming::default();
    /// assert_eq!(naming.hostname(&DeviceId::new("MF_A8032ADD0220")), "mf_fan_dd0220");
    /// ```
    #[must_use]
    pub fn hostname(&self, id: &DeviceId) -> String {
        format!("{}{}", self.hostname_prefix, id.tail(6).to_lowercase())
    }

    /// Slugs a name with the configured separator.
    #[must_use]
    pub fn slug(&self, name: &str) -> String {
        slugify(name, self.separator)
    }
}

/// User-facing settings of a device.
///
/// These survive rediscovery: a probe only refreshes live values, never the
/// profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Display name.
    pub name: String,
    /// Topic-safe unique name. Made unique when the record is registered.
    pub slug: String,
    /// Hostname used to find the device when no address is configured.
    pub hostname: String,
    /// Display name of the fan entity.
    pub fan_name: String,
    /// Display name of the light entity.
    pub light_name: String,
    /// Whether the device has a light.
    pub has_light: bool,
    /// Highest fan speed.
    pub max_speed: i64,
    /// Whether powering on briefly runs the fan at full speed.
    pub boost_on_start: bool,
    /// Device type, used to pick a presentation translator.
    pub device_type: String,
    /// Device model, used to pick a presentation translator.
    pub model: Option<String>,
    /// Presentation template name.
    pub template: Option<String>,
    /// Manufacturer shown in presentation descriptors.
    pub manufacturer: Option<String>,
    /// Raises per-poll logging for this device.
    pub debug: bool,
}

impl DeviceProfile {
    /// Builds the default profile for a device seen for the first time.
    #[must_use]
    pub fn synthesized(id: &DeviceId, naming: &Naming) -> Self {
        Self::named(id, id.as_str(), naming)
    }

    /// Builds a default profile with the given display name.
    #[must_use]
    pub fn named(id: &DeviceId, name: &str, naming: &Naming) -> Self {
        Self {
            name: name.to_string(),
            slug: naming.slug(name),
            hostname: naming.hostname(id),
            fan_name: format!("{name} Fan"),
            light_name: format!("{name} Light"),
            has_light: true,
            max_speed: DEFAULT_MAX_SPEED,
            boost_on_start: false,
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            model: None,
            template: None,
            manufacturer: None,
            debug: false,
        }
    }
}

/// Everything the bridge tracks about one device.
#[derive(Debug)]
pub struct DeviceRecord<C> {
    pub(crate) id: DeviceId,
    pub(crate) profile: DeviceProfile,
    pub(crate) address: Option<Ipv4Addr>,
    pub(crate) values: BTreeMap<Attribute, AttributeValue>,
    pub(crate) client: Option<Arc<C>>,
    pub(crate) poll_state: PollState,
    pub(crate) poll_interval: Duration,
    pub(crate) failures: u32,
    pub(crate) last_change: Option<Instant>,
    pub(crate) liveness: Option<bool>,
    pub(crate) requested_speed: Option<i64>,
    pub(crate) poll_task: TaskSlot,
    pub(crate) quiet_task: TaskSlot,
    pub(crate) boost_task: TaskSlot,
}

impl<C> DeviceRecord<C> {
    pub(crate) fn new(id: DeviceId, profile: DeviceProfile, address: Option<Ipv4Addr>) -> Self {
        Self {
            id,
            profile,
            address,
            values: BTreeMap::new(),
            client: None,
            poll_state: PollState::Undiscovered,
            poll_interval: Duration::ZERO,
            failures: 0,
            last_change: None,
            liveness: None,
            requested_speed: None,
            poll_task: TaskSlot::new(),
            quiet_task: TaskSlot::new(),
            boost_task: TaskSlot::new(),
        }
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the device profile.
    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Returns the device slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.profile.slug
    }

    /// Returns the last known address.
    #[must_use]
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    /// Returns the cached attribute values.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<Attribute, AttributeValue> {
        &self.values
    }

    /// Returns the polling state.
    #[must_use]
    pub fn poll_state(&self) -> PollState {
        self.poll_state
    }

    /// Returns the current poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the number of consecutive failed polls.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns when a change was last observed or the device was forced active.
    #[must_use]
    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    /// Returns the liveness last published, if any.
    #[must_use]
    pub fn liveness(&self) -> Option<bool> {
        self.liveness
    }

    /// Returns the client for this device, once it has been discovered.
    #[must_use]
    pub fn client(&self) -> Option<&Arc<C>> {
        self.client.as_ref()
    }

    /// Overlays reported values, returning the attributes that changed.
    pub(crate) fn apply(
        &mut self,
        values: BTreeMap<Attribute, AttributeValue>,
    ) -> Vec<(Attribute, AttributeValue)> {
        let mut changed = Vec::new();
        for (attribute, value) in values {
            if self.values.get(&attribute) != Some(&value) {
                self.values.insert(attribute, value.clone());
                changed.push((attribute, value));
            }
        }
        changed
    }

    /// Stops polling the device.
    ///
    /// A pending boost restore is left alone so a speed the user asked for is
    /// still sent if the device comes back.
    pub(crate) fn stop_polling(&mut self) {
        self.poll_task.cancel();
        self.quiet_task.cancel();
    }
}
