// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory device registry.
//!
//! The [`Registry`] owns every [`DeviceRecord`] and keeps three indexes over
//! them: by identifier, by slug and by address. It also remembers when each
//! address was last probed so discovery and polling do not hit the same
//! device twice in a row.
//!
//! The registry is plain data. Spawning and cancelling device tasks is done
//! by the bridge, which keeps the registry behind a lock.

mod record;
mod task_slot;

pub use record::{
    DEFAULT_DEVICE_TYPE, DEFAULT_MAX_SPEED, DeviceProfile, DeviceRecord, Naming, PollState,
};
pub use task_slot::TaskSlot;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::DeviceSnapshot;
use crate::types::DeviceId;

/// Result of merging a probe into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    /// Identifier of the merged device.
    pub id: DeviceId,
    /// Slug of the merged device.
    pub slug: String,
    /// True if the device was not registered before.
    pub is_new: bool,
}

/// Store of all known devices.
#[derive(Debug)]
pub struct Registry<C> {
    devices: HashMap<DeviceId, DeviceRecord<C>>,
    by_slug: HashMap<String, DeviceId>,
    by_address: HashMap<Ipv4Addr, DeviceId>,
    probes: HashMap<Ipv4Addr, Instant>,
    naming: Naming,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new(Naming::default())
    }
}

impl<C> Registry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(naming: Naming) -> Self {
        Self {
            devices: HashMap::new(),
            by_slug: HashMap::new(),
            by_address: HashMap::new(),
            probes: HashMap::new(),
            naming,
        }
    }

    /// Returns the naming rules of this registry.
    #[must_use]
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a device from static configuration.
    ///
    /// The record starts [`PollState::Undiscovered`] until a probe answers.
    /// If the requested slug is taken, a numeric suffix is added. Returns the
    /// slug actually assigned.
    pub fn insert_configured(
        &mut self,
        id: DeviceId,
        mut profile: DeviceProfile,
        address: Option<Ipv4Addr>,
    ) -> String {
        if let Some(existing) = self.devices.get(&id) {
            tracing::warn!(id = %id, slug = %existing.profile.slug, "Device configured twice, keeping first");
            return existing.profile.slug.clone();
        }

        profile.slug = self.unique_slug(&profile.slug, &id);
        let slug = profile.slug.clone();
        self.by_slug.insert(slug.clone(), id.clone());
        if let Some(address) = address {
            self.map_address(&id, None, address);
        }
        self.devices
            .insert(id.clone(), DeviceRecord::new(id, profile, address));
        slug
    }

    /// Merges a successful probe.
    ///
    /// A known device keeps its profile and only takes the reported values
    /// and the new address. An unknown device gets a synthesized profile.
    /// Either way the address now maps to this device, the failure count is
    /// reset and the client is replaced.
    pub fn merge(&mut self, address: Ipv4Addr, client: C, snapshot: DeviceSnapshot) -> Merged {
        let id = snapshot.client_id().clone();
        let model = snapshot.model().map(str::to_string);

        let (mut record, is_new) = match self.devices.remove(&id) {
            Some(record) => (record, false),
            None => {
                let mut profile = DeviceProfile::synthesized(&id, &self.naming);
                profile.slug = self.unique_slug(&profile.slug, &id);
                self.by_slug.insert(profile.slug.clone(), id.clone());
                (DeviceRecord::new(id.clone(), profile, None), true)
            }
        };

        self.map_address(&id, record.address, address);
        record.address = Some(address);
        record.client = Some(Arc::new(client));
        record.failures = 0;
        if record.profile.model.is_none() {
            record.profile.model = model;
        }
        record.apply(snapshot.into_values());

        let slug = record.profile.slug.clone();
        self.devices.insert(id.clone(), record);

        Merged { id, slug, is_new }
    }

    fn map_address(&mut self, id: &DeviceId, old: Option<Ipv4Addr>, address: Ipv4Addr) {
        // Drop the mapping of the device's previous address
        if let Some(old) = old
            && old != address
            && self.by_address.get(&old) == Some(id)
        {
            self.by_address.remove(&old);
        }

        if let Some(previous) = self.by_address.insert(address, id.clone())
            && &previous != id
        {
            tracing::info!(address = %address, previous = %previous, id = %id, "Address now belongs to another device");
            if let Some(record) = self.devices.get_mut(&previous)
                && record.address == Some(address)
            {
                record.address = None;
            }
        }
    }

    fn unique_slug(&self, wanted: &str, id: &DeviceId) -> String {
        let base = if wanted.is_empty() {
            self.naming.slug(id.as_str())
        } else {
            wanted.to_string()
        };

        if !self.by_slug.contains_key(&base) {
            return base;
        }

        let mut n = 2;
        loop {
            let candidate = format!("{base}{}{n}", self.naming.separator);
            if !self.by_slug.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Returns the device with the given identifier.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<&DeviceRecord<C>> {
        self.devices.get(id)
    }

    /// Returns the device with the given identifier, mutably.
    pub fn get_mut(&mut self, id: &DeviceId) -> Option<&mut DeviceRecord<C>> {
        self.devices.get_mut(id)
    }

    /// Returns the identifier of the device with the given slug.
    #[must_use]
    pub fn id_for_slug(&self, slug: &str) -> Option<&DeviceId> {
        self.by_slug.get(slug)
    }

    /// Returns the identifier of the device last seen at `address`.
    #[must_use]
    pub fn id_for_address(&self, address: Ipv4Addr) -> Option<&DeviceId> {
        self.by_address.get(&address)
    }

    /// Iterates over all devices.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord<C>> {
        self.devices.values()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    // =========================================================================
    // Probe recency
    // =========================================================================

    /// Returns true if `address` was probed less than `window` ago.
    #[must_use]
    pub fn probed_within(&self, address: Ipv4Addr, window: Duration, now: Instant) -> bool {
        self.probes
            .get(&address)
            .is_some_and(|at| now.saturating_duration_since(*at) < window)
    }

    /// Records a probe of `address`.
    pub fn record_probe(&mut self, address: Ipv4Addr, now: Instant) {
        self.probes.insert(address, now);
    }

    /// Forgets when `address` was probed.
    pub fn clear_probe(&mut self, address: Ipv4Addr) {
        self.probes.remove(&address);
    }

    /// Forgets every probe.
    pub fn clear_probes(&mut self) {
        self.probes.clear();
    }
}
