// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device discovery.
//!
//! A scan walks the statically configured devices first, then every address
//! of the configured ranges (or the local /24 when none are configured).
//! Probes are dispatched one stagger interval apart and run concurrently.
//! An address answered or refused within the discovery window is skipped.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use tokio::time::Instant;

use super::Bridge;
use crate::bus::Publisher;
use crate::protocol::{ClientFactory, DeviceSnapshot, FanClient};
use crate::range::{expand_all, local_ranges, resolve_first};

impl<F: ClientFactory, P: Publisher> Bridge<F, P> {
    /// Starts a scan, cancelling any scan still dispatching probes.
    ///
    /// A full scan forgets every recorded probe first, so all candidates
    /// are probed again.
    pub fn scan(&self, full: bool) {
        if full {
            self.inner.registry.lock().clear_probes();
        }

        let bridge = self.clone();
        let handle = tokio::spawn(async move { bridge.dispatch_scan().await }).abort_handle();
        self.inner.scan_task.lock().replace(handle);
    }

    async fn dispatch_scan(&self) {
        let settings = &self.inner.settings;
        tracing::info!("Scanning for devices");

        let mut seen = HashSet::new();

        for device in &settings.static_devices {
            let address = match device.address {
                Some(address) => Some(address),
                None => resolve_first(&device.profile.hostname).await,
            };
            match address {
                Some(address) => {
                    if seen.insert(address) {
                        self.dispatch_probe(address).await;
                    }
                }
                None => {
                    tracing::debug!(id = %device.id, hostname = %device.profile.hostname, "Could not resolve configured device");
                }
            }
        }

        let ranges = settings.ranges.clone().unwrap_or_else(local_ranges);
        for address in expand_all(&ranges).await {
            if seen.insert(address) {
                self.dispatch_probe(address).await;
            }
        }

        tracing::debug!(candidates = seen.len(), "Scan dispatched");
    }

    async fn dispatch_probe(&self, address: Ipv4Addr) {
        tokio::time::sleep(self.inner.settings.timing.stagger).await;
        let bridge = self.clone();
        tokio::spawn(async move { bridge.probe(address).await });
    }

    /// Probes one address and registers the device that answers.
    ///
    /// Skipped if the address was probed within the discovery window.
    pub async fn probe(&self, address: Ipv4Addr) {
        let window = self.inner.settings.timing.discover_expire;
        if self
            .inner
            .registry
            .lock()
            .probed_within(address, window, Instant::now())
        {
            tracing::trace!(address = %address, "Probed recently, skipping");
            return;
        }

        let client = match self.inner.factory.client_for(address) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "Cannot probe address");
                return;
            }
        };

        match client.info().await {
            Ok(snapshot) => self.register(address, client, snapshot),
            Err(e) if e.is_unreachable() => {
                tracing::trace!(address = %address, "No answer");
            }
            Err(e) => {
                tracing::debug!(address = %address, error = %e, "Not a device");
                self.inner
                    .registry
                    .lock()
                    .record_probe(address, Instant::now());
            }
        }
    }

    fn register(&self, address: Ipv4Addr, client: F::Client, snapshot: DeviceSnapshot) {
        let merged = {
            let mut registry = self.inner.registry.lock();
            registry.record_probe(address, Instant::now());
            registry.merge(address, client, snapshot)
        };

        if merged.is_new {
            tracing::info!(id = %merged.id, slug = %merged.slug, address = %address, "Discovered new device");
        } else {
            tracing::info!(id = %merged.id, slug = %merged.slug, address = %address, "Discovered device");
        }

        self.publish_presentation(&merged.id);
        self.spawn_snapshot(merged.id.clone(), self.inner.settings.timing.settle_delay, true);
        self.promote(&merged.id);
    }
}
