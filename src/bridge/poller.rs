// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device polling and poll state transitions.
//!
//! Each discovered device has at most one poller task, held in its record's
//! poll slot. A transition always replaces the slot, which aborts the
//! previous poller before the new one is installed.

use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::{Bridge, Outbox};
use crate::bus::Publisher;
use crate::protocol::{ClientFactory, FanClient};
use crate::registry::{PollState, Registry};
use crate::types::{DeviceId, on_off};

impl<F: ClientFactory, P: Publisher> Bridge<F, P> {
    /// Starts polling a device after `delay`.
    pub(crate) fn spawn_poller(&self, id: DeviceId, delay: Duration) -> AbortHandle {
        let bridge = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            while let Some(next) = bridge.poll_once(&id).await {
                tokio::time::sleep(next).await;
            }
            tracing::trace!(id = %id, "Poller stopped");
        })
        .abort_handle()
    }

    fn spawn_quiet_timer(&self, id: DeviceId) -> AbortHandle {
        let window = self.inner.settings.timing.quiet_window;
        self.spawn_after(window, move |bridge| async move {
            bridge.demote(&id);
        })
    }

    /// Polls a device once.
    ///
    /// Returns the delay before the next poll, or `None` when polling should
    /// stop.
    pub(crate) async fn poll_once(&self, id: &DeviceId) -> Option<Duration> {
        let client = {
            let registry = self.inner.registry.lock();
            let record = registry.get(id)?;
            if !record.poll_state().is_polled() {
                return None;
            }
            let client = record.client()?.clone();

            if let Some(address) = record.address()
                && registry.probed_within(address, record.poll_interval(), Instant::now())
            {
                tracing::trace!(slug = %record.slug(), "Checked recently, skipping poll");
                return Some(record.poll_interval());
            }
            client
        };

        let result = client.info().await;

        let mut outbox = Outbox::new();
        let next = {
            let mut registry = self.inner.registry.lock();
            let retries = self.inner.settings.poll_retries;
            let record = registry.get_mut(id)?;
            // Killed or demoted while the request was in flight
            if !record.poll_state().is_polled() {
                return None;
            }
            let slug = record.slug().to_string();

            match result {
                Ok(snapshot) => {
                    let changed = record.apply(snapshot.into_values());
                    if record.profile.debug {
                        tracing::info!(slug = %slug, changed = changed.len(), state = %record.poll_state, "Polled");
                    } else {
                        tracing::trace!(slug = %slug, changed = changed.len(), "Polled");
                    }

                    for (attribute, value) in &changed {
                        tracing::debug!(slug = %slug, attribute = %attribute, value = %value, "Changed");
                        outbox.push((
                            self.device_topic(&slug, attribute.suffix()),
                            value.to_payload(*attribute),
                        ));
                    }
                    if !changed.is_empty() {
                        if record.poll_state == PollState::Idle {
                            tracing::info!(slug = %slug, "Change observed, polling actively");
                        }
                        record.poll_state = PollState::Active;
                        record.poll_interval = self.inner.settings.timing.poll_active;
                        record.last_change = Some(Instant::now());
                        record.quiet_task.replace(self.spawn_quiet_timer(id.clone()));
                    }

                    record.failures = 0;
                    if record.liveness != Some(true) {
                        record.liveness = Some(true);
                        outbox.push((self.device_topic(&slug, "state"), on_off(true).to_string()));
                    }
                    Some(record.poll_interval)
                }
                Err(e) => {
                    record.failures += 1;
                    if record.profile.debug {
                        tracing::info!(slug = %slug, failures = record.failures, error = %e, "Poll failed");
                    } else {
                        tracing::debug!(slug = %slug, failures = record.failures, error = %e, "Poll failed");
                    }

                    if record.failures > retries {
                        tracing::warn!(slug = %slug, failures = record.failures, "Device stopped answering");
                        self.kill_locked(&mut registry, id, &mut outbox);
                        None
                    } else {
                        Some(record.poll_interval)
                    }
                }
            }
        };

        self.flush(outbox);
        next
    }

    /// Forces a discovered device into the active state.
    ///
    /// Revives a dead device. Returns false for a device that never answered
    /// a probe.
    pub(crate) fn promote(&self, id: &DeviceId) -> bool {
        let timing = &self.inner.settings.timing;
        let mut registry = self.inner.registry.lock();
        let Some(record) = registry.get_mut(id) else {
            return false;
        };
        if record.client.is_none() {
            tracing::warn!(slug = %record.slug(), "Device not discovered yet");
            return false;
        }

        if record.poll_state == PollState::Dead {
            tracing::info!(slug = %record.slug(), "Reviving device");
            record.failures = 0;
        } else if record.poll_state != PollState::Active {
            tracing::debug!(slug = %record.slug(), from = %record.poll_state, "Polling actively");
        }

        record.poll_state = PollState::Active;
        record.poll_interval = timing.poll_active;
        record.last_change = Some(Instant::now());
        record
            .poll_task
            .replace(self.spawn_poller(id.clone(), timing.transition_delay));
        record.quiet_task.replace(self.spawn_quiet_timer(id.clone()));
        true
    }

    /// Moves an active device to the idle state.
    pub(crate) fn demote(&self, id: &DeviceId) {
        let timing = &self.inner.settings.timing;
        let mut registry = self.inner.registry.lock();
        let Some(record) = registry.get_mut(id) else {
            return;
        };
        if record.poll_state != PollState::Active {
            return;
        }

        tracing::debug!(slug = %record.slug(), "No change observed, polling idly");
        record.poll_state = PollState::Idle;
        record.poll_interval = timing.poll_idle;
        record
            .poll_task
            .replace(self.spawn_poller(id.clone(), timing.transition_delay));
        record.quiet_task.cancel();
    }

    /// Marks a device dead and stops polling it.
    pub(crate) fn kill(&self, id: &DeviceId) {
        let mut outbox = Outbox::new();
        {
            let mut registry = self.inner.registry.lock();
            self.kill_locked(&mut registry, id, &mut outbox);
        }
        self.flush(outbox);
    }

    fn kill_locked(&self, registry: &mut Registry<F::Client>, id: &DeviceId, outbox: &mut Outbox) {
        let Some(record) = registry.get_mut(id) else {
            return;
        };

        if record.poll_state != PollState::Dead {
            tracing::info!(slug = %record.slug(), "Marking device dead");
        }
        record.poll_state = PollState::Dead;
        record.stop_polling();

        if record.liveness != Some(false) {
            record.liveness = Some(false);
            outbox.push((
                self.device_topic(record.slug(), "state"),
                on_off(false).to_string(),
            ));
        }

        // Let the next scan probe it again
        if let Some(address) = record.address {
            registry.clear_probe(address);
        }
    }
}
