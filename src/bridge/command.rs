// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound commands: device sets, scan requests, device announcements and
//! presentation layer restarts.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde_json::Value;

use super::Bridge;
use crate::bus::Publisher;
use crate::error::ValueError;
use crate::protocol::{ClientFactory, FanClient};
use crate::types::{Attribute, AttributeValue, DeviceId, is_true};

/// A command addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Stop polling and mark the device dead.
    Kill,
    /// Poll the device actively again.
    Revive,
    /// Raise or lower per-poll logging.
    SetDebug(bool),
    /// Restart the device.
    Reboot,
    /// Change an attribute.
    Set(Attribute, AttributeValue),
}

impl DeviceCommand {
    /// Parses the final topic segment and payload of a set message.
    ///
    /// ```
    /// use fanbridge::bridge::DeviceCommand;
    /// use fanbridge::types::{Attribute, AttributeValue};
    ///
    /// assert_eq!(DeviceCommand::parse("dead", "").unwrap(), DeviceCommand::Kill);
    /// assert_eq!(
    ///     DeviceCommand::parse("speed", "4").unwrap(),
    ///     DeviceCommand::Set(Attribute::FanSpeed, AttributeValue::Number(4))
    /// );
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ValueError::UnknownAttribute` for an unknown verb, or
    /// `ValueError::InvalidNumber` for a non-numeric value of a numeric
    /// attribute.
    pub fn parse(verb: &str, payload: &str) -> Result<Self, ValueError> {
        match verb.to_lowercase().as_str() {
            "dead" => Ok(Self::Kill),
            "alive" | "active" => Ok(Self::Revive),
            "debug" => Ok(Self::SetDebug(is_true(payload))),
            "reboot" => Ok(Self::Reboot),
            other => {
                let attribute = Attribute::from_suffix(other)
                    .ok_or_else(|| ValueError::UnknownAttribute(other.to_string()))?;
                Ok(Self::Set(attribute, attribute.coerce(payload)?))
            }
        }
    }
}

impl<F: ClientFactory, P: Publisher> Bridge<F, P> {
    // =========================================================================
    // Device commands
    // =========================================================================

    /// Handles a message on the set topic.
    ///
    /// The last topic segment naming a known slug selects the device, and the
    /// final segment is the verb. A segment matches a slug exactly or in
    /// lowercase.
    pub(crate) fn handle_set(&self, topic: &str, payload: &str) {
        let segments: Vec<&str> = topic.split('/').collect();
        let Some(verb) = segments.last() else {
            return;
        };

        let target = {
            let registry = self.inner.registry.lock();
            segments.iter().rev().find_map(|segment| {
                registry
                    .id_for_slug(segment)
                    .or_else(|| registry.id_for_slug(&segment.to_lowercase()))
                    .cloned()
            })
        };
        let Some(id) = target else {
            tracing::warn!(topic = %topic, "Set for unknown device");
            return;
        };

        match DeviceCommand::parse(verb, payload) {
            Ok(command) => self.execute(&id, command),
            Err(e) => tracing::warn!(topic = %topic, payload = %payload, error = %e, "Ignoring set"),
        }
    }

    /// Executes a command on a device.
    pub fn execute(&self, id: &DeviceId, command: DeviceCommand) {
        tracing::debug!(id = %id, command = ?command, "Executing");
        match command {
            DeviceCommand::Kill => self.kill(id),
            DeviceCommand::Revive => {
                self.promote(id);
            }
            DeviceCommand::SetDebug(enabled) => {
                if let Some(record) = self.inner.registry.lock().get_mut(id) {
                    record.profile.debug = enabled;
                }
            }
            DeviceCommand::Reboot => {
                let client = self
                    .inner
                    .registry
                    .lock()
                    .get(id)
                    .and_then(|r| r.client().cloned());
                match client {
                    Some(client) => {
                        tracing::info!(id = %id, "Rebooting");
                        tokio::spawn(async move { client.reboot().await });
                    }
                    None => tracing::warn!(id = %id, "Device not discovered yet"),
                }
            }
            DeviceCommand::Set(attribute, value) => self.execute_set(id, attribute, value),
        }
    }

    fn execute_set(&self, id: &DeviceId, attribute: Attribute, value: AttributeValue) {
        let boost_duration = self.inner.settings.timing.boost_duration;

        let (client, boost_speed) = {
            let mut registry = self.inner.registry.lock();
            let Some(record) = registry.get_mut(id) else {
                return;
            };
            let Some(client) = record.client.clone() else {
                tracing::warn!(slug = %record.slug(), "Device not discovered yet");
                return;
            };

            if attribute == Attribute::FanSpeed {
                record.requested_speed = value.as_number();
            }

            let boost = attribute == Attribute::FanOn
                && value == AttributeValue::Bool(true)
                && !boost_duration.is_zero()
                && record.profile.boost_on_start;
            let boost_speed = if boost {
                record.requested_speed = record
                    .values
                    .get(&Attribute::FanSpeed)
                    .and_then(AttributeValue::as_number);
                record
                    .boost_task
                    .replace(self.spawn_boost_restore(id.clone()));
                tracing::info!(slug = %record.slug(), restore = ?record.requested_speed, "Boosting");
                Some(record.profile.max_speed)
            } else {
                None
            };

            (client, boost_speed)
        };

        tokio::spawn(async move {
            if let Some(max_speed) = boost_speed
                && let Err(e) = client
                    .set(Attribute::FanSpeed, AttributeValue::Number(max_speed))
                    .await
            {
                tracing::warn!(error = %e, "Boost failed");
            }
            if let Err(e) = client.set(attribute, value).await {
                tracing::warn!(attribute = %attribute, error = %e, "Set failed");
            }
        });

        self.promote(id);
    }

    /// Restores the requested speed once the boost runs out.
    ///
    /// The device may have been rediscovered at another address meanwhile, so
    /// the client is looked up when the timer fires.
    fn spawn_boost_restore(&self, id: DeviceId) -> tokio::task::AbortHandle {
        let duration = self.inner.settings.timing.boost_duration;
        self.spawn_after(duration, move |bridge| async move {
            let target = bridge
                .inner
                .registry
                .lock()
                .get(&id)
                .and_then(|r| Some((r.requested_speed?, Arc::clone(r.client()?))));

            let Some((speed, client)) = target else {
                tracing::debug!(id = %id, "No speed to restore after boost");
                return;
            };
            tracing::info!(id = %id, speed, "Restoring speed after boost");
            if let Err(e) = client
                .set(Attribute::FanSpeed, AttributeValue::Number(speed))
                .await
            {
                tracing::warn!(id = %id, error = %e, "Restore after boost failed");
            }
        })
    }

    // =========================================================================
    // Bridge commands
    // =========================================================================

    pub(crate) fn handle_management(&self, payload: &str) {
        let delay = self.inner.settings.timing.scan_delay;
        match payload.trim().to_lowercase().as_str() {
            "scan" => {
                tracing::info!("Scan requested");
                self.spawn_after(delay, |bridge| async move { bridge.scan(false) });
            }
            "fullscan" => {
                tracing::info!("Full scan requested");
                self.inner.registry.lock().clear_probes();
                self.spawn_after(delay, |bridge| async move { bridge.scan(false) });
            }
            other => tracing::warn!(command = %other, "Unknown command"),
        }
    }

    pub(crate) fn handle_announcement(&self, payload: &str) {
        let Some(address) = self.announced_address(payload) else {
            tracing::warn!(payload = %payload, "Announcement without a usable address");
            return;
        };

        tracing::info!(address = %address, "Device announced");
        self.inner.registry.lock().clear_probe(address);
        self.spawn_after(
            self.inner.settings.timing.new_device_delay,
            move |bridge| async move { bridge.probe(address).await },
        );
    }

    fn announced_address(&self, payload: &str) -> Option<Ipv4Addr> {
        let text = match &self.inner.settings.new_device_field {
            Some(field) => {
                let json: Value = serde_json::from_str(payload).ok()?;
                json.get(field)?.as_str()?.to_string()
            }
            None => payload.to_string(),
        };
        text.trim().parse().ok()
    }

    pub(crate) fn handle_bus_status(&self, payload: &str) {
        let Some(presentation) = &self.inner.settings.presentation else {
            return;
        };
        if payload.trim() != presentation.birth_payload {
            tracing::debug!(payload = %payload, "Presentation status");
            return;
        }

        tracing::info!("Presentation layer started, republishing");
        self.spawn_after(
            self.inner.settings.timing.republish_delay,
            |bridge| async move { bridge.republish_all() },
        );
    }
}
