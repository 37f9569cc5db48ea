// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptors for ceiling fans with an optional light.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::Translator;
use crate::registry::DeviceProfile;
use crate::types::{Attribute, DeviceId};

const DEFAULT_MANUFACTURER: &str = "Modern Forms";
const DEFAULT_MODEL: &str = "N/A";

#[derive(Debug, Clone, Serialize)]
struct DeviceInfo {
    identifiers: String,
    manufacturer: String,
    model: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    via_device: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct FanEntity {
    command_topic: String,
    device: DeviceInfo,
    name: String,
    payload_off: &'static str,
    payload_on: &'static str,
    state_topic: String,
    unique_id: String,
    percentage_command_topic: String,
    percentage_state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed_range_max: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
struct LightEntity {
    command_topic: String,
    device: DeviceInfo,
    name: String,
    payload_off: &'static str,
    payload_on: &'static str,
    state_topic: String,
    unique_id: String,
    brightness_scale: u8,
    brightness_command_topic: String,
    brightness_state_topic: String,
}

/// Emits a `fan/<slug>` entity and, for devices with a light, a
/// `light/<slug>` entity linked to the fan.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanTranslator;

impl FanTranslator {
    /// Creates the translator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Translator for FanTranslator {
    fn entities(
        &self,
        id: &DeviceId,
        profile: &DeviceProfile,
        topic_prefix: &str,
    ) -> BTreeMap<String, Value> {
        let base = format!("{topic_prefix}/{}", profile.slug);
        let state = |attribute: Attribute| format!("{base}/{}", attribute.suffix());
        let command = |attribute: Attribute| format!("{base}/set/{}", attribute.suffix());

        let manufacturer = profile
            .manufacturer
            .clone()
            .unwrap_or_else(|| DEFAULT_MANUFACTURER.to_string());
        let model = profile
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let fan_id = format!("{id}-fan");

        let mut entities = BTreeMap::new();

        let fan = FanEntity {
            command_topic: command(Attribute::FanOn),
            device: DeviceInfo {
                identifiers: fan_id.clone(),
                manufacturer: manufacturer.clone(),
                model: model.clone(),
                name: profile.fan_name.clone(),
                via_device: None,
            },
            name: profile.name.clone(),
            payload_off: "off",
            payload_on: "on",
            state_topic: state(Attribute::FanOn),
            unique_id: fan_id.clone(),
            percentage_command_topic: command(Attribute::FanSpeed),
            percentage_state_topic: state(Attribute::FanSpeed),
            speed_range_max: (profile.max_speed > 0).then_some(profile.max_speed),
        };
        insert(&mut entities, format!("fan/{}", profile.slug), &fan);

        if profile.has_light {
            let light_id = format!("{id}-lit");
            let light = LightEntity {
                command_topic: command(Attribute::LightOn),
                device: DeviceInfo {
                    identifiers: light_id.clone(),
                    manufacturer,
                    model,
                    name: profile.light_name.clone(),
                    via_device: Some(fan_id),
                },
                name: profile.name.clone(),
                payload_off: "off",
                payload_on: "on",
                state_topic: state(Attribute::LightOn),
                unique_id: light_id,
                brightness_scale: 100,
                brightness_command_topic: command(Attribute::LightBrightness),
                brightness_state_topic: state(Attribute::LightBrightness),
            };
            insert(&mut entities, format!("light/{}", profile.slug), &light);
        }

        entities
    }
}

fn insert(entities: &mut BTreeMap<String, Value>, key: String, entity: &impl Serialize) {
    match serde_json::to_value(entity) {
        Ok(value) => {
            entities.insert(key, value);
        }
        Err(e) => tracing::warn!(entity = %key, error = %e, "Failed to encode descriptor"),
    }
}
