// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Presentation-layer discovery descriptors.
//!
//! After a device is discovered the bridge publishes descriptors that let a
//! home automation front end create entities for it. What those descriptors
//! look like depends on the device, so they are produced by a [`Translator`]
//! picked from a [`TranslatorRegistry`].
//!
//! Translators are looked up by candidate keys built from the device
//! profile, most specific first:
//!
//! 1. `model-<model>`
//! 2. `template-<template>`
//! 3. `type-<device type>`
//!
//! Values are slugged with `-`, so a device of type `MF_FAN` resolves to
//! the built-in `type-mf-fan` translator.

mod fan;

pub use fan::FanTranslator;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::registry::DeviceProfile;
use crate::types::{DeviceId, slugify};

/// Produces presentation descriptors for one kind of device.
pub trait Translator: Send + Sync {
    /// Returns descriptors keyed by `<kind>/<slug>`.
    ///
    /// `topic_prefix` is the bridge's own topic prefix, used to build the
    /// state and command topics the descriptors point at.
    fn entities(
        &self,
        id: &DeviceId,
        profile: &DeviceProfile,
        topic_prefix: &str,
    ) -> BTreeMap<String, Value>;
}

/// Named translators.
#[derive(Clone, Default)]
pub struct TranslatorRegistry {
    translators: HashMap<String, Arc<dyn Translator>>,
}

impl fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.translators.keys().collect();
        keys.sort();
        f.debug_struct("TranslatorRegistry")
            .field("keys", &keys)
            .finish()
    }
}

impl TranslatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in translators.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("type-mf-fan", FanTranslator::new());
        registry
    }

    /// Registers a translator under `key`, replacing any previous one.
    pub fn register(&mut self, key: impl Into<String>, translator: impl Translator + 'static) {
        self.translators.insert(key.into(), Arc::new(translator));
    }

    /// Returns the translator of the first candidate key that has one.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S]) -> Option<&Arc<dyn Translator>> {
        candidates
            .iter()
            .find_map(|key| self.translators.get(key.as_ref()))
    }

    /// Builds the descriptors for a device.
    ///
    /// Returns nothing if no translator matches the device.
    #[must_use]
    pub fn entities(
        &self,
        id: &DeviceId,
        profile: &DeviceProfile,
        topic_prefix: &str,
    ) -> BTreeMap<String, Value> {
        let candidates = candidate_keys(profile);
        match self.resolve(&candidates) {
            Some(translator) => translator.entities(id, profile, topic_prefix),
            None => {
                tracing::debug!(slug = %profile.slug, candidates = ?candidates, "No presentation translator");
                BTreeMap::new()
            }
        }
    }

    /// Returns the number of registered translators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.translators.len()
    }

    /// Returns true if no translator is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }
}

/// Returns the lookup keys for a device, most specific first.
#[must_use]
pub fn candidate_keys(profile: &DeviceProfile) -> Vec<String> {
    let mut keys = Vec::with_capacity(3);
    if let Some(model) = &profile.model {
        keys.push(format!("model-{}", slugify(model, '-')));
    }
    if let Some(template) = &profile.template {
        keys.push(format!("template-{}", slugify(template, '-')));
    }
    if !profile.device_type.is_empty() {
        keys.push(format!("type-{}", slugify(&profile.device_type, '-')));
    }
    keys
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::Naming;

    struct Fixed(&'static str);

    impl Translator for Fixed {
        fn entities(&self, _: &DeviceId, profile: &DeviceProfile, _: &str) -> BTreeMap<String, Value> {
            BTreeMap::from([(format!("sensor/{}", profile.slug), json!({ "by": self.0 }))])
        }
    }

    fn profile() -> (DeviceId, DeviceProfile) {
        let id = DeviceId::new("ab1234");
        let profile = DeviceProfile::synthesized(&id, &Naming::default());
        (id, profile)
    }

    #[test]
    fn candidate_keys_are_ordered_and_slugged() {
        let (_, mut profile) = profile();
        profile.model = Some("Avalon 2".to_string());
        profile.template = Some("Big_Fan".to_string());
        assert_eq!(
            candidate_keys(&profile),
            vec!["model-avalon-2", "template-big-fan", "type-mf-fan"]
        );
    }

    #[test]
    fn most_specific_translator_wins() {
        let (id, mut profile) = profile();
        profile.model = Some("Avalon".to_string());

        let mut registry = TranslatorRegistry::with_defaults();
        registry.register("model-avalon", Fixed("model"));

        let entities = registry.entities(&id, &profile, "mf");
        assert_eq!(entities.get("sensor/ab1234"), Some(&json!({ "by": "model" })));
    }

    #[test]
    fn falls_back_to_type() {
        let (id, profile) = profile();
        let registry = TranslatorRegistry::with_defaults();
        let entities = registry.entities(&id, &profile, "mf");
        assert!(entities.contains_key("fan/ab1234"));
    }

    #[test]
    fn no_translator_is_not_an_error() {
        let (id, mut profile) = profile();
        profile.device_type = "OTHER".to_string();
        let registry = TranslatorRegistry::with_defaults();
        assert!(registry.entities(&id, &profile, "mf").is_empty());
    }
}
