// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bridge between devices and the bus.
//!
//! A [`Bridge`] owns the device registry and everything that acts on it:
//!
//! - discovery (`scan`, `probe`), staggering probes over the configured ranges
//! - one poller per device, adapting its cadence to observed changes
//! - the command executor behind the set topic
//! - presentation descriptors for discovered devices
//!
//! Inbound bus messages are fed through [`Bridge::handle_message`], usually by
//! [`Bridge::run`], which also publishes the heartbeat and stops the bridge
//! when the bus goes quiet.
//!
//! # Poll states
//!
//! ```text
//!                 probe answers
//!  Undiscovered ─────────────────→ Active ←──────────┐
//!                                    │ quiet window   │ change observed,
//!                                    ↓ without change │ alive/active command
//!                                  Idle ──────────────┘
//!   too many failed polls,
//!   dead command               ┌─ Dead
//!   (from Active or Idle) ─────┘   │ rediscovery or alive/active command
//!                                  └──────────────────→ Active
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use fanbridge::bridge::Bridge;
//! use fanbridge::bus::MqttBus;
//! use fanbridge::config::Settings;
//! use fanbridge::protocol::HttpConfig;
//!
//! # async fn example() -> fanbridge::Result<()> {
//! let settings = Settings::default();
//! let factory = HttpConfig::new().into_factory()?;
//! let (publisher, events) = MqttBus::builder()
//!     .host("192.168.1.50")
//!     .connect(Vec::new())
//!     .await?;
//!
//! let bridge = Bridge::new(settings, factory, publisher)?;
//! bridge.start();
//! let err = bridge.run(events).await;
//! eprintln!("bridge stopped: {err}");
//! # Ok(())
//! # }
//! ```

mod command;
mod discovery;
mod poller;

pub use command::DeviceCommand;

use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, interval_at};

use crate::bus::{BusEvent, Publisher};
use crate::config::Settings;
use crate::error::{ConfigError, Error};
use crate::presentation::TranslatorRegistry;
use crate::protocol::ClientFactory;
use crate::registry::{DeviceProfile, PollState, Registry, TaskSlot};
use crate::router::{Route, TopicRouter};
use crate::types::{Attribute, AttributeValue, DeviceId, on_off};

/// Messages waiting to be published once the registry lock is released.
type Outbox = Vec<(String, String)>;

/// A point-in-time view of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Device identifier.
    pub id: DeviceId,
    /// Device profile.
    pub profile: DeviceProfile,
    /// Last known address.
    pub address: Option<Ipv4Addr>,
    /// Polling state.
    pub poll_state: PollState,
    /// Current poll interval.
    pub poll_interval: Duration,
    /// Consecutive failed polls.
    pub failures: u32,
    /// Liveness last published.
    pub liveness: Option<bool>,
    /// When a change was last observed or the device was forced active.
    pub last_change: Option<Instant>,
    /// Cached attribute values.
    pub values: BTreeMap<Attribute, AttributeValue>,
}

/// Bridges a fleet of devices to the bus.
///
/// `Bridge` is cheaply cloneable (via `Arc`); clones share all state.
pub struct Bridge<F: ClientFactory, P: Publisher> {
    inner: Arc<BridgeInner<F, P>>,
}

struct BridgeInner<F: ClientFactory, P: Publisher> {
    settings: Settings,
    factory: F,
    publisher: P,
    registry: Mutex<Registry<F::Client>>,
    router: TopicRouter,
    translators: TranslatorRegistry,
    /// Last time anything arrived from the bus.
    activity: Mutex<Instant>,
    /// The running scan dispatcher.
    scan_task: Mutex<TaskSlot>,
}

impl<F: ClientFactory, P: Publisher> Clone for Bridge<F, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ClientFactory, P: Publisher> std::fmt::Debug for Bridge<F, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("topic_prefix", &self.inner.settings.topic_prefix)
            .field("devices", &self.device_count())
            .finish_non_exhaustive()
    }
}

impl<F: ClientFactory, P: Publisher> Bridge<F, P> {
    /// Creates a bridge with the built-in presentation translators.
    ///
    /// Statically configured devices are registered right away.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTopic` if a topic template is malformed.
    pub fn new(settings: Settings, factory: F, publisher: P) -> Result<Self, ConfigError> {
        Self::with_translators(settings, factory, publisher, TranslatorRegistry::with_defaults())
    }

    /// Creates a bridge with the given presentation translators.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTopic` if a topic template is malformed.
    pub fn with_translators(
        settings: Settings,
        factory: F,
        publisher: P,
        translators: TranslatorRegistry,
    ) -> Result<Self, ConfigError> {
        let router = TopicRouter::new(&settings.router_topics())?;

        let mut registry = Registry::new(settings.naming.clone());
        for device in &settings.static_devices {
            let slug = registry.insert_configured(
                device.id.clone(),
                device.profile.clone(),
                device.address,
            );
            tracing::debug!(
                id = %device.id,
                slug = %slug,
                hostname = %device.profile.hostname,
                address = ?device.address,
                "Configured device"
            );
        }

        Ok(Self {
            inner: Arc::new(BridgeInner {
                settings,
                factory,
                publisher,
                registry: Mutex::new(registry),
                router,
                translators,
                activity: Mutex::new(Instant::now()),
                scan_task: Mutex::new(TaskSlot::new()),
            }),
        })
    }

    /// Returns the bridge settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Returns the topics the bus connection must subscribe to.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.router.subscriptions()
    }

    /// Announces the bridge and schedules the first scan.
    pub fn start(&self) {
        let settings = &self.inner.settings;
        if let Some(topic) = &settings.status_topic {
            self.inner.publisher.publish(topic, "start", false);
        }

        tracing::info!(prefix = %settings.topic_prefix, "Starting");
        self.spawn_after(settings.timing.scan_delay, |bridge| async move {
            bridge.scan(false);
        });
    }

    /// Processes bus events until the bus closes or goes quiet.
    ///
    /// Publishes the heartbeat while running. Returns the error that
    /// stopped the bridge: [`Error::TransportClosed`] when the connection
    /// ends, or [`Error::Inactivity`] when nothing arrived within the
    /// inactivity window.
    pub async fn run(&self, mut events: mpsc::Receiver<BusEvent>) -> Error {
        let timing = &self.inner.settings.timing;
        let now = Instant::now();
        let mut heartbeat = interval_at(now + timing.heartbeat_interval, timing.heartbeat_interval);
        let mut watchdog = interval_at(now + timing.watchdog_interval, timing.watchdog_interval);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(BusEvent::Message { topic, payload }) => self.handle_message(&topic, &payload),
                    Some(BusEvent::Closed(reason)) => return Error::TransportClosed(reason),
                    None => return Error::TransportClosed("event channel closed".to_string()),
                },
                _ = heartbeat.tick() => self.publish_heartbeat(),
                _ = watchdog.tick() => {
                    if let Err(e) = self.check_activity() {
                        tracing::warn!(error = %e, "Stopping");
                        return e;
                    }
                }
            }
        }
    }

    /// Handles one inbound bus message.
    pub fn handle_message(&self, topic: &str, payload: &str) {
        *self.inner.activity.lock() = Instant::now();

        match self.inner.router.classify(topic) {
            Route::Heartbeat => {}
            Route::NewDevice => {
                tracing::debug!(topic = %topic, payload = %payload, "Device announcement");
                self.handle_announcement(payload);
            }
            Route::BusStatus => self.handle_bus_status(payload),
            Route::Set => self.handle_set(topic, payload),
            Route::Management => self.handle_management(payload),
            Route::Unrecognized => {
                tracing::debug!(topic = %topic, payload = %payload, "Unexpected message");
            }
        }
    }

    /// Publishes the heartbeat.
    pub fn publish_heartbeat(&self) {
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        });
        self.inner
            .publisher
            .publish(&self.inner.settings.heartbeat_topic, &payload.to_string(), false);
    }

    /// Fails if the bus has been quiet for the whole inactivity window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inactivity`] when the window has elapsed.
    pub fn check_activity(&self) -> Result<(), Error> {
        let idle = self.inner.activity.lock().elapsed();
        if idle >= self.inner.settings.timing.inactivity_window {
            return Err(Error::Inactivity {
                idle_secs: idle.as_secs(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns the status of the device with the given slug.
    #[must_use]
    pub fn status(&self, slug: &str) -> Option<DeviceStatus> {
        let registry = self.inner.registry.lock();
        let id = registry.id_for_slug(slug)?;
        registry.get(id).map(|record| DeviceStatus {
            id: record.id().clone(),
            profile: record.profile().clone(),
            address: record.address(),
            poll_state: record.poll_state(),
            poll_interval: record.poll_interval(),
            failures: record.failures(),
            liveness: record.liveness(),
            last_change: record.last_change(),
            values: record.values().clone(),
        })
    }

    /// Returns the status of every device, ordered by slug.
    #[must_use]
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let mut slugs: Vec<String> = {
            let registry = self.inner.registry.lock();
            registry.iter().map(|r| r.slug().to_string()).collect()
        };
        slugs.sort();
        slugs.iter().filter_map(|slug| self.status(slug)).collect()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    /// Publishes the presentation descriptors of one device.
    ///
    /// Does nothing when presentation discovery is disabled.
    pub fn publish_presentation(&self, id: &DeviceId) {
        let Some(presentation) = &self.inner.settings.presentation else {
            return;
        };
        let Some(profile) = self
            .inner
            .registry
            .lock()
            .get(id)
            .map(|r| r.profile().clone())
        else {
            return;
        };

        let entities =
            self.inner
                .translators
                .entities(id, &profile, &self.inner.settings.topic_prefix);
        for (entity, descriptor) in entities {
            let topic = format!("{}/{entity}/config", presentation.topic_prefix);
            tracing::debug!(slug = %profile.slug, topic = %topic, "Publishing descriptor");
            self.inner
                .publisher
                .publish(&topic, &descriptor.to_string(), presentation.retain);
        }
    }

    /// Republishes descriptors and values of every discovered device.
    pub fn republish_all(&self) {
        if self.inner.settings.presentation.is_none() {
            return;
        }
        tracing::info!("Publishing presentation configuration");

        let ids: Vec<DeviceId> = {
            let registry = self.inner.registry.lock();
            registry
                .iter()
                .filter(|r| r.client().is_some())
                .map(|r| r.id().clone())
                .collect()
        };
        for id in ids {
            self.publish_presentation(&id);
            self.spawn_snapshot(id, self.inner.settings.timing.settle_delay, false);
        }
    }

    /// Publishes the cached values of a device after `delay`.
    ///
    /// With `announce`, liveness `on` is published first and recorded.
    fn spawn_snapshot(&self, id: DeviceId, delay: Duration, announce: bool) {
        self.spawn_after(delay, move |bridge| async move {
            let mut outbox = Outbox::new();
            {
                let mut registry = bridge.inner.registry.lock();
                let Some(record) = registry.get_mut(&id) else {
                    return;
                };
                let slug = record.slug().to_string();
                if announce {
                    record.liveness = Some(true);
                    outbox.push((bridge.device_topic(&slug, "state"), on_off(true).to_string()));
                }
                for (attribute, value) in record.values() {
                    outbox.push((
                        bridge.device_topic(&slug, attribute.suffix()),
                        value.to_payload(*attribute),
                    ));
                }
            }
            bridge.flush(outbox);
        });
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn device_topic(&self, slug: &str, suffix: &str) -> String {
        self.inner.settings.device_topic(slug, suffix)
    }

    fn flush(&self, outbox: Outbox) {
        for (topic, payload) in outbox {
            self.inner.publisher.publish(&topic, &payload, false);
        }
    }

    /// Runs `task` with a clone of the bridge after `delay`.
    fn spawn_after<T, Fut>(&self, delay: Duration, task: T) -> AbortHandle
    where
        T: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let bridge = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task(bridge).await;
        })
        .abort_handle()
    }
}
