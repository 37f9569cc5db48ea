// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `fanbridge` - Bridge network-attached ceiling fans to an MQTT bus.
//!
//! The bridge finds fans on the local network, polls each one over HTTP and
//! mirrors its state onto bus topics. Commands published on the bus are
//! turned into device requests.
//!
//! # Features
//!
//! - **Discovery**: scans configured ranges, CIDR blocks and hostnames, and
//!   reacts to device announcements
//! - **Adaptive polling**: devices that change are polled actively, quiet
//!   ones idly, unresponsive ones are marked dead
//! - **Commands**: attribute sets, power-on speed boost, reboot, and
//!   liveness overrides via `<prefix>/<slug>/set/<verb>`
//! - **Presentation**: discovery descriptors for home automation front ends
//!
//! # Topics
//!
//! With the default prefix `mf`:
//!
//! | Topic | Direction | Payload |
//! |-------|-----------|---------|
//! | `mf/<slug>/<attribute>` | out | attribute value, `on`/`off` for booleans |
//! | `mf/<slug>/state` | out | device liveness, `on`/`off` |
//! | `mf/<slug>/set/<verb>` | in | new value, or `dead`/`alive`/`debug`/`reboot` |
//! | `mf/command` | in | `scan` or `fullscan` |
//! | `mf/ping` | both | heartbeat |
//!
//! # Quick Start
//!
//! ```no_run
//! use fanbridge::bridge::Bridge;
//! use fanbridge::bus::MqttBus;
//! use fanbridge::config::{BridgeConfig, Settings};
//! use fanbridge::protocol::HttpConfig;
//!
//! #[tokio::main]
//! async fn main() -> fanbridge::Result<()> {
//!     let config = BridgeConfig::load("config.json")?;
//!     let settings = Settings::from_config(&config)?;
//!
//!     let factory = HttpConfig::new().into_factory()?;
//!     let bridge_topics = fanbridge::router::TopicRouter::new(&settings.router_topics())?;
//!     let (publisher, events) = MqttBus::builder()
//!         .host(&config.mqtt_conf.host)
//!         .connect(bridge_topics.subscriptions())
//!         .await?;
//!
//!     let bridge = Bridge::new(settings, factory, publisher)?;
//!     bridge.start();
//!     Err(bridge.run(events).await)
//! }
//! ```

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod presentation;
pub mod protocol;
pub mod range;
pub mod registry;
pub mod router;
pub mod types;

pub use bridge::{Bridge, DeviceCommand, DeviceStatus};
pub use error::{ConfigError, Error, ParseError, ProtocolError, Result, ValueError};
pub use types::{Attribute, AttributeValue, DeviceId};
