// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message bus surface.
//!
//! The bridge publishes through the [`Publisher`] trait and consumes
//! [`BusEvent`]s from a channel, so it never depends on a particular
//! transport. The `mqtt` feature provides [`MqttBus`], backed by `rumqttc`.

#[cfg(feature = "mqtt")]
mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttPublisher};

/// Fire-and-forget publishing.
///
/// Implementations must not block. A message that cannot be queued is
/// dropped and logged by the implementation.
pub trait Publisher: Send + Sync + 'static {
    /// Publishes `payload` on `topic`.
    fn publish(&self, topic: &str, payload: &str, retain: bool);
}

/// Something that happened on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// An inbound message.
    Message {
        /// Topic the message was published on.
        topic: String,
        /// Message payload as text.
        payload: String,
    },
    /// The connection is gone and will not come back.
    Closed(String),
}

impl BusEvent {
    /// Creates an inbound message event.
    #[must_use]
    pub fn message(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Message {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
