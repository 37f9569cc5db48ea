// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport for the bridge.
//!
//! # Examples
//!
//! ```no_run
//! use fanbridge::bus::MqttBus;
//!
//! # async fn example() -> fanbridge::Result<()> {
//! let (publisher, mut events) = MqttBus::builder()
//!     .host("192.168.1.50")
//!     .credentials("user", "password")
//!     .last_will("mf/status", "stop")
//!     .connect(vec!["mf/+/set/+".to_string()])
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS};
use tokio::sync::{mpsc, oneshot};

use super::{BusEvent, Publisher};
use crate::error::ProtocolError;

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the outbound request queue of the MQTT client.
const REQUEST_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the bus connection.
#[derive(Debug, Clone)]
struct MqttBusConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
    last_will: Option<(String, String)>,
    client_id: Option<String>,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(10),
            last_will: None,
            client_id: None,
        }
    }
}

/// Builder for the MQTT bus connection.
#[derive(Debug, Default)]
pub struct MqttBus {
    config: MqttBusConfig,
}

impl MqttBus {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 60 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the message the broker publishes if the connection drops.
    #[must_use]
    pub fn last_will(mut self, topic: impl Into<String>, payload: impl Into<String>) -> Self {
        self.config.last_will = Some((topic.into(), payload.into()));
        self
    }

    /// Sets the client identifier. A random one is used otherwise.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = Some(id.into());
        self
    }

    /// Connects to the broker and subscribes to `subscriptions`.
    ///
    /// Subscriptions are renewed every time the broker acknowledges a
    /// connection. Inbound messages arrive on the returned channel; the
    /// channel yields [`BusEvent::Closed`] once when the connection ends.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn connect(
        self,
        subscriptions: Vec<String>,
    ) -> Result<(MqttPublisher, mpsc::Receiver<BusEvent>), ProtocolError> {
        let config = self.config;
        if config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("fanbridge_{}", uuid::Uuid::new_v4().simple()));

        let mut mqtt_options = MqttOptions::new(&client_id, &config.host, config.port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        if let Some((ref topic, ref payload)) = config.last_will {
            mqtt_options.set_last_will(LastWill::new(
                topic,
                payload.clone(),
                QoS::AtMostOnce,
                false,
            ));
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Channel to signal when ConnAck is received
        let (connack_tx, connack_rx) = oneshot::channel();

        tokio::spawn(handle_bus_events(
            event_loop,
            client.clone(),
            subscriptions,
            events_tx,
            Some(connack_tx),
        ));

        let timeout = config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %config.host,
                    port = %config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
            }
            Ok(Err(_)) => {
                return Err(ProtocolError::ConnectionFailed(
                    "MQTT event loop terminated unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                return Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )));
            }
        }

        Ok((MqttPublisher { client }, events_rx))
    }
}

/// Publishes on the MQTT connection without waiting.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool) {
        tracing::trace!(topic = %topic, payload = %payload, retain, "Publishing");
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
        {
            tracing::warn!(topic = %topic, error = %e, "Dropped outbound message");
        }
    }
}

/// Drives the MQTT event loop, forwarding inbound messages.
async fn handle_bus_events(
    mut event_loop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    events: mpsc::Sender<BusEvent>,
    connack_tx: Option<oneshot::Sender<()>>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = connack_tx;

    let reason = loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                for topic in &subscriptions {
                    if let Err(e) = client.try_subscribe(topic, QoS::AtMostOnce) {
                        tracing::warn!(topic = %topic, error = %e, "Failed to subscribe");
                    }
                }
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                tracing::trace!(
                    topic = %publish.topic,
                    payload = %payload,
                    "MQTT message received"
                );
                if events
                    .send(BusEvent::message(publish.topic, payload))
                    .await
                    .is_err()
                {
                    // Nobody is listening any more
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                break "broker sent disconnect".to_string();
            }
            Ok(_) => {}
            Err(e) => {
                break e.to_string();
            }
        }
    };

    tracing::warn!(reason = %reason, "MQTT connection closed");
    let _ = events.send(BusEvent::Closed(reason)).await;
}
