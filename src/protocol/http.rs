// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP client for the fan vendor protocol.
//!
//! Every request is a JSON `POST` to `http://<address>/mf`:
//!
//! | Operation | Body |
//! |---|---|
//! | info | `{"queryDynamicShadowData": 1}` |
//! | set | `{"<field>": <value>}` |
//! | reboot | `{"reboot": true}` |
//!
//! The device answers with its full state as a JSON object.

use std::net::Ipv4Addr;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};

use crate::error::ProtocolError;
use crate::protocol::{ClientFactory, DeviceSnapshot, FanClient};
use crate::types::{Attribute, AttributeValue};

// ============================================================================
// HttpConfig - Settings shared by all device clients
// ============================================================================

/// Configuration for the device HTTP clients.
///
/// # Examples
///
/// ```
/// use fanbridge::protocol::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig::new()
///     .with_port(8080)
///     .with_timeout(Duration::from_secs(2));
/// assert_eq!(config.port(), 8080);
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    port: u16,
    path: String,
    timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConfig {
    /// Default HTTP port.
    pub const DEFAULT_PORT: u16 = 80;
    /// Default request path.
    pub const DEFAULT_PATH: &'static str = "/mf";
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            path: Self::DEFAULT_PATH.to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets a custom port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the request path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates a client factory from this configuration.
    ///
    /// All clients share one connection pool.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn into_factory(self) -> Result<HttpClientFactory, ProtocolError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ProtocolError::Http)?;

        Ok(HttpClientFactory {
            client,
            port: self.port,
            path: self.path,
        })
    }
}

// ============================================================================
// HttpClientFactory
// ============================================================================

/// Builds [`HttpFanClient`]s that share one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    client: Client,
    port: u16,
    path: String,
}

impl ClientFactory for HttpClientFactory {
    type Client = HttpFanClient;

    fn client_for(&self, address: Ipv4Addr) -> Result<HttpFanClient, ProtocolError> {
        let url = if self.port == HttpConfig::DEFAULT_PORT {
            format!("http://{address}{}", self.path)
        } else {
            format!("http://{address}:{}{}", self.port, self.path)
        };

        Ok(HttpFanClient {
            address,
            url,
            client: self.client.clone(),
        })
    }
}

// ============================================================================
// HttpFanClient
// ============================================================================

/// HTTP client for one device.
///
/// # Examples
///
/// ```no_run
/// use fanbridge::protocol::{ClientFactory, FanClient, HttpConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = HttpConfig::new().into_factory()?;
/// let client = factory.client_for("192.168.1.40".parse()?)?;
/// let snapshot = client.info().await?;
/// println!("{}", snapshot.client_id());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFanClient {
    address: Ipv4Addr,
    url: String,
    client: Client,
}

impl HttpFanClient {
    /// Returns the request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sets a field by protocol name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidOperation` if `name` is not a settable
    /// field, or any error from the request itself.
    pub async fn set_raw(&self, name: &str, value: Value) -> Result<Value, ProtocolError> {
        let attribute = Attribute::from_field(name).ok_or_else(|| {
            ProtocolError::InvalidOperation(format!("invalid set operation {}: {name}", self.url))
        })?;

        let mut body = serde_json::Map::new();
        body.insert(attribute.field().to_string(), value);
        self.post(&Value::Object(body)).await
    }

    async fn post(&self, body: &Value) -> Result<Value, ProtocolError> {
        tracing::trace!(url = %self.url, body = %body, "Sending device request");

        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(ProtocolError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Rejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let json: Value = response.json().await.map_err(ProtocolError::Http)?;

        tracing::trace!(address = %self.address, response = %json, "Received device response");

        Ok(json)
    }
}

impl FanClient for HttpFanClient {
    fn address(&self) -> Ipv4Addr {
        self.address
    }

    async fn info(&self) -> Result<DeviceSnapshot, ProtocolError> {
        let json = self.post(&json!({ "queryDynamicShadowData": 1 })).await?;
        DeviceSnapshot::from_value(json).map_err(|e| ProtocolError::InvalidResponse(e.to_string()))
    }

    async fn set(&self, attribute: Attribute, value: AttributeValue) -> Result<Value, ProtocolError> {
        self.set_raw(attribute.field(), value.to_json()).await
    }

    async fn reboot(&self) {
        if let Err(e) = self.post(&json!({ "reboot": true })).await {
            tracing::debug!(address = %self.address, error = %e, "Reboot request failed");
        }
    }
}
