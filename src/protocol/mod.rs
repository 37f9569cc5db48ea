// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device protocol.
//!
//! The bridge talks to devices through the [`FanClient`] trait and obtains
//! clients from a [`ClientFactory`]. The `http` feature provides the vendor
//! HTTP implementation in [`HttpFanClient`].
//!
//! A device answers every request with a [`DeviceSnapshot`]: its identifier
//! plus the current value of each tracked [`Attribute`].

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{HttpClientFactory, HttpConfig, HttpFanClient};

use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;

use serde_json::{Map, Value};

use crate::error::{ParseError, ProtocolError};
use crate::types::{Attribute, AttributeValue, DeviceId};

/// State reported by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    client_id: DeviceId,
    values: BTreeMap<Attribute, AttributeValue>,
    extra: Map<String, Value>,
}

impl DeviceSnapshot {
    /// Builds a snapshot from a decoded device response.
    ///
    /// The identifier is read from `clientId`, falling back to `id`. Fields
    /// that are tracked attributes are normalized; anything else is kept as
    /// is and available through [`DeviceSnapshot::extra`].
    ///
    /// # Errors
    ///
    /// Returns `ParseError::UnexpectedFormat` if the value is not an object,
    /// or `ParseError::MissingField` if it carries no identifier.
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        let Value::Object(object) = value else {
            return Err(ParseError::UnexpectedFormat(
                "device response is not a JSON object".to_string(),
            ));
        };

        let client_id = ["clientId", "id"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .filter(|id| !id.trim().is_empty())
            .map(DeviceId::new)
            .ok_or_else(|| ParseError::MissingField("clientId".to_string()))?;

        let mut values = BTreeMap::new();
        let mut extra = Map::new();
        for (key, value) in object {
            match Attribute::from_field(&key).and_then(|attr| {
                AttributeValue::from_json(&value).map(|v| (attr, v))
            }) {
                Some((attr, v)) => {
                    values.insert(attr, v);
                }
                None => {
                    extra.insert(key, value);
                }
            }
        }

        Ok(Self {
            client_id,
            values,
            extra,
        })
    }

    /// Parses a snapshot from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the text is not a valid snapshot.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn client_id(&self) -> &DeviceId {
        &self.client_id
    }

    /// Returns the value of one attribute, if reported.
    #[must_use]
    pub fn get(&self, attribute: Attribute) -> Option<&AttributeValue> {
        self.values.get(&attribute)
    }

    /// Returns every reported attribute value.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<Attribute, AttributeValue> {
        &self.values
    }

    /// Consumes the snapshot, returning its attribute values.
    #[must_use]
    pub fn into_values(self) -> BTreeMap<Attribute, AttributeValue> {
        self.values
    }

    /// Returns the fields that are not tracked attributes.
    #[must_use]
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Returns the model reported by the device, if any.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.extra.get("model").and_then(Value::as_str)
    }
}

/// A request/response client for one device.
///
/// Clients do not retry; a failed request is reported to the caller, which
/// decides whether it counts against the device.
pub trait FanClient: Send + Sync + 'static {
    /// Returns the address this client talks to.
    fn address(&self) -> Ipv4Addr;

    /// Queries the device state.
    fn info(&self) -> impl Future<Output = Result<DeviceSnapshot, ProtocolError>> + Send;

    /// Changes one attribute, returning the device acknowledgement.
    fn set(
        &self,
        attribute: Attribute,
        value: AttributeValue,
    ) -> impl Future<Output = Result<Value, ProtocolError>> + Send;

    /// Asks the device to reboot. Failures are ignored.
    fn reboot(&self) -> impl Future<Output = ()> + Send;
}

/// Creates device clients.
pub trait ClientFactory: Send + Sync + 'static {
    /// The client type produced by this factory.
    type Client: FanClient;

    /// Creates a client for the device at `address`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if a client cannot be built for the address.
    fn client_for(&self, address: Ipv4Addr) -> Result<Self::Client, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_from_device_response() {
        let snapshot = DeviceSnapshot::from_json(
            r#"{
                "clientId": "MF_A8032ADD0220",
                "fanDirection": "forward",
                "fanOn": true,
                "fanSpeed": 3,
                "lightBrightness": 100,
                "lightOn": false,
                "timezone": "EST5EDT",
                "wind": false,
                "windSpeed": 2
            }"#,
        )
        .unwrap();

        assert_eq!(snapshot.client_id().as_str(), "MF_A8032ADD0220");
        assert_eq!(
            snapshot.get(Attribute::FanSpeed),
            Some(&AttributeValue::Number(3))
        );
        assert_eq!(
            snapshot.get(Attribute::FanDirection),
            Some(&AttributeValue::Text("forward".to_string()))
        );
        assert_eq!(snapshot.values().len(), 7);
        assert_eq!(
            snapshot.extra().get("timezone"),
            Some(&Value::String("EST5EDT".to_string()))
        );
        assert!(snapshot.extra().get("clientId").is_some());
    }

    #[test]
    fn snapshot_accepts_id_field() {
        let snapshot =
            DeviceSnapshot::from_json(r#"{"id": "ab1234", "fanOn": false, "fanSpeed": 2}"#)
                .unwrap();
        assert_eq!(snapshot.client_id().as_str(), "AB1234");
        assert_eq!(snapshot.values().len(), 2);
    }

    #[test]
    fn snapshot_requires_identifier() {
        let err = DeviceSnapshot::from_json(r#"{"fanOn": true}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(_)));
    }

    #[test]
    fn snapshot_rejects_non_objects() {
        let err = DeviceSnapshot::from_json("[1, 2]").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedFormat(_)));
    }
}
