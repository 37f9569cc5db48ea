// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device attributes and their values.
//!
//! Every tracked device property is an [`Attribute`]. Each attribute knows
//! the field name used by the device protocol, the suffix used on the bus
//! and the kind of value it carries. Names coming from either side are
//! normalized to an `Attribute` once, at the boundary.

use std::fmt;

use serde_json::Value;

use crate::error::ValueError;

/// Values accepted for the fan direction.
pub const DIRECTIONS: &[&str] = &["forward", "reverse"];

/// A tracked device property.
///
/// # Examples
///
/// ```
/// use fanbridge::types::Attribute;
///
/// let speed = Attribute::from_suffix("speed").unwrap();
/// assert_eq!(speed, Attribute::FanSpeed);
/// assert_eq!(speed.field(), "fanSpeed");
/// assert_eq!(Attribute::from_field("FANSPEED"), Some(Attribute::FanSpeed));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    /// Fan rotation speed.
    FanSpeed,
    /// Fan rotation direction.
    FanDirection,
    /// Light power.
    LightOn,
    /// Fan power.
    FanOn,
    /// Light brightness (0-100).
    LightBrightness,
    /// Breeze mode.
    Wind,
    /// Breeze mode intensity.
    WindSpeed,
}

/// The kind of value an attribute carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Published as `on`/`off`.
    Boolean,
    /// Published as a decimal integer.
    Number,
    /// One of a fixed set of strings, passed through unchanged.
    Enumerated(&'static [&'static str]),
}

impl Attribute {
    /// All attributes, in publish order.
    pub const ALL: [Self; 7] = [
        Self::FanSpeed,
        Self::FanDirection,
        Self::LightOn,
        Self::FanOn,
        Self::LightBrightness,
        Self::Wind,
        Self::WindSpeed,
    ];

    /// Returns the field name used by the device protocol.
    #[must_use]
    pub const fn field(self) -> &'static str {
        match self {
            Self::FanSpeed => "fanSpeed",
            Self::FanDirection => "fanDirection",
            Self::LightOn => "lightOn",
            Self::FanOn => "fanOn",
            Self::LightBrightness => "lightBrightness",
            Self::Wind => "wind",
            Self::WindSpeed => "windSpeed",
        }
    }

    /// Returns the topic suffix used on the bus.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::FanSpeed => "speed",
            Self::FanDirection => "direction",
            Self::LightOn => "light",
            Self::FanOn => "fan",
            Self::LightBrightness => "brightness",
            Self::Wind => "wind",
            Self::WindSpeed => "wind_speed",
        }
    }

    /// Returns the kind of value this attribute carries.
    #[must_use]
    pub const fn kind(self) -> AttributeKind {
        match self {
            Self::FanSpeed | Self::LightBrightness | Self::WindSpeed => AttributeKind::Number,
            Self::FanDirection => AttributeKind::Enumerated(DIRECTIONS),
            Self::LightOn | Self::FanOn | Self::Wind => AttributeKind::Boolean,
        }
    }

    /// Looks up an attribute by topic suffix, ignoring case.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.suffix().eq_ignore_ascii_case(suffix))
    }

    /// Looks up an attribute by protocol field name, ignoring case.
    #[must_use]
    pub fn from_field(field: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.field().eq_ignore_ascii_case(field))
    }

    /// Coerces a bus payload into a value of this attribute's kind.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidNumber` if a numeric attribute receives a
    /// payload that does not start with an integer.
    pub fn coerce(self, payload: &str) -> Result<AttributeValue, ValueError> {
        match self.kind() {
            AttributeKind::Boolean => Ok(AttributeValue::Bool(is_true(payload))),
            AttributeKind::Number => parse_leading_int(payload)
                .map(AttributeValue::Number)
                .ok_or_else(|| ValueError::InvalidNumber(payload.to_string())),
            AttributeKind::Enumerated(_) => Ok(AttributeValue::Text(payload.trim().to_string())),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// The value of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Number(i64),
    /// A string value.
    Text(String),
}

impl AttributeValue {
    /// Reads a value from a JSON device field.
    ///
    /// Returns `None` for null, arrays and objects.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            // Fractional values are truncated
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts the value into the JSON sent to the device.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::from(*n),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Encodes the value for publishing under the given attribute.
    ///
    /// Boolean attributes are always published as `on`/`off`, whatever
    /// representation the device used.
    #[must_use]
    pub fn to_payload(&self, attribute: Attribute) -> String {
        match (attribute.kind(), self) {
            (AttributeKind::Boolean, Self::Bool(b)) => on_off(*b).to_string(),
            (AttributeKind::Boolean, Self::Number(n)) => on_off(*n != 0).to_string(),
            (AttributeKind::Boolean, Self::Text(s)) => on_off(is_true(s)).to_string(),
            (_, value) => value.to_string(),
        }
    }

    /// Returns the integer value, if this is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => f.write_str(on_off(*b)),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Interprets a payload as a boolean.
///
/// `on`, `true`, `yes` and `1` (any case, surrounding whitespace ignored)
/// are true; everything else is false.
#[must_use]
pub fn is_true(payload: &str) -> bool {
    let payload = payload.trim();
    ["on", "true", "yes", "1"]
        .iter()
        .any(|t| payload.eq_ignore_ascii_case(t))
}

/// Returns the bus encoding of a boolean.
#[must_use]
pub const fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

/// Parses the integer at the start of a payload, ignoring anything after it.
fn parse_leading_int(payload: &str) -> Option<i64> {
    let trimmed = payload.trim_start();
    let digits_start = usize::from(trimmed.starts_with(['-', '+']));
    let end = trimmed[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed.len(), |i| i + digits_start);
    if end == digits_start {
        return None;
    }
    trimmed[..end].parse().ok()
}
