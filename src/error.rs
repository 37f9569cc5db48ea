// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the bridge.
//!
//! Per-device failures (unreachable hosts, rejected requests, bad command
//! payloads) are handled where they happen and only logged. The two fatal
//! variants, [`Error::Inactivity`] and [`Error::TransportClosed`], end the
//! run loop and decide the process exit status.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A value could not be coerced for a device attribute.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// A device or bus request failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A device response could not be understood.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No bus traffic was observed within the inactivity window.
    #[error("no bus activity for {idle_secs}s")]
    Inactivity {
        /// Seconds since the last observed bus message.
        idle_secs: u64,
    },

    /// The bus connection was closed.
    #[error("bus connection closed: {0}")]
    TransportClosed(String),
}

impl Error {
    /// Exit status used when this error terminates the process.
    ///
    /// Inactivity gets its own status so a supervisor can tell a stale
    /// connection apart from other failures.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Inactivity { .. } => 10,
            _ => 1,
        }
    }
}

/// Errors raised while coercing command payloads into attribute values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The payload does not start with an integer.
    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    /// The name is not a known attribute.
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),
}

/// Errors related to device and bus communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The host did not answer at all.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The device answered but refused the request.
    #[error("request rejected with status {status}: {reason}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Status reason phrase.
        reason: String,
    },

    /// The operation is not supported by the device.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The device answered with something that is not a state snapshot.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Connection to the broker or device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ProtocolError {
    /// Returns true if the failure means nothing is listening at the address.
    ///
    /// Discovery does not remember unreachable addresses, so they are probed
    /// again on the next pass.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        match self {
            #[cfg(feature = "http")]
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Unreachable(_) => true,
            _ => false,
        }
    }
}

/// Errors related to parsing device responses and bus payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing.
    #[error("missing field: {0}")]
    MissingField(String),

    /// Unexpected payload shape.
    #[error("unexpected format: {0}")]
    UnexpectedFormat(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for the expected layout.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// An address range could not be parsed or is too large.
    #[error("badly formed range {range:?}: {reason}")]
    InvalidRange {
        /// The offending range as written.
        range: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The slug separator is not one of the allowed characters.
    #[error("invalid slug separator: {0:?}")]
    InvalidSeparator(String),

    /// A duration value could not be parsed.
    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration {
        /// The configuration key.
        field: &'static str,
        /// The value as written.
        value: String,
    },

    /// A topic template is malformed.
    #[error("invalid topic template {0:?}")]
    InvalidTopic(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
