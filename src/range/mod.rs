// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scan range parsing and expansion.
//!
//! A [`RangeSpec`] describes a set of IPv4 candidates for discovery:
//!
//! - a literal address (`192.168.1.20`)
//! - a CIDR block (`192.168.1.0/24`), excluding network and broadcast
//! - an inclusive span (`192.168.1.10-192.168.1.40`, or a two element array)
//! - a hostname, resolved through DNS
//!
//! # Examples
//!
//! ```
//! use fanbridge::range::RangeSpec;
//! use std::net::Ipv4Addr;
//!
//! let spec: RangeSpec = "192.168.1.0/29".parse().unwrap();
//! let hosts = spec.hosts().unwrap();
//! assert_eq!(hosts.first(), Some(&Ipv4Addr::new(192, 168, 1, 1)));
//! assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 1, 6)));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// Largest number of addresses a single range may expand to.
pub const MAX_RANGE_SIZE: u64 = 65_536;

/// A configured set of scan candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSpec {
    /// A single address.
    Address(Ipv4Addr),
    /// A CIDR block.
    Cidr {
        /// Any address inside the block.
        network: Ipv4Addr,
        /// Prefix length (0-32).
        prefix: u8,
    },
    /// An inclusive address span.
    Span {
        /// First address.
        start: Ipv4Addr,
        /// Last address.
        end: Ipv4Addr,
    },
    /// A hostname resolved at expansion time.
    Hostname(String),
}

impl RangeSpec {
    /// Builds an inclusive span from a two element pair.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRange` if either side is not an address.
    pub fn pair(start: &str, end: &str) -> Result<Self, ConfigError> {
        let original = format!("[{start}, {end}]");
        let parse = |s: &str| {
            s.trim()
                .parse::<Ipv4Addr>()
                .map_err(|_| invalid(&original, format!("{s:?} is not an IPv4 address")))
        };
        let start = parse(start)?;
        let end = parse(end)?;
        if start > end {
            return Err(invalid(&original, "start is after end"));
        }
        Ok(Self::Span { start, end })
    }

    /// Expands the range into addresses without touching the network.
    ///
    /// Hostnames expand to nothing here; use [`RangeSpec::expand`] to resolve
    /// them.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRange` if the range covers more than
    /// [`MAX_RANGE_SIZE`] addresses.
    pub fn hosts(&self) -> Result<Vec<Ipv4Addr>, ConfigError> {
        match self {
            Self::Address(addr) => Ok(vec![*addr]),
            Self::Cidr { network, prefix } => {
                let mask = prefix_mask(*prefix);
                let first = u32::from(*network) & mask;
                let last = first | !mask;
                check_size(self, first, last)?;
                // /31 and /32 have no network or broadcast address
                let (first, last) = if *prefix >= 31 {
                    (first, last)
                } else {
                    (first + 1, last - 1)
                };
                Ok((first..=last).map(Ipv4Addr::from).collect())
            }
            Self::Span { start, end } => {
                let (first, last) = (u32::from(*start), u32::from(*end));
                check_size(self, first, last)?;
                Ok((first..=last).map(Ipv4Addr::from).collect())
            }
            Self::Hostname(_) => Ok(Vec::new()),
        }
    }

    /// Expands the range, resolving hostnames through DNS.
    ///
    /// Only IPv4 results of a lookup are kept.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRange` if the range is too large or the
    /// hostname cannot be resolved.
    pub async fn expand(&self) -> Result<Vec<Ipv4Addr>, ConfigError> {
        match self {
            Self::Hostname(host) => resolve(host)
                .await
                .ok_or_else(|| invalid(host, "hostname did not resolve to an IPv4 address")),
            _ => self.hosts(),
        }
    }
}

impl FromStr for RangeSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid(s, "empty range"));
        }

        if s.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return s
                .parse()
                .map(Self::Address)
                .map_err(|_| invalid(s, "not an IPv4 address"));
        }

        if let Some((host, prefix)) = s.split_once('/') {
            let network = host
                .parse::<Ipv4Addr>()
                .map_err(|_| invalid(s, format!("invalid network address {host:?}")))?;
            let prefix = prefix
                .parse::<u8>()
                .map_err(|_| invalid(s, format!("invalid prefix length {prefix:?}")))?;
            if prefix > 32 {
                return Err(invalid(s, "prefix length must be <= 32"));
            }
            return Ok(Self::Cidr { network, prefix });
        }

        if let Some((start, end)) = s.split_once('-')
            && let (Ok(_), Ok(_)) = (start.parse::<Ipv4Addr>(), end.parse::<Ipv4Addr>())
        {
            return Self::pair(start, end).map_err(|e| match e {
                ConfigError::InvalidRange { reason, .. } => invalid(s, reason),
                other => other,
            });
        }

        if is_hostname(s) {
            Ok(Self::Hostname(s.to_string()))
        } else {
            Err(invalid(s, "not an address, CIDR block, span or hostname"))
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Cidr { network, prefix } => write!(f, "{network}/{prefix}"),
            Self::Span { start, end } => write!(f, "{start}-{end}"),
            Self::Hostname(host) => f.write_str(host),
        }
    }
}

/// A range as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RangeEntry {
    /// Address, CIDR block, dashed span or hostname.
    Single(String),
    /// Inclusive span as `[start, end]`.
    Pair([String; 2]),
}

impl RangeEntry {
    /// Parses the entry into a [`RangeSpec`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRange` if the entry is malformed.
    pub fn parse(&self) -> Result<RangeSpec, ConfigError> {
        match self {
            Self::Single(s) => s.parse(),
            Self::Pair([start, end]) => RangeSpec::pair(start, end),
        }
    }
}

/// Expands every range, keeping first-seen order and dropping duplicates.
///
/// A range that fails to expand is logged and skipped.
pub async fn expand_all(specs: &[RangeSpec]) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for spec in specs {
        match spec.expand().await {
            Ok(hosts) => {
                tracing::debug!(range = %spec, count = hosts.len(), "Expanded scan range");
                out.extend(hosts.into_iter().filter(|addr| seen.insert(*addr)));
            }
            Err(e) => tracing::warn!(range = %spec, error = %e, "Skipping scan range"),
        }
    }

    out
}

/// Prefix scanned around each local interface address.
///
/// Interface enumeration does not report netmasks.
pub const LOCAL_PREFIX: u8 = 24;

/// Returns the ranges scanned when none are configured.
///
/// One /24 per IPv4 interface of this host, or nothing if enumeration fails.
#[must_use]
pub fn local_ranges() -> Vec<RangeSpec> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => {
            let ranges = interface_ranges(interfaces);
            if ranges.is_empty() {
                tracing::warn!("No local IPv4 interface found, nothing to scan");
            }
            ranges
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not list network interfaces, nothing to scan");
            Vec::new()
        }
    }
}

/// Maps interface addresses to the networks around them.
///
/// Loopback, link-local and IPv6 addresses are skipped, and interfaces
/// sharing a network yield a single range.
#[must_use]
pub fn interface_ranges<I>(interfaces: I) -> Vec<RangeSpec>
where
    I: IntoIterator<Item = (String, IpAddr)>,
{
    let mut seen = HashSet::new();
    let mut ranges = Vec::new();
    for (name, ip) in interfaces {
        let IpAddr::V4(addr) = ip else {
            continue;
        };
        if addr.is_loopback() || addr.is_unspecified() || addr.is_link_local() {
            continue;
        }
        let network = Ipv4Addr::from(u32::from(addr) & prefix_mask(LOCAL_PREFIX));
        if seen.insert(network) {
            tracing::debug!(interface = %name, %network, "Scanning local network");
            ranges.push(RangeSpec::Cidr {
                network,
                prefix: LOCAL_PREFIX,
            });
        }
    }
    ranges
}

async fn resolve(host: &str) -> Option<Vec<Ipv4Addr>> {
    let addrs = tokio::net::lookup_host((host, 0)).await.ok()?;
    let mut seen = HashSet::new();
    let v4: Vec<_> = addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .filter(|addr| seen.insert(*addr))
        .collect();
    (!v4.is_empty()).then_some(v4)
}

/// Resolves a hostname to its first IPv4 address.
pub async fn resolve_first(host: &str) -> Option<Ipv4Addr> {
    resolve(host).await.and_then(|v| v.into_iter().next())
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn check_size(spec: &RangeSpec, first: u32, last: u32) -> Result<(), ConfigError> {
    let size = u64::from(last) - u64::from(first) + 1;
    if size > MAX_RANGE_SIZE {
        return Err(invalid(
            &spec.to_string(),
            format!("{size} addresses exceeds the limit of {MAX_RANGE_SIZE}"),
        ));
    }
    Ok(())
}

fn is_hostname(s: &str) -> bool {
    s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn invalid(range: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRange {
        range: range.to_string(),
        reason: reason.into(),
    }
}
