// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identifiers and slugs.

use std::fmt;

/// Characters allowed as slug separators.
pub const SLUG_SEPARATORS: [char; 11] = ['_', '-', '$', ':', ';', '!', '@', '#', '%', '^', '~'];

/// Canonical identifier reported by a device.
///
/// Identifiers are trimmed and upper-cased on construction, so the same
/// device always maps to the same key regardless of how it was written.
///
/// # Examples
///
/// ```
/// use fanbridge::types::DeviceId;
///
/// let id = DeviceId::new(" mf_a8032add0220 ");
/// assert_eq!(id.as_str(), "MF_A8032ADD0220");
/// assert_eq!(id, DeviceId::new("MF_A8032ADD0220"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a canonical identifier.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the last `n` characters of the identifier.
    #[must_use]
    pub fn tail(&self, n: usize) -> &str {
        let start = self
            .0
            .char_indices()
            .rev()
            .nth(n.saturating_sub(1))
            .map_or(0, |(i, _)| i);
        &self.0[start..]
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Turns a display name into a topic-safe slug.
///
/// The result is lower-case ASCII alphanumerics with runs of anything else
/// collapsed into a single `separator`, and no leading or trailing
/// separator.
///
/// # Examples
///
/// ```
/// use fanbridge::types::slugify;
///
/// assert_eq!(slugify("Living Room Fan", '_'), "living_room_fan");
/// assert_eq!(slugify("MF_FAN", '-'), "mf-fan");
/// ```
#[must_use]
pub fn slugify(name: &str, separator: char) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push(separator);
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    slug
}
