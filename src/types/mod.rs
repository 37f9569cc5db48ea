// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared across the bridge.
//!
//! # Types
//!
//! - [`Attribute`] - A tracked device property (fan power, speed, light...)
//! - [`AttributeValue`] - The value of one attribute
//! - [`DeviceId`] - Canonical device identifier
//! - [`slugify`] - Topic-safe slug generation

mod attribute;
mod identifier;

pub use attribute::{Attribute, AttributeKind, AttributeValue, DIRECTIONS, is_true, on_off};
pub use identifier::{DeviceId, SLUG_SEPARATORS, slugify};
