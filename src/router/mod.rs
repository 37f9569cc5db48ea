// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic classification for inbound bus messages.
//!
//! Configured topic templates are compiled once into [`TopicPattern`]s. The
//! [`TopicRouter`] then classifies each inbound message into a [`Route`],
//! checking the templates in a fixed priority order:
//!
//! ```text
//! inbound topic
//!      ↓
//! heartbeat? ──────────→ Route::Heartbeat      (ignored)
//!      ↓
//! new-device template? → Route::NewDevice      (probe the announced address)
//!      ↓
//! bus-status topic? ───→ Route::BusStatus      (republish presentation)
//!      ↓
//! set template? ───────→ Route::Set            (device command)
//!      ↓
//! command template? ───→ Route::Management     (scan / fullscan)
//!      ↓
//! Route::Unrecognized
//! ```

use crate::error::ConfigError;

/// One segment of a compiled topic template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `+`, matches exactly one segment.
    Single,
    /// `#`, matches the rest of the topic.
    Rest,
}

/// A compiled topic template.
///
/// Templates use MQTT wildcard syntax: `+` matches one segment, a trailing
/// `#` matches any number of remaining segments.
///
/// # Examples
///
/// ```
/// use fanbridge::router::TopicPattern;
///
/// let pattern = TopicPattern::compile("mf/+/set/+").unwrap();
/// assert!(pattern.matches("mf/kitchen/set/speed"));
/// assert!(!pattern.matches("mf/kitchen/speed"));
/// assert_eq!(
///     pattern.captures("mf/kitchen/set/speed"),
///     Some(vec!["kitchen", "speed"])
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    template: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Compiles a topic template.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTopic` if the template is empty, `#` is
    /// not the last segment, or a wildcard shares a segment with other text.
    pub fn compile(template: &str) -> Result<Self, ConfigError> {
        let template = template.trim();
        if template.is_empty() {
            return Err(ConfigError::InvalidTopic(template.to_string()));
        }

        let parts: Vec<&str> = template.split('/').collect();
        let last = parts.len() - 1;
        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match *part {
                "+" => Ok(Segment::Single),
                "#" if i == last => Ok(Segment::Rest),
                p if p.contains(['+', '#']) => Err(ConfigError::InvalidTopic(template.to_string())),
                p => Ok(Segment::Literal(p.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// Returns the template this pattern was compiled from.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns true if `topic` matches this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.captures(topic).is_some()
    }

    /// Matches `topic` and returns the segments captured by wildcards.
    ///
    /// A trailing `#` captures the remainder as a single string.
    #[must_use]
    pub fn captures<'a>(&self, topic: &'a str) -> Option<Vec<&'a str>> {
        let mut captured = Vec::new();
        let mut rest = Some(topic);

        for segment in &self.segments {
            if let Segment::Rest = segment {
                // `#` also matches the parent level itself
                captured.push(rest.unwrap_or(""));
                return Some(captured);
            }

            let current = rest?;
            let (part, remaining) = match current.split_once('/') {
                Some((part, remaining)) => (part, Some(remaining)),
                None => (current, None),
            };

            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Single => captured.push(part),
                _ => return None,
            }
            rest = remaining;
        }

        rest.is_none().then_some(captured)
    }
}

/// Classification of an inbound bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Our own heartbeat echoed back.
    Heartbeat,
    /// A device announced itself.
    NewDevice,
    /// The presentation layer reported its status.
    BusStatus,
    /// A device command.
    Set,
    /// A scan request.
    Management,
    /// Nothing matched.
    Unrecognized,
}

/// Topic templates a [`TopicRouter`] is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterTopics {
    /// Heartbeat topic, matched literally.
    pub heartbeat: String,
    /// Device announcement template.
    pub new_device: Option<String>,
    /// Presentation status topic, matched literally.
    pub bus_status: Option<String>,
    /// Device command template.
    pub set: Option<String>,
    /// Scan request template.
    pub management: Option<String>,
}

/// Classifies inbound messages by topic.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    heartbeat: String,
    new_device: Option<TopicPattern>,
    bus_status: Option<String>,
    set: Option<TopicPattern>,
    management: Option<TopicPattern>,
}

impl TopicRouter {
    /// Compiles the configured templates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTopic` if any template is malformed.
    pub fn new(topics: &RouterTopics) -> Result<Self, ConfigError> {
        let compile = |template: Option<&str>| template.map(TopicPattern::compile).transpose();

        let router = Self {
            heartbeat: topics.heartbeat.clone(),
            new_device: compile(topics.new_device.as_deref())?,
            bus_status: topics.bus_status.clone(),
            set: compile(topics.set.as_deref())?,
            management: compile(topics.management.as_deref())?,
        };

        tracing::debug!(
            heartbeat = %router.heartbeat,
            new_device = ?router.new_device.as_ref().map(TopicPattern::template),
            set = ?router.set.as_ref().map(TopicPattern::template),
            management = ?router.management.as_ref().map(TopicPattern::template),
            "Compiled topic router"
        );

        Ok(router)
    }

    /// Classifies a message by its topic.
    #[must_use]
    pub fn classify(&self, topic: &str) -> Route {
        let matches = |pattern: &Option<TopicPattern>| {
            pattern.as_ref().is_some_and(|p| p.matches(topic))
        };

        if topic == self.heartbeat {
            Route::Heartbeat
        } else if matches(&self.new_device) {
            Route::NewDevice
        } else if self.bus_status.as_deref() == Some(topic) {
            Route::BusStatus
        } else if matches(&self.set) {
            Route::Set
        } else if matches(&self.management) {
            Route::Management
        } else {
            Route::Unrecognized
        }
    }

    /// Returns every topic the bridge must subscribe to.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = vec![self.heartbeat.clone()];
        topics.extend(self.new_device.iter().map(|p| p.template().to_string()));
        topics.extend(self.bus_status.iter().cloned());
        topics.extend(self.set.iter().map(|p| p.template().to_string()));
        topics.extend(self.management.iter().map(|p| p.template().to_string()));
        topics
    }
}
