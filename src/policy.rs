// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Notification policy: global defaults, sparse per-entity overrides, and
//! resolution into an effective [`Policy`].
//!
//! # Example
//!
//! ```
//! use cert_expiry_monitor::policy::{resolve, EntityOverride, EntityOverrides, FollowUp, GlobalPolicy};
//!
//! let global = GlobalPolicy::new("hostmaster@example.com")
//!     .with_warning_days(14)
//!     .with_follow_up("24h".parse().unwrap());
//!
//! let mut overrides = EntityOverrides::new();
//! overrides.insert(
//!     "shop.example".to_string(),
//!     EntityOverride {
//!         recipients: vec!["shop-team@example.com".to_string()],
//!         warning_days: Some(30),
//!         follow_up: Some(FollowUp::Disabled),
//!     },
//! );
//!
//! let policy = resolve("shop.example", &global, &overrides);
//! assert_eq!(policy.recipients, ["hostmaster@example.com", "shop-team@example.com"]);
//! assert_eq!(policy.warning_days, 30);
//! assert!(policy.follow_up.is_disabled());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Default number of days before expiry at which notification begins.
pub const DEFAULT_WARNING_DAYS: u32 = 14;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// A positive delay written as a systemd-style time span.
///
/// Accepted forms: `90s`, `30min`, `30m`, `12h`, `1d`, `2w`, combinations
/// either compact (`1d12h`) or separated by whitespace (`1h 30min`), and a
/// bare integer meaning seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval(Duration);

impl Interval {
    /// Create an interval from a duration. Zero is rejected.
    pub fn new(duration: Duration) -> Option<Self> {
        (duration.as_secs() > 0).then_some(Self(duration))
    }

    /// Interval length.
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Whole seconds, the unit handed to the re-invocation trigger.
    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }
}

impl FromStr for Interval {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MonitorError::InvalidInterval(s.to_string());
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let mut total: u64 = 0;
        for token in trimmed.split_whitespace() {
            // A token is one or more `<digits><unit>` runs, e.g. `1d12h`.
            let mut rest = token;
            while !rest.is_empty() {
                let digits_end = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(rest.len());
                let (digits, after) = rest.split_at(digits_end);
                let unit_end = after
                    .find(|c: char| c.is_ascii_digit())
                    .unwrap_or(after.len());
                let (unit, next) = after.split_at(unit_end);

                let value: u64 = digits.parse().map_err(|_| invalid())?;
                let factor = match unit {
                    "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
                    "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
                    "h" | "hr" | "hour" | "hours" => HOUR,
                    "d" | "day" | "days" => DAY,
                    "w" | "week" | "weeks" => WEEK,
                    _ => return Err(invalid()),
                };
                total = value
                    .checked_mul(factor)
                    .and_then(|secs| total.checked_add(secs))
                    .ok_or_else(invalid)?;
                rest = next;
            }
        }

        Self::new(Duration::from_secs(total)).ok_or_else(invalid)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remaining = self.0.as_secs();
        let mut parts = Vec::new();
        for (unit, size) in [("d", DAY), ("h", HOUR), ("min", MINUTE), ("s", 1)] {
            if remaining >= size {
                parts.push(format!("{}{}", remaining / size, unit));
                remaining %= size;
            }
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// Follow-up setting: either disabled or re-run after an interval.
///
/// In configuration files this is a string; the empty string means
/// [`FollowUp::Disabled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FollowUp {
    /// Send a single warning, never re-run on our own.
    #[default]
    Disabled,

    /// Re-run the whole evaluation after the interval.
    After(Interval),
}

impl FollowUp {
    /// The interval, if follow-ups are enabled.
    pub fn interval(&self) -> Option<Interval> {
        match self {
            Self::Disabled => None,
            Self::After(interval) => Some(*interval),
        }
    }

    /// Returns true for [`FollowUp::Disabled`].
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

impl FromStr for FollowUp {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Ok(Self::Disabled)
        } else {
            s.parse().map(Self::After)
        }
    }
}

impl TryFrom<String> for FollowUp {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FollowUp> for String {
    fn from(value: FollowUp) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FollowUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => Ok(()),
            Self::After(interval) => interval.fmt(f),
        }
    }
}

/// Global defaults, the `[policy]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalPolicy {
    /// Address that receives every notification. Always the first recipient.
    pub master_recipient: String,

    /// `From` address of outgoing notifications.
    #[serde(default = "default_sender")]
    pub sender: String,

    /// Days before expiry at which notification begins.
    #[serde(default = "default_warning_days")]
    pub warning_days: u32,

    /// Delay before a notifying run re-invokes itself.
    #[serde(default, rename = "follow_up_interval")]
    pub follow_up: FollowUp,
}

fn default_sender() -> String {
    "cert-monitor@${FQDN}".to_string()
}

fn default_warning_days() -> u32 {
    DEFAULT_WARNING_DAYS
}

impl GlobalPolicy {
    /// Create a global policy with the given master recipient and defaults
    /// for everything else (14 days, follow-ups disabled).
    pub fn new(master_recipient: impl Into<String>) -> Self {
        Self {
            master_recipient: master_recipient.into(),
            sender: default_sender(),
            warning_days: DEFAULT_WARNING_DAYS,
            follow_up: FollowUp::Disabled,
        }
    }

    /// Set the sender address.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Set the warning window in days.
    pub fn with_warning_days(mut self, days: u32) -> Self {
        self.warning_days = days;
        self
    }

    /// Set the follow-up setting.
    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = follow_up;
        self
    }
}

/// Sparse per-entity settings. Every unset field inherits the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityOverride {
    /// Extra recipients, appended after the master recipient.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,

    /// Warning window for this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_days: Option<u32>,

    /// Follow-up for this entity. `Some(FollowUp::Disabled)` (an empty string
    /// in the file) is distinct from `None` (inherit).
    #[serde(
        default,
        rename = "follow_up_interval",
        skip_serializing_if = "Option::is_none"
    )]
    pub follow_up: Option<FollowUp>,
}

/// Overrides keyed by entity id.
pub type EntityOverrides = BTreeMap<String, EntityOverride>;

/// Effective settings for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Days before expiry at which notification begins.
    pub warning_days: u32,
    /// Recipients in send order, master first. Duplicates are kept.
    pub recipients: Vec<String>,
    /// Effective follow-up setting.
    pub follow_up: FollowUp,
}

/// Merge global defaults and the entity's override into an effective policy.
///
/// Pure: identical inputs always yield an identical [`Policy`].
pub fn resolve(entity_id: &str, global: &GlobalPolicy, overrides: &EntityOverrides) -> Policy {
    let entry = overrides.get(entity_id);

    let mut recipients = vec![global.master_recipient.clone()];
    if let Some(entry) = entry {
        recipients.extend(entry.recipients.iter().cloned());
    }

    Policy {
        warning_days: entry
            .and_then(|e| e.warning_days)
            .unwrap_or(global.warning_days),
        recipients,
        follow_up: entry.and_then(|e| e.follow_up).unwrap_or(global.follow_up),
    }
}
