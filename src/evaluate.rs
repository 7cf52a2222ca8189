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

//! Expiry evaluation: remaining days per entity and the notify decision.

use std::time::SystemTime;

use crate::policy::Policy;
use crate::source::Entity;

/// Seconds per day used for the days-remaining computation.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome of evaluating one entity against its effective policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDecision {
    /// Entity id.
    pub entity_id: String,
    /// Certificate expiry.
    pub expiry: SystemTime,
    /// Whole days until expiry, negative once expired.
    pub days_remaining: i64,
    /// Effective policy the decision was made with.
    pub policy: Policy,
    /// `days_remaining <= policy.warning_days`.
    pub should_notify: bool,
}

/// Signed seconds from `now` until `instant`.
pub fn seconds_until(instant: SystemTime, now: SystemTime) -> i64 {
    match instant.duration_since(now) {
        Ok(ahead) => i64::try_from(ahead.as_secs()).unwrap_or(i64::MAX),
        Err(behind) => {
            let behind = behind.duration();
            // Round partial seconds away from zero so floor division stays floor.
            let secs = behind.as_secs() + u64::from(behind.subsec_nanos() > 0);
            i64::try_from(secs).map(|s| -s).unwrap_or(i64::MIN)
        }
    }
}

/// Whole days from `now` until `expiry`, rounded towards negative infinity.
///
/// One second after expiry is day `-1`; anything up to one day before expiry
/// is day `0`.
pub fn days_remaining(expiry: SystemTime, now: SystemTime) -> i64 {
    seconds_until(expiry, now).div_euclid(SECONDS_PER_DAY)
}

/// Decide whether `entity` must be notified under `policy`.
pub fn evaluate(entity: &Entity, policy: Policy, now: SystemTime) -> NotificationDecision {
    let days_remaining = days_remaining(entity.expiry, now);
    let should_notify = days_remaining <= i64::from(policy.warning_days);

    NotificationDecision {
        entity_id: entity.id.clone(),
        expiry: entity.expiry,
        days_remaining,
        policy,
        should_notify,
    }
}
