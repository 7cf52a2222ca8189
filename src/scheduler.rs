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

//! Follow-up scheduling.
//!
//! The monitor never sleeps or keeps a timer of its own. When a run sent at
//! least one notification it asks an external trigger, through a
//! [`SchedulerPort`], to start the whole process again after a delay. The
//! next run re-reads every certificate, so a renewed certificate simply stops
//! being notified and the chain of follow-ups ends by itself.
//!
//! A run issues at most one follow-up request, however many entities
//! notified. Requests reuse one unit name so a pending follow-up is replaced
//! rather than duplicated.
//!
//! # Delay selection
//!
//! | [`FollowUpMode`]      | delay                                              |
//! |-----------------------|----------------------------------------------------|
//! | `Global` (default)    | the global `follow_up_interval`, overrides ignored |
//! | `ShortestEffective`   | shortest enabled interval among notified entities  |

use std::collections::BTreeSet;
use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{MonitorError, Result};
use crate::evaluate::NotificationDecision;
use crate::policy::{GlobalPolicy, Interval};

/// Default transient unit name for follow-up runs.
pub const DEFAULT_FOLLOW_UP_UNIT: &str = "cert-monitor-followup";

/// How the follow-up delay of a run is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpMode {
    /// Use the global interval only. Per-entity follow-up overrides affect
    /// the resolved policy but not the scheduling decision.
    #[default]
    Global,

    /// Use the shortest enabled effective interval among the entities that
    /// notified in this run.
    ShortestEffective,
}

/// Aggregate of one run, consumed by the scheduler and then discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Entities notified in this run.
    pub notified: BTreeSet<String>,
    /// Delay before the next run, `None` to rely on the periodic trigger.
    pub next_run_delay: Option<Interval>,
}

/// Build the run outcome from every decision of the run.
pub fn plan_follow_up(
    decisions: &[NotificationDecision],
    global: &GlobalPolicy,
    mode: FollowUpMode,
) -> RunOutcome {
    let notifying: Vec<&NotificationDecision> =
        decisions.iter().filter(|d| d.should_notify).collect();

    let notified: BTreeSet<String> = notifying.iter().map(|d| d.entity_id.clone()).collect();

    let next_run_delay = if notifying.is_empty() {
        None
    } else {
        match mode {
            FollowUpMode::Global => global.follow_up.interval(),
            FollowUpMode::ShortestEffective => notifying
                .iter()
                .filter_map(|d| d.policy.follow_up.interval())
                .min(),
        }
    };

    RunOutcome {
        notified,
        next_run_delay,
    }
}

/// Per-run state. `NoFollowUp`, `FollowUpScheduled` and `FollowUpFailed`
/// are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Not started.
    Idle,
    /// Reading certificates, evaluating and dispatching.
    Evaluating,
    /// Run complete, the periodic trigger takes over.
    NoFollowUp,
    /// One follow-up run was requested.
    FollowUpScheduled {
        /// Requested delay.
        delay: Interval,
    },
    /// The trigger refused the request; the reminder chain is broken until
    /// the next periodic run.
    FollowUpFailed {
        /// Requested delay.
        delay: Interval,
        /// Error returned by the port.
        error: String,
    },
}

impl RunState {
    /// Returns true for the states that end a run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Evaluating)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::NoFollowUp => write!(f, "no follow-up"),
            Self::FollowUpScheduled { delay } => write!(f, "follow-up in {delay}"),
            Self::FollowUpFailed { delay, error } => {
                write!(f, "follow-up in {delay} failed: {error}")
            }
        }
    }
}

/// Capability to re-invoke the whole process later.
#[async_trait]
pub trait SchedulerPort: Send + Sync {
    /// Request one run of `payload` after `delay`, replacing any pending
    /// request registered under `name`.
    async fn schedule_once(&self, name: &str, delay: Interval, payload: &[String]) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &str;
}

/// Turns a [`RunOutcome`] into at most one [`SchedulerPort`] request.
pub struct FollowUpScheduler {
    port: std::sync::Arc<dyn SchedulerPort>,
    unit_name: String,
    payload: Vec<String>,
}

impl FollowUpScheduler {
    /// Create a scheduler that re-runs `payload` under `unit_name`.
    pub fn new(
        port: std::sync::Arc<dyn SchedulerPort>,
        unit_name: impl Into<String>,
        payload: Vec<String>,
    ) -> Self {
        Self {
            port,
            unit_name: unit_name.into(),
            payload,
        }
    }

    /// Unit name used for requests.
    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Finish a run: request a follow-up if the outcome asks for one.
    pub async fn finish(&self, outcome: &RunOutcome) -> RunState {
        let Some(delay) = outcome.next_run_delay else {
            if outcome.notified.is_empty() {
                debug!("No entity notified, no follow-up needed");
            } else {
                info!(
                    notified = outcome.notified.len(),
                    "Follow-ups disabled, single warning sent"
                );
            }
            return RunState::NoFollowUp;
        };

        match self
            .port
            .schedule_once(&self.unit_name, delay, &self.payload)
            .await
        {
            Ok(()) => {
                info!(
                    unit = %self.unit_name,
                    backend = self.port.backend(),
                    %delay,
                    notified = outcome.notified.len(),
                    "Follow-up run scheduled"
                );
                RunState::FollowUpScheduled { delay }
            }
            Err(e) => {
                error!(
                    unit = %self.unit_name,
                    backend = self.port.backend(),
                    %delay,
                    "CRITICAL: follow-up could not be scheduled, reminders stop until the next periodic run: {}",
                    e
                );
                RunState::FollowUpFailed {
                    delay,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Port that only logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyScheduler;

#[async_trait]
impl SchedulerPort for LogOnlyScheduler {
    async fn schedule_once(&self, name: &str, delay: Interval, payload: &[String]) -> Result<()> {
        info!(
            unit = name,
            %delay,
            command = %payload.join(" "),
            "Dry run: follow-up not scheduled"
        );
        Ok(())
    }

    fn backend(&self) -> &str {
        "none"
    }
}

/// Unit name of one follow-up request: `<name>-<unix milliseconds>`.
pub fn instance_unit_name(name: &str, at: SystemTime) -> String {
    let millis = at
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{name}-{millis}")
}

/// Schedules follow-ups as transient systemd timers via `systemd-run`.
///
/// Each request becomes its own `<name>-<millis>` unit; earlier pending
/// timers matching `<name>-*` are stopped first.
#[derive(Debug, Clone)]
pub struct SystemdRunScheduler {
    systemd_run: String,
    systemctl: String,
    user: bool,
}

impl Default for SystemdRunScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemdRunScheduler {
    /// Use `systemd-run` and `systemctl` from `PATH` on the system manager.
    pub fn new() -> Self {
        Self {
            systemd_run: "systemd-run".to_string(),
            systemctl: "systemctl".to_string(),
            user: false,
        }
    }

    /// Talk to the per-user service manager instead of the system one.
    pub fn with_user(mut self, user: bool) -> Self {
        self.user = user;
        self
    }

    /// Override the binaries used.
    pub fn with_commands(
        mut self,
        systemd_run: impl Into<String>,
        systemctl: impl Into<String>,
    ) -> Self {
        self.systemd_run = systemd_run.into();
        self.systemctl = systemctl.into();
        self
    }

    /// Arguments for `systemd-run`.
    pub fn systemd_run_args(&self, name: &str, delay: Interval, payload: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        if self.user {
            args.push("--user".to_string());
        }
        args.push(format!("--unit={name}"));
        args.push(format!("--on-active={}s", delay.as_secs()));
        args.push("--timer-property=AccuracySec=1s".to_string());
        args.push(format!(
            "--description=Certificate expiry follow-up check ({delay})"
        ));
        args.push("--".to_string());
        args.extend(payload.iter().cloned());
        args
    }

    async fn systemctl(&self, verb: &str, unit: &str) {
        let mut cmd = Command::new(&self.systemctl);
        if self.user {
            cmd.arg("--user");
        }
        cmd.args(["--quiet", verb, unit]);

        // A missing previous unit is the normal case.
        match cmd.output().await {
            Ok(output) if output.status.success() => debug!(verb, unit, "systemctl ok"),
            Ok(output) => debug!(verb, unit, status = %output.status, "systemctl reported failure"),
            Err(e) => warn!(verb, unit, "Cannot run {}: {}", self.systemctl, e),
        }
    }
}

#[async_trait]
impl SchedulerPort for SystemdRunScheduler {
    async fn schedule_once(&self, name: &str, delay: Interval, payload: &[String]) -> Result<()> {
        if payload.is_empty() {
            return Err(MonitorError::scheduling("empty follow-up command"));
        }

        // Replace any pending follow-up under the same name. The run asking
        // for the next follow-up may itself be one, so the new unit gets a
        // fresh instance name.
        self.systemctl("stop", &format!("{name}-*.timer")).await;
        self.systemctl("reset-failed", &format!("{name}-*.service")).await;

        let unit = instance_unit_name(name, SystemTime::now());
        let args = self.systemd_run_args(&unit, delay, payload);
        debug!(command = %self.systemd_run, %unit, ?args, "Requesting follow-up timer");

        let output = Command::new(&self.systemd_run)
            .args(&args)
            .output()
            .await
            .map_err(|e| MonitorError::scheduling(format!("{}: {e}", self.systemd_run)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(MonitorError::scheduling(format!(
                "{} exited with {}: {}",
                self.systemd_run,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn backend(&self) -> &str {
        "systemd"
    }
}
