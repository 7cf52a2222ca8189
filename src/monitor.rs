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

//! One evaluation cycle.
//!
//! ```text
//! Idle -> Evaluating -> { NoFollowUp | FollowUpScheduled | FollowUpFailed }
//! ```
//!
//! A run reads every certificate, resolves each entity's policy, evaluates
//! expiry, dispatches notifications for the entities inside their warning
//! window and finally hands the aggregate outcome to the follow-up
//! scheduler. Nothing survives the run except the follow-up request.
//!
//! Notifications are dispatched before the follow-up is requested. A crash
//! between the two leaves recipients notified without a pending follow-up;
//! the periodic trigger picks the entity up again on its next run.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::evaluate::{NotificationDecision, evaluate};
use crate::notify::{DispatchReport, Dispatcher, LogOnlyTransport, MailTransport};
use crate::policy::{EntityOverrides, GlobalPolicy, resolve};
use crate::scheduler::{
    FollowUpMode, FollowUpScheduler, LogOnlyScheduler, RunOutcome, RunState, SchedulerPort,
    plan_follow_up,
};
use crate::source::{CertificateSource, DirectoryCertificateSource, SkippedEntity, load_entities};

/// Everything a run produced, for the caller's logging and exit status.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One decision per evaluated entity, in entity id order.
    pub decisions: Vec<NotificationDecision>,
    /// Entities excluded from this run.
    pub skipped: Vec<SkippedEntity>,
    /// One report per notified entity.
    pub dispatches: Vec<DispatchReport>,
    /// Aggregate handed to the scheduler.
    pub outcome: RunOutcome,
    /// Terminal state of the run.
    pub state: RunState,
}

impl RunReport {
    /// Number of messages the transport rejected.
    pub fn failed_sends(&self) -> usize {
        self.dispatches.iter().map(|d| d.failed.len()).sum()
    }
}

/// The expiry monitor: source, policy, dispatcher and scheduler wired
/// together.
pub struct Monitor {
    source: Box<dyn CertificateSource>,
    global: GlobalPolicy,
    overrides: EntityOverrides,
    mode: FollowUpMode,
    dispatcher: Dispatcher,
    scheduler: FollowUpScheduler,
}

impl Monitor {
    /// Assemble a monitor from its collaborators.
    pub fn new(
        source: Box<dyn CertificateSource>,
        global: GlobalPolicy,
        overrides: EntityOverrides,
        dispatcher: Dispatcher,
        scheduler: FollowUpScheduler,
    ) -> Self {
        Self {
            source,
            global,
            overrides,
            mode: FollowUpMode::default(),
            dispatcher,
            scheduler,
        }
    }

    /// Choose how the follow-up delay is selected.
    pub fn with_follow_up_mode(mut self, mode: FollowUpMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build a monitor from configuration.
    ///
    /// `follow_up_command` is the command line the follow-up trigger runs.
    /// With `dry_run` no mail is sent and no follow-up is requested; both
    /// are only logged.
    pub fn from_config(
        config: &MonitorConfig,
        follow_up_command: Vec<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let source = DirectoryCertificateSource::new(&config.certificates.directory)
            .with_chain_file(&config.certificates.chain_file);

        let transport: Arc<dyn MailTransport> = if dry_run {
            Arc::new(LogOnlyTransport)
        } else {
            config.mail.build_transport()?
        };
        let dispatcher = Dispatcher::new(transport, &config.policy.sender)
            .with_max_concurrent_sends(config.mail.max_concurrent_sends);

        let port: Arc<dyn SchedulerPort> = if dry_run {
            Arc::new(LogOnlyScheduler)
        } else {
            config.scheduler.build_port()
        };
        let scheduler = FollowUpScheduler::new(port, &config.scheduler.unit_name, follow_up_command);

        Ok(Self::new(
            Box::new(source),
            config.policy.clone(),
            config.domains.clone(),
            dispatcher,
            scheduler,
        )
        .with_follow_up_mode(config.scheduler.follow_up_mode))
    }

    /// Read every certificate and evaluate it, without any side effect.
    ///
    /// # Errors
    ///
    /// Fails only when the certificate store itself is inaccessible.
    pub fn evaluate_all(
        &self,
        now: SystemTime,
    ) -> Result<(Vec<NotificationDecision>, Vec<SkippedEntity>)> {
        let (entities, skipped) = load_entities(self.source.as_ref())?;

        let decisions = entities
            .iter()
            .map(|entity| {
                let policy = resolve(&entity.id, &self.global, &self.overrides);
                let decision = evaluate(entity, policy, now);
                debug!(
                    entity = %decision.entity_id,
                    days_remaining = decision.days_remaining,
                    warning_days = decision.policy.warning_days,
                    notify = decision.should_notify,
                    "Evaluated certificate"
                );
                decision
            })
            .collect();

        Ok((decisions, skipped))
    }

    /// Run one complete evaluation cycle at `now`.
    ///
    /// # Errors
    ///
    /// Fails only when the certificate store itself is inaccessible.
    /// Per-entity, dispatch and scheduling problems are reported in the
    /// returned [`RunReport`].
    pub async fn run_once(&self, now: SystemTime) -> Result<RunReport> {
        let mut state = RunState::Idle;
        debug!(%state, "Run starting");

        state = RunState::Evaluating;
        debug!(%state, "Reading certificates");
        let (decisions, skipped) = self.evaluate_all(now)?;

        let mut dispatches = Vec::new();
        for decision in decisions.iter().filter(|d| d.should_notify) {
            dispatches.push(self.dispatcher.dispatch(decision).await);
        }

        let outcome = plan_follow_up(&decisions, &self.global, self.mode);
        state = self.scheduler.finish(&outcome).await;

        let report = RunReport {
            decisions,
            skipped,
            dispatches,
            outcome,
            state,
        };

        info!(
            evaluated = report.decisions.len(),
            skipped = report.skipped.len(),
            notified = report.outcome.notified.len(),
            failed_sends = report.failed_sends(),
            state = %report.state,
            "Run complete"
        );
        Ok(report)
    }
}
