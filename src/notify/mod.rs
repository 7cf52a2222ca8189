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

//! Notification dispatch.
//!
//! For every notified entity the [`Dispatcher`] composes one [`MailMessage`]
//! per recipient and hands it to a [`MailTransport`]. Recipients are sent
//! independently: a transport failure for one address is logged and recorded
//! in the [`DispatchReport`], and the remaining addresses are still tried.
//!
//! Sends for one entity run concurrently, bounded by the dispatcher's
//! concurrency limit so a long recipient list cannot flood the transport.
//!
//! # Transports
//!
//! - [`SendmailTransport`] (feature `sendmail`): local `sendmail(8)` binary.
//! - [`SmtpTransport`] (feature `smtp`): SMTP relay with STARTTLS.
//! - [`LogOnlyTransport`]: logs the message instead of sending it.

#[cfg(feature = "sendmail")]
mod sendmail;
#[cfg(feature = "smtp")]
mod smtp;

#[cfg(feature = "sendmail")]
pub use sendmail::SendmailTransport;
#[cfg(feature = "smtp")]
pub use smtp::SmtpTransport;

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::error::{MonitorError, Result};
use crate::evaluate::NotificationDecision;

/// Default bound on concurrent sends per entity.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 4;

/// A fully formed plain-text notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// `From` address.
    pub from: String,
    /// Single `To` address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Delivers one message. Retries and delivery confirmation are the
/// transport's business.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Hand `message` to the transport.
    async fn send(&self, message: &MailMessage) -> Result<()>;

    /// Short transport name for logs.
    fn name(&self) -> &str;
}

/// Transport that only logs what would have been sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyTransport;

#[async_trait]
impl MailTransport for LogOnlyTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "Dry run: notification not sent"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log-only"
    }
}

/// One recipient that could not be notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    /// Recipient address.
    pub recipient: String,
    /// Transport error.
    pub error: String,
}

/// Result of dispatching one entity's notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Entity id.
    pub entity_id: String,
    /// Recipients the transport accepted, in policy order.
    pub sent: Vec<String>,
    /// Recipients the transport rejected, in policy order.
    pub failed: Vec<DispatchFailure>,
}

impl DispatchReport {
    /// Returns true if every recipient was accepted.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Subject line for a decision.
pub fn subject_for(decision: &NotificationDecision) -> String {
    let days = decision.days_remaining;
    if days < 0 {
        format!(
            "Certificate for {} expired {} {} ago",
            decision.entity_id,
            -days,
            plural_days(-days)
        )
    } else {
        format!(
            "Certificate for {} expires in {} {}",
            decision.entity_id,
            days,
            plural_days(days)
        )
    }
}

/// Plain-text body for a decision.
pub fn body_for(decision: &NotificationDecision) -> String {
    let days = decision.days_remaining;
    let when = format_instant(decision.expiry);

    let status = if days < 0 {
        format!(
            "The certificate for {} expired {} {} ago ({}).",
            decision.entity_id,
            -days,
            plural_days(-days),
            when
        )
    } else {
        format!(
            "The certificate for {} expires in {} {} ({}).",
            decision.entity_id,
            days,
            plural_days(days),
            when
        )
    };

    format!(
        "{status}\n\
         \n\
         Days remaining: {days}\n\
         Warning window: {window} days\n\
         \n\
         Please renew the certificate. This reminder is repeated until a\n\
         renewed certificate is installed or follow-up reminders are disabled.\n",
        window = decision.policy.warning_days,
    )
}

/// Compose the messages for every recipient of `decision`.
pub fn compose(sender: &str, decision: &NotificationDecision) -> Vec<MailMessage> {
    let subject = subject_for(decision);
    let body = body_for(decision);

    decision
        .policy
        .recipients
        .iter()
        .map(|to| MailMessage {
            from: sender.to_string(),
            to: to.clone(),
            subject: subject.clone(),
            body: body.clone(),
        })
        .collect()
}

fn plural_days(n: i64) -> &'static str {
    if n == 1 { "day" } else { "days" }
}

fn format_instant(instant: SystemTime) -> String {
    OffsetDateTime::from(instant)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown date".to_string())
}

/// Sends notifications for notified entities.
pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
    sender: String,
    send_permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher sending from `sender` through `transport`.
    pub fn new(transport: Arc<dyn MailTransport>, sender: impl Into<String>) -> Self {
        Self {
            transport,
            sender: sender.into(),
            send_permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_SENDS)),
        }
    }

    /// Bound the number of concurrent sends. Values below 1 are raised to 1.
    pub fn with_max_concurrent_sends(mut self, max: usize) -> Self {
        self.send_permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Name of the underlying transport.
    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Send one message per recipient of `decision`. Never fails as a whole.
    pub async fn dispatch(&self, decision: &NotificationDecision) -> DispatchReport {
        let mut report = DispatchReport {
            entity_id: decision.entity_id.clone(),
            ..Default::default()
        };

        let mut tasks = Vec::new();
        for message in compose(&self.sender, decision) {
            let recipient = message.to.clone();
            let transport = Arc::clone(&self.transport);
            let permits = Arc::clone(&self.send_permits);

            let task = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                transport.send(&message).await
            });
            tasks.push((recipient, task));
        }

        for (recipient, task) in tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => Err(MonitorError::dispatch(&recipient, format!("send task failed: {e}"))),
            };

            match outcome {
                Ok(()) => {
                    debug!(entity = %decision.entity_id, %recipient, "Notification sent");
                    report.sent.push(recipient);
                }
                Err(e) => {
                    error!(entity = %decision.entity_id, %recipient, "Notification failed: {}", e);
                    report.failed.push(DispatchFailure {
                        recipient,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            entity = %decision.entity_id,
            days_remaining = decision.days_remaining,
            sent = report.sent.len(),
            failed = report.failed.len(),
            "Expiry notification dispatched"
        );
        report
    }
}

/// Convert to a `lettre` message.
#[cfg(any(feature = "sendmail", feature = "smtp"))]
pub(crate) fn to_lettre_message(message: &MailMessage) -> Result<lettre::Message> {
    use lettre::message::header::ContentType;

    let from = message
        .from
        .parse::<lettre::message::Mailbox>()
        .map_err(|e| MonitorError::dispatch(&message.to, format!("invalid sender: {e}")))?;
    let to = message
        .to
        .parse::<lettre::message::Mailbox>()
        .map_err(|e| MonitorError::dispatch(&message.to, format!("invalid recipient: {e}")))?;

    lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .map_err(|e| MonitorError::dispatch(&message.to, e.to_string()))
}
