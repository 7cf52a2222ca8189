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

//! Local `sendmail(8)` transport.

use async_trait::async_trait;
use lettre::{AsyncSendmailTransport, AsyncTransport, Tokio1Executor};

use super::{MailMessage, MailTransport, to_lettre_message};
use crate::error::{MonitorError, Result};

/// Default sendmail binary.
pub const DEFAULT_SENDMAIL_COMMAND: &str = "/usr/sbin/sendmail";

/// Hands messages to the local MTA through its sendmail interface.
pub struct SendmailTransport {
    inner: AsyncSendmailTransport<Tokio1Executor>,
    command: String,
}

impl SendmailTransport {
    /// Use the sendmail binary at `command`.
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            inner: AsyncSendmailTransport::<Tokio1Executor>::new_with_command(command.clone()),
            command,
        }
    }

    /// Sendmail binary in use.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Default for SendmailTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SENDMAIL_COMMAND)
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let email = to_lettre_message(message)?;
        self.inner
            .send(email)
            .await
            .map_err(|e| MonitorError::dispatch(&message.to, format!("{}: {e}", self.command)))
    }

    fn name(&self) -> &str {
        "sendmail"
    }
}
