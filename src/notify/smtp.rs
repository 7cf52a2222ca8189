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

//! SMTP relay transport.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use super::{MailMessage, MailTransport, to_lettre_message};
use crate::error::{MonitorError, Result};

/// Sends through an SMTP relay.
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
}

impl SmtpTransport {
    /// Build a transport for `server:port`.
    ///
    /// With `starttls` the connection is upgraded before authenticating;
    /// without it the session stays in plain text (local relays only).
    pub fn new(
        server: &str,
        port: u16,
        starttls: bool,
        credentials: Option<(String, String)>,
    ) -> Result<Self> {
        let mut builder = if starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
                .map_err(|e| MonitorError::config(format!("SMTP relay {server}: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server)
        };

        builder = builder.port(port);
        if let Some((username, password)) = credentials {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            inner: builder.build(),
            server: format!("{server}:{port}"),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let email = to_lettre_message(message)?;
        self.inner
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| MonitorError::dispatch(&message.to, format!("{}: {e}", self.server)))
    }

    fn name(&self) -> &str {
        "smtp"
    }
}
