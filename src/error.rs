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

//! Error types for the certificate expiry monitor.
//!
//! Errors fall into two groups. Entity-level errors (an unreadable or
//! unparsable certificate, a rejected message, a refused follow-up request)
//! are logged and recorded in the run report; they never abort the run.
//! Run-level errors (the certificate store itself is gone, the configuration
//! is invalid) are propagated to the binary and turned into a failing exit
//! code.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`MonitorError`].
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while monitoring certificates.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The certificate store directory cannot be read at all.
    #[error("Certificate store {path} is not accessible: {source}")]
    SourceUnavailable {
        /// Store root that could not be opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A certificate file for one entity is missing or unreadable.
    #[error("Cannot read certificate {path}: {source}")]
    CertificateRead {
        /// Certificate file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A certificate file is present but its expiry cannot be determined.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// A notification could not be handed to the mail transport.
    #[error("Dispatch to {recipient} failed: {message}")]
    Dispatch {
        /// Recipient address.
        recipient: String,
        /// Transport error message.
        message: String,
    },

    /// The re-invocation mechanism refused a follow-up request.
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Configuration file or value is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A follow-up interval string cannot be parsed.
    #[error("Invalid interval '{0}'")]
    InvalidInterval(String),

    /// Another instance holds the single-instance lock.
    #[error("Another instance is already running (lock {0})")]
    AlreadyRunning(PathBuf),

    /// Installing or removing the timer units failed.
    #[error("Install error: {0}")]
    Install(String),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Create a store-unavailable error.
    pub fn source_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Create a certificate read error.
    pub fn certificate_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CertificateRead {
            path: path.into(),
            source,
        }
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Create a dispatch error for one recipient.
    pub fn dispatch(recipient: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            recipient: recipient.into(),
            message: message.into(),
        }
    }

    /// Create a scheduling error with the given message.
    pub fn scheduling(msg: impl Into<String>) -> Self {
        Self::Scheduling(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an install error with the given message.
    pub fn install(msg: impl Into<String>) -> Self {
        Self::Install(msg.into())
    }

    /// Returns true if this error only affects a single entity, recipient or
    /// follow-up request and must not abort the run.
    pub fn is_entity_level(&self) -> bool {
        matches!(
            self,
            Self::CertificateRead { .. }
                | Self::CertificateParsing(_)
                | Self::Der(_)
                | Self::Dispatch { .. }
                | Self::Scheduling(_)
        )
    }
}
