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

//! Logging setup for the binaries.
//!
//! Log output goes to stderr so that command output on stdout (the status
//! table, `config show`) stays clean. Under systemd stderr lands in the
//! journal.
//!
//! ```toml
//! [logging]
//! level = "info"
//! json_format = false
//! ```
//!
//! The level is chosen in this order: `RUST_LOG`, then `-v`/`-q` on the
//! command line, then `[logging] level`.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{MonitorError, Result};

/// Log level for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Most verbose - all messages.
    Trace = 0,
    /// Debug information.
    Debug = 1,
    /// Informational messages.
    #[default]
    Info = 2,
    /// Warnings.
    Warn = 3,
    /// Errors only.
    Error = 4,
}

impl LogLevel {
    const ALL: [Self; 5] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
    ];

    /// Filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Shift the level by command-line verbosity. Positive is more verbose.
    pub fn adjusted(self, shift: i8) -> Self {
        let index = (self as i8 - shift).clamp(0, 4);
        Self::ALL[index as usize]
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a level name, case-insensitively. `warning` is accepted for `warn`.
pub fn parse_level(s: &str) -> Option<LogLevel> {
    match s.trim().to_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

/// Level from configuration adjusted by `-v` (`verbose`) and `-q` (`quiet`)
/// counts. An unparsable configured level falls back to `info`.
pub fn effective_level(config: &LoggingConfig, verbose: u8, quiet: u8) -> LogLevel {
    let base = parse_level(&config.level).unwrap_or_default();
    let shift = i8::try_from(verbose).unwrap_or(i8::MAX) - i8::try_from(quiet).unwrap_or(i8::MAX);
    base.adjusted(shift.clamp(-4, 4))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &LoggingConfig, verbose: u8, quiet: u8) -> Result<()> {
    let level = effective_level(config, verbose, quiet);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let result = if config.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };

    result.map_err(|e| MonitorError::config(format!("Failed to initialize logging: {e}")))
}
