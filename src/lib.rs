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

//! # cert-expiry-monitor
//!
//! Periodic X.509 certificate expiry monitoring with mail notifications.
//!
//! Each run reads the certificate of every entity (domain) in a store
//! directory, resolves the entity's notification policy from global defaults
//! and per-entity overrides, and mails every recipient of each entity whose
//! certificate expires within its warning window. A run that notified
//! anybody asks the scheduler to run again after the follow-up interval, so
//! reminders keep coming until the certificate is renewed. Runs hold no
//! state between invocations.
//!
//! ## Features
//!
//! - **Stateless runs** driven by a daily systemd timer
//! - **Self-rescheduling follow-ups** via transient `systemd-run` timers
//! - **Per-domain overrides** for recipients, warning window and follow-up
//! - **Pluggable transports**: `sendmail(8)` or an SMTP relay
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::SystemTime;
//! use cert_expiry_monitor::config::ConfigLoader;
//! use cert_expiry_monitor::monitor::Monitor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new()
//!         .with_path("/etc/cert-monitor/config.toml")
//!         .load()?;
//!
//!     let follow_up = vec!["/usr/local/bin/cert-monitor".to_string(), "run".to_string()];
//!     let monitor = Monitor::from_config(&config, follow_up, false)?;
//!
//!     let report = monitor.run_once(SystemTime::now()).await?;
//!     println!("{} entities notified, {}", report.outcome.notified.len(), report.state);
//!     Ok(())
//! }
//! ```
//!
//! ## Evaluating Without Side Effects
//!
//! ```
//! use std::time::{Duration, SystemTime};
//! use cert_expiry_monitor::evaluate::evaluate;
//! use cert_expiry_monitor::policy::{EntityOverrides, GlobalPolicy, resolve};
//! use cert_expiry_monitor::source::Entity;
//!
//! let now = SystemTime::now();
//! let entity = Entity {
//!     id: "a.example".to_string(),
//!     expiry: now + Duration::from_secs(10 * 86_400 + 60),
//! };
//!
//! let global = GlobalPolicy::new("hostmaster@example.com");
//! let policy = resolve(&entity.id, &global, &EntityOverrides::new());
//! let decision = evaluate(&entity, policy, now);
//!
//! assert_eq!(decision.days_remaining, 10);
//! assert!(decision.should_notify);
//! ```
//!
//! ## Cargo Features
//!
//! - `sendmail` (default): `sendmail(8)` transport
//! - `smtp` (default): SMTP relay transport with STARTTLS

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod evaluate;
pub mod install;
pub mod lock;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod policy;
pub mod scheduler;
pub mod source;

pub use config::{ConfigLoader, MonitorConfig};
pub use error::{MonitorError, Result};
pub use evaluate::NotificationDecision;
pub use monitor::{Monitor, RunReport};
pub use policy::{EntityOverride, EntityOverrides, FollowUp, GlobalPolicy, Interval, Policy};
pub use scheduler::{FollowUpMode, RunOutcome, RunState};
pub use source::{CertificateSource, DirectoryCertificateSource, Entity};
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
