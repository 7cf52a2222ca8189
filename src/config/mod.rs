// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! TOML configuration for the monitor.
//!
//! # Features
//!
//! - Discovery in standard locations with an environment override
//! - Variable expansion (`${FQDN}`, `${HOSTNAME}`, `${USER}`, environment)
//! - Validation that reports every problem at once
//!
//! # Example Configuration
//!
//! ```toml
//! [certificates]
//! directory = "/etc/letsencrypt/live"
//!
//! [policy]
//! master_recipient = "hostmaster@example.com"
//! warning_days = 14
//! follow_up_interval = "24h"
//!
//! [domains."shop.example.com"]
//! recipients = ["shop-team@example.com"]
//! warning_days = 30
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use cert_expiry_monitor::config::ConfigLoader;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! for warning in config.warnings() {
//!     eprintln!("{warning}");
//! }
//! # Ok(())
//! # }
//! ```

mod expand;
mod loader;
mod schema;

pub use expand::expand_variables;
pub use loader::{CONFIG_ENV_VAR, ConfigLoader, DEFAULT_CONFIG_TEMPLATE, write_default_config};
pub use schema::*;
