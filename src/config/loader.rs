// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MonitorError;

use super::schema::MonitorConfig;

/// Environment variable that overrides configuration discovery.
pub const CONFIG_ENV_VAR: &str = "CERT_MONITOR_CONFIG";

/// Configuration file loader with discovery and precedence rules.
///
/// # Search Order
///
/// The first existing file wins:
///
/// 1. Explicit path (if set via `with_path()`)
/// 2. Environment variable `CERT_MONITOR_CONFIG`
/// 3. `/etc/cert-monitor/config.toml`
/// 4. `$XDG_CONFIG_HOME/cert-monitor/config.toml`
/// 5. `./cert-monitor.toml`
///
/// An explicit path or environment variable that points at a missing file
/// is an error; discovery does not fall through.
///
/// # Example
///
/// ```no_run
/// use cert_expiry_monitor::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_path("/etc/cert-monitor/config.toml")
///     .load()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
    expand_variables: bool,
    validate: bool,
    env_var_name: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader that expands variables and validates.
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            expand_variables: true,
            validate: true,
            env_var_name: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Use exactly this file, skipping discovery.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enable or disable variable expansion. Default: `true`
    pub fn with_expand_variables(mut self, expand: bool) -> Self {
        self.expand_variables = expand;
        self
    }

    /// Enable or disable validation after loading. Default: `true`
    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Set the environment variable name for path override.
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var_name = name.into();
        self
    }

    /// Find, read, expand and validate the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No configuration file is found
    /// - The file cannot be read
    /// - The TOML is invalid
    /// - Validation fails (if enabled)
    pub fn load(&self) -> Result<MonitorConfig, MonitorError> {
        Ok(self.load_with_path()?.0)
    }

    /// Like [`load`](Self::load), also returning the file that was used.
    pub fn load_with_path(&self) -> Result<(MonitorConfig, PathBuf), MonitorError> {
        let config_path = self.find_config_file()?;
        debug!(path = %config_path.display(), "Loading configuration");

        let toml_content = std::fs::read_to_string(&config_path).map_err(|e| {
            MonitorError::config(format!("Failed to read {}: {e}", config_path.display()))
        })?;

        let config = self.load_from_str(&toml_content)?;
        Ok((config, config_path))
    }

    /// Load configuration from a TOML string.
    pub fn load_from_str(&self, toml_content: &str) -> Result<MonitorConfig, MonitorError> {
        let mut config = MonitorConfig::from_toml(toml_content)?;

        if self.expand_variables {
            config.expand_variables()?;
        }

        if self.validate {
            config.validate()?;
        }

        Ok(config)
    }

    /// Resolve the configuration file path.
    pub fn find_config_file(&self) -> Result<PathBuf, MonitorError> {
        if let Some(ref path) = self.explicit_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(MonitorError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        if let Ok(env_path) = std::env::var(&self.env_var_name)
            && !env_path.is_empty()
        {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(path);
            }
            return Err(MonitorError::config(format!(
                "Configuration file from {} not found: {}",
                self.env_var_name, env_path
            )));
        }

        for path in self.get_search_paths() {
            if path.exists() {
                return Ok(path);
            }
        }

        Err(MonitorError::config(format!(
            "No configuration file found. Searched:\n  - {}",
            self.get_search_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join("\n  - ")
        )))
    }

    /// Standard locations, in search order.
    pub fn get_search_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/cert-monitor/config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cert-monitor").join("config.toml"));
        }

        paths.push(PathBuf::from("cert-monitor.toml"));
        paths
    }
}

/// Commented configuration template written by `config init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Certificate expiry monitor configuration

[certificates]
# Root of the certificate store, one subdirectory per domain
directory = "/etc/letsencrypt/live"

# Certificate file inside each domain directory
chain_file = "fullchain.pem"

[policy]
# Receives every notification (required)
master_recipient = "hostmaster@example.com"

# From address; supports ${FQDN}, ${HOSTNAME}, ${USER} and environment variables
sender = "cert-monitor@${FQDN}"

# Notify when a certificate expires in this many days or fewer
warning_days = 14

# Re-run this long after a run that sent notifications.
# Spans like "90s", "30min", "12h", "1d", "1w", "1d12h" or "1h 30min". "" disables.
follow_up_interval = "24h"

# Per-domain overrides. Recipients are added after master_recipient.
# [domains."www.example.com"]
# recipients = ["web-team@example.com"]
# warning_days = 30
# follow_up_interval = ""

[mail]
# "sendmail", "smtp" or "log"
transport = "sendmail"
sendmail_command = "/usr/sbin/sendmail"

# Concurrent sends per domain
max_concurrent_sends = 4

# [mail.smtp]
# server = "smtp.example.com"
# port = 587
# starttls = true
# username = "cert-monitor"
# password_source = "env:SMTP_PASSWORD"   # or "file:/etc/cert-monitor/smtp-password"

[scheduler]
# "systemd" (transient timer via systemd-run) or "none"
backend = "systemd"
unit_name = "cert-monitor-followup"

# Use the per-user service manager
user = false

# "global": follow_up_interval from [policy] only
# "shortest_effective": shortest interval among the domains that notified
follow_up_mode = "global"

[logging]
# "trace", "debug", "info", "warn", "error"
level = "info"
json_format = false

[lock]
# Defaults to /run/lock/cert-monitor.lock, or $XDG_RUNTIME_DIR/cert-monitor.lock
# when scheduler.user is set
# path = "/var/lib/cert-monitor/run.lock"
"#;

/// Write the commented default configuration to `path`.
///
/// An existing file is only replaced with `overwrite`.
pub fn write_default_config(path: impl AsRef<Path>, overwrite: bool) -> Result<(), MonitorError> {
    let path = path.as_ref();

    if path.exists() && !overwrite {
        return Err(MonitorError::config(format!(
            "Refusing to overwrite existing {}",
            path.display()
        )));
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| MonitorError::config(format!("Failed to create directory: {e}")))?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .map_err(|e| MonitorError::config(format!("Failed to write config file: {e}")))?;

    Ok(())
}
