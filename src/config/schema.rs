// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Configuration file structures.
//!
//! One TOML file describes the certificate store, the global notification
//! policy with its per-domain overrides, mail delivery, the follow-up
//! scheduler, logging and the single-instance lock.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::MonitorError;
use crate::notify::{DEFAULT_MAX_CONCURRENT_SENDS, LogOnlyTransport, MailTransport};
use crate::policy::{EntityOverrides, GlobalPolicy};
use crate::scheduler::{
    DEFAULT_FOLLOW_UP_UNIT, FollowUpMode, LogOnlyScheduler, SchedulerPort, SystemdRunScheduler,
};
use crate::source::DEFAULT_CHAIN_FILE;

use super::expand::expand_variables;

/// Default certificate store root.
pub const DEFAULT_CERTIFICATE_DIRECTORY: &str = "/etc/letsencrypt/live";

/// Lock file name used when no explicit lock path is configured.
pub const DEFAULT_LOCK_FILE: &str = "cert-monitor.lock";

/// Lock directory shared by every system-mode run.
pub const SYSTEM_LOCK_DIR: &str = "/run/lock";

/// Complete monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Certificate store location.
    #[serde(default)]
    pub certificates: CertificatesConfig,

    /// Global notification policy.
    pub policy: GlobalPolicy,

    /// Per-domain overrides keyed by entity id.
    #[serde(default)]
    pub domains: EntityOverrides,

    /// Mail delivery.
    #[serde(default)]
    pub mail: MailConfig,

    /// Follow-up scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Single-instance lock.
    #[serde(default)]
    pub lock: LockConfig,
}

impl MonitorConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, has unknown keys or is
    /// missing the `[policy]` section.
    pub fn from_toml(toml_str: &str) -> Result<Self, MonitorError> {
        toml::from_str(toml_str).map_err(|e| MonitorError::config(format!("Invalid TOML: {e}")))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, MonitorError> {
        toml::to_string_pretty(self)
            .map_err(|e| MonitorError::config(format!("TOML serialize: {e}")))
    }

    /// Expand `${VAR}` references in addresses and paths.
    pub fn expand_variables(&mut self) -> Result<(), MonitorError> {
        self.certificates.directory = expand_path(&self.certificates.directory)?;

        self.policy.master_recipient = expand_variables(&self.policy.master_recipient)?;
        self.policy.sender = expand_variables(&self.policy.sender)?;

        for entry in self.domains.values_mut() {
            entry.recipients = entry
                .recipients
                .iter()
                .map(|r| expand_variables(r))
                .collect::<Result<Vec<_>, _>>()?;
        }

        if let Some(ref mut smtp) = self.mail.smtp {
            smtp.server = expand_variables(&smtp.server)?;
            if let Some(ref mut username) = smtp.username {
                *username = expand_variables(username)?;
            }
        }

        if let Some(ref mut path) = self.lock.path {
            *path = expand_path(path)?;
        }

        Ok(())
    }

    /// Validate the configuration for completeness and consistency.
    ///
    /// # Errors
    ///
    /// Returns one error listing every problem found.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let mut errors = Vec::new();

        if self.certificates.directory.as_os_str().is_empty() {
            errors.push("certificates.directory is required".to_string());
        }
        if self.certificates.chain_file.is_empty() {
            errors.push("certificates.chain_file is required".to_string());
        } else if self.certificates.chain_file.contains('/') {
            errors.push("certificates.chain_file must be a file name, not a path".to_string());
        }

        if self.policy.master_recipient.trim().is_empty() {
            errors.push("policy.master_recipient is required".to_string());
        } else if !looks_like_address(&self.policy.master_recipient) {
            errors.push(format!(
                "policy.master_recipient '{}' is not a mail address",
                self.policy.master_recipient
            ));
        }
        if self.policy.sender.trim().is_empty() {
            errors.push("policy.sender must not be empty".to_string());
        }

        for (id, entry) in &self.domains {
            if id.trim().is_empty() {
                errors.push("domains: entity id must not be empty".to_string());
            }
            for recipient in &entry.recipients {
                if !looks_like_address(recipient) {
                    errors.push(format!(
                        "domains.\"{id}\".recipients: '{recipient}' is not a mail address"
                    ));
                }
            }
        }

        if self.mail.max_concurrent_sends == 0 {
            errors.push("mail.max_concurrent_sends must be at least 1".to_string());
        }
        match self.mail.transport {
            TransportKind::Smtp => match &self.mail.smtp {
                None => errors.push("mail.smtp is required when mail.transport is 'smtp'".to_string()),
                Some(smtp) => {
                    if smtp.server.is_empty() {
                        errors.push("mail.smtp.server is required".to_string());
                    }
                    if smtp.username.is_some() != smtp.password_source.is_some() {
                        errors.push(
                            "mail.smtp.username and mail.smtp.password_source must be set together"
                                .to_string(),
                        );
                    }
                }
            },
            TransportKind::Sendmail => {
                if self.mail.sendmail_command.is_empty() {
                    errors.push("mail.sendmail_command must not be empty".to_string());
                }
            }
            TransportKind::Log => {}
        }

        let unit = &self.scheduler.unit_name;
        if unit.is_empty() {
            errors.push("scheduler.unit_name is required".to_string());
        } else if unit.contains('/') || unit.chars().any(char::is_whitespace) {
            errors.push(format!(
                "scheduler.unit_name '{unit}' must not contain '/' or whitespace"
            ));
        }

        if crate::logging::parse_level(&self.logging.level).is_none() {
            errors.push(format!(
                "logging.level '{}' must be one of trace, debug, info, warn, error",
                self.logging.level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::config(errors.join("; ")))
        }
    }

    /// Settings that are valid but probably not what the operator meant.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scheduler.follow_up_mode == FollowUpMode::Global {
            for (id, entry) in &self.domains {
                if entry.follow_up.is_some() {
                    warnings.push(format!(
                        "domains.\"{id}\".follow_up_interval does not affect scheduling while \
                         scheduler.follow_up_mode is 'global'"
                    ));
                }
            }
        }

        if self.scheduler.backend == SchedulerBackend::None && !self.policy.follow_up.is_disabled() {
            warnings.push(
                "policy.follow_up_interval is set but scheduler.backend is 'none'; \
                 follow-ups will only be logged"
                    .to_string(),
            );
        }

        if self.mail.transport == TransportKind::Log {
            warnings.push("mail.transport is 'log'; notifications are not delivered".to_string());
        }

        warnings
    }
}

fn expand_path(path: &std::path::Path) -> Result<PathBuf, MonitorError> {
    expand_variables(&path.to_string_lossy()).map(PathBuf::from)
}

fn looks_like_address(value: &str) -> bool {
    match value.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

/// Certificate store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificatesConfig {
    /// Root directory with one subdirectory per entity.
    #[serde(default = "default_certificate_directory")]
    pub directory: PathBuf,

    /// Certificate file name inside each entity directory.
    #[serde(default = "default_chain_file")]
    pub chain_file: String,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            directory: default_certificate_directory(),
            chain_file: default_chain_file(),
        }
    }
}

fn default_certificate_directory() -> PathBuf {
    PathBuf::from(DEFAULT_CERTIFICATE_DIRECTORY)
}

fn default_chain_file() -> String {
    DEFAULT_CHAIN_FILE.to_string()
}

/// Mail transport selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Local `sendmail(8)` binary.
    #[default]
    Sendmail,
    /// SMTP relay.
    Smtp,
    /// Log only, never deliver.
    Log,
}

/// Mail delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    /// Transport used for delivery.
    #[serde(default)]
    pub transport: TransportKind,

    /// Path of the sendmail binary.
    #[serde(default = "default_sendmail_command")]
    pub sendmail_command: String,

    /// Concurrent sends per entity.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,

    /// SMTP relay settings, required for `transport = "smtp"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            sendmail_command: default_sendmail_command(),
            max_concurrent_sends: default_max_concurrent_sends(),
            smtp: None,
        }
    }
}

fn default_sendmail_command() -> String {
    "/usr/sbin/sendmail".to_string()
}

fn default_max_concurrent_sends() -> usize {
    DEFAULT_MAX_CONCURRENT_SENDS
}

impl MailConfig {
    /// Build the configured transport.
    ///
    /// # Errors
    ///
    /// Fails when the transport was compiled out, the SMTP section is
    /// missing, or the SMTP password cannot be resolved.
    pub fn build_transport(&self) -> Result<Arc<dyn MailTransport>, MonitorError> {
        match self.transport {
            TransportKind::Log => Ok(Arc::new(LogOnlyTransport)),
            TransportKind::Sendmail => self.build_sendmail(),
            TransportKind::Smtp => self.build_smtp(),
        }
    }

    #[cfg(feature = "sendmail")]
    fn build_sendmail(&self) -> Result<Arc<dyn MailTransport>, MonitorError> {
        Ok(Arc::new(crate::notify::SendmailTransport::new(
            &self.sendmail_command,
        )))
    }

    #[cfg(not(feature = "sendmail"))]
    fn build_sendmail(&self) -> Result<Arc<dyn MailTransport>, MonitorError> {
        Err(MonitorError::config(
            "mail.transport 'sendmail' requires the 'sendmail' feature",
        ))
    }

    #[cfg(feature = "smtp")]
    fn build_smtp(&self) -> Result<Arc<dyn MailTransport>, MonitorError> {
        let smtp = self.smtp.as_ref().ok_or_else(|| {
            MonitorError::config("mail.smtp is required when mail.transport is 'smtp'")
        })?;

        let credentials = match (&smtp.username, &smtp.password_source) {
            (Some(username), Some(source)) => Some((username.clone(), resolve_secret(source)?)),
            _ => None,
        };

        let transport =
            crate::notify::SmtpTransport::new(&smtp.server, smtp.port, smtp.starttls, credentials)?;
        Ok(Arc::new(transport))
    }

    #[cfg(not(feature = "smtp"))]
    fn build_smtp(&self) -> Result<Arc<dyn MailTransport>, MonitorError> {
        Err(MonitorError::config(
            "mail.transport 'smtp' requires the 'smtp' feature",
        ))
    }
}

/// SMTP relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    /// Relay host name.
    pub server: String,

    /// Relay port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Upgrade the connection with STARTTLS.
    #[serde(default = "default_true")]
    pub starttls: bool,

    /// Login name.
    #[serde(default)]
    pub username: Option<String>,

    /// Password source: `env:VAR_NAME` or `file:/path`.
    #[serde(default)]
    pub password_source: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

/// Resolve a secret from `env:VAR_NAME` or `file:/path`.
///
/// File contents are trimmed.
pub fn resolve_secret(source: &str) -> Result<String, MonitorError> {
    if let Some(var_name) = source.strip_prefix("env:") {
        std::env::var(var_name)
            .map_err(|_| MonitorError::config(format!("Environment variable {var_name} not set")))
    } else if let Some(path) = source.strip_prefix("file:") {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| MonitorError::config(format!("Failed to read password file: {e}")))
    } else {
        Err(MonitorError::config(format!(
            "Unknown password_source: {source}"
        )))
    }
}

/// Follow-up scheduler backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    /// Transient systemd timers via `systemd-run`.
    #[default]
    Systemd,
    /// Log the request only.
    None,
}

/// Follow-up scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Backend that carries out follow-up requests.
    #[serde(default)]
    pub backend: SchedulerBackend,

    /// Name of the transient follow-up unit. Re-scheduling replaces it.
    #[serde(default = "default_unit_name")]
    pub unit_name: String,

    /// Talk to the per-user service manager.
    #[serde(default)]
    pub user: bool,

    /// How the follow-up delay of a run is chosen.
    #[serde(default)]
    pub follow_up_mode: FollowUpMode,

    /// `systemd-run` binary.
    #[serde(default = "default_systemd_run")]
    pub systemd_run: String,

    /// `systemctl` binary.
    #[serde(default = "default_systemctl")]
    pub systemctl: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: SchedulerBackend::default(),
            unit_name: default_unit_name(),
            user: false,
            follow_up_mode: FollowUpMode::default(),
            systemd_run: default_systemd_run(),
            systemctl: default_systemctl(),
        }
    }
}

fn default_unit_name() -> String {
    DEFAULT_FOLLOW_UP_UNIT.to_string()
}

fn default_systemd_run() -> String {
    "systemd-run".to_string()
}

fn default_systemctl() -> String {
    "systemctl".to_string()
}

impl SchedulerConfig {
    /// Build the configured scheduler port.
    pub fn build_port(&self) -> Arc<dyn SchedulerPort> {
        match self.backend {
            SchedulerBackend::Systemd => Arc::new(
                SystemdRunScheduler::new()
                    .with_user(self.user)
                    .with_commands(&self.systemd_run, &self.systemctl),
            ),
            SchedulerBackend::None => Arc::new(LogOnlyScheduler),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable structured JSON logging.
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Single-instance lock configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Lock file path. Defaults to `/run/lock` for system units and the
    /// user runtime directory for `scheduler.user` setups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl LockConfig {
    /// Configured lock path, or `cert-monitor.lock` in the default lock
    /// directory.
    ///
    /// System runs (`user == false`) always use `/run/lock`, whatever the
    /// environment of the invoking shell, so timer, follow-up and manual
    /// runs contend on the same file. User runs use `$XDG_RUNTIME_DIR`, or
    /// the temp directory when unset.
    pub fn resolve_path(&self, user: bool) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None if user => dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(DEFAULT_LOCK_FILE),
            None => Path::new(SYSTEM_LOCK_DIR).join(DEFAULT_LOCK_FILE),
        }
    }
}
