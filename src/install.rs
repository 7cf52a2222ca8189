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

//! Installation of the daily systemd trigger.
//!
//! Two units drive the periodic run:
//!
//! - `cert-monitor.service`: oneshot service running `cert-monitor run`
//! - `cert-monitor.timer`: fires the service daily, catching up missed runs
//!
//! Follow-up runs do not need installed units; they are transient units
//! created by [`SystemdRunScheduler`](crate::scheduler::SystemdRunScheduler).

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};

/// Name of the oneshot service unit.
pub const SERVICE_UNIT: &str = "cert-monitor.service";

/// Name of the daily timer unit.
pub const TIMER_UNIT: &str = "cert-monitor.timer";

/// Unit description.
pub const SERVICE_DESCRIPTION: &str = "Certificate expiry monitor";

/// System-wide unit directory.
pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// What to install and where.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Monitor executable.
    pub executable: PathBuf,
    /// Configuration file passed to every run.
    pub config_path: Option<PathBuf>,
    /// Per-user units instead of system units.
    pub user: bool,
    /// Directory the unit files are written to.
    pub unit_dir: PathBuf,
    /// `OnCalendar=` expression of the timer.
    pub on_calendar: String,
    /// `systemctl` binary.
    pub systemctl: String,
}

impl InstallConfig {
    /// Install `executable` with the default unit directory for `user`.
    ///
    /// # Errors
    ///
    /// Fails for user units when no configuration directory is known.
    pub fn new(executable: impl Into<PathBuf>, user: bool) -> Result<Self> {
        Ok(Self {
            executable: executable.into(),
            config_path: None,
            user,
            unit_dir: default_unit_dir(user)?,
            on_calendar: "daily".to_string(),
            systemctl: "systemctl".to_string(),
        })
    }

    /// Pass `--config PATH` to every run.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Write units somewhere else.
    pub fn with_unit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = dir.into();
        self
    }

    /// Change the timer schedule.
    pub fn with_on_calendar(mut self, calendar: impl Into<String>) -> Self {
        self.on_calendar = calendar.into();
        self
    }

    /// Use another `systemctl` binary.
    pub fn with_systemctl(mut self, systemctl: impl Into<String>) -> Self {
        self.systemctl = systemctl.into();
        self
    }

    /// Full path of the service unit file.
    pub fn service_path(&self) -> PathBuf {
        self.unit_dir.join(SERVICE_UNIT)
    }

    /// Full path of the timer unit file.
    pub fn timer_path(&self) -> PathBuf {
        self.unit_dir.join(TIMER_UNIT)
    }
}

/// `/etc/systemd/system`, or `$XDG_CONFIG_HOME/systemd/user` for user units.
pub fn default_unit_dir(user: bool) -> Result<PathBuf> {
    if !user {
        return Ok(PathBuf::from(SYSTEM_UNIT_DIR));
    }
    dirs::config_dir()
        .map(|dir| dir.join("systemd").join("user"))
        .ok_or_else(|| MonitorError::install("Cannot determine user configuration directory"))
}

/// Command line of the periodic run, as the service's `ExecStart=`.
pub fn exec_start(config: &InstallConfig) -> String {
    let mut words = vec![quote(&config.executable), "run".to_string()];
    if let Some(ref path) = config.config_path {
        words.push("--config".to_string());
        words.push(quote(path));
    }
    words.join(" ")
}

fn quote(path: &Path) -> String {
    let text = path.to_string_lossy();
    if text.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        text.into_owned()
    }
}

/// Text of `cert-monitor.service`.
pub fn render_service(config: &InstallConfig) -> String {
    let install_target = if config.user {
        "default.target"
    } else {
        "multi-user.target"
    };
    let network = if config.user {
        String::new()
    } else {
        "Wants=network-online.target\nAfter=network-online.target\n".to_string()
    };

    format!(
        "[Unit]\n\
         Description={SERVICE_DESCRIPTION}\n\
         {network}\
         \n\
         [Service]\n\
         Type=oneshot\n\
         ExecStart={exec}\n\
         \n\
         [Install]\n\
         WantedBy={install_target}\n",
        exec = exec_start(config),
    )
}

/// Text of `cert-monitor.timer`.
pub fn render_timer(config: &InstallConfig) -> String {
    format!(
        "[Unit]\n\
         Description=Daily run of the {SERVICE_DESCRIPTION}\n\
         \n\
         [Timer]\n\
         OnCalendar={calendar}\n\
         Persistent=true\n\
         Unit={SERVICE_UNIT}\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n",
        calendar = config.on_calendar,
    )
}

/// Write both unit files. With `activate`, reload systemd and enable the
/// timer.
///
/// Returns the paths written.
pub fn install(config: &InstallConfig, activate: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&config.unit_dir).map_err(|e| {
        MonitorError::install(format!(
            "Failed to create {}: {e}",
            config.unit_dir.display()
        ))
    })?;

    let units = [
        (config.service_path(), render_service(config)),
        (config.timer_path(), render_timer(config)),
    ];

    let mut written = Vec::with_capacity(units.len());
    for (path, text) in units {
        std::fs::write(&path, text).map_err(|e| {
            MonitorError::install(format!("Failed to write {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Wrote unit file");
        written.push(path);
    }

    if activate {
        systemctl(config, &["daemon-reload"])?;
        systemctl(config, &["enable", "--now", TIMER_UNIT])?;
    }

    info!(unit_dir = %config.unit_dir.display(), "Installed {TIMER_UNIT}");
    Ok(written)
}

/// Disable the timer (with `activate`) and delete both unit files.
///
/// Missing files are not an error. Returns the paths removed.
pub fn uninstall(config: &InstallConfig, activate: bool) -> Result<Vec<PathBuf>> {
    if activate && let Err(e) = systemctl(config, &["disable", "--now", TIMER_UNIT]) {
        warn!(error = %e, "Could not disable {TIMER_UNIT}");
    }

    let mut removed = Vec::new();
    for path in [config.timer_path(), config.service_path()] {
        match std::fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MonitorError::install(format!(
                    "Failed to remove {}: {e}",
                    path.display()
                )));
            }
        }
    }

    if activate {
        systemctl(config, &["daemon-reload"])?;
    }

    info!(removed = removed.len(), "Uninstalled {TIMER_UNIT}");
    Ok(removed)
}

/// Installation state as seen from the unit directory and systemd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStatus {
    /// Service unit file exists.
    pub service_installed: bool,
    /// Timer unit file exists.
    pub timer_installed: bool,
    /// Output of `systemctl is-active` for the timer, when it could be run.
    pub timer_state: Option<String>,
}

/// Report what is installed. With `query`, also ask systemd for the timer
/// state.
pub fn status(config: &InstallConfig, query: bool) -> InstallStatus {
    let timer_state = if query {
        let mut command = systemctl_command(config);
        command.args(["is-active", TIMER_UNIT]);
        command
            .output()
            .ok()
            .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
            .filter(|state| !state.is_empty())
    } else {
        None
    };

    InstallStatus {
        service_installed: config.service_path().is_file(),
        timer_installed: config.timer_path().is_file(),
        timer_state,
    }
}

fn systemctl_command(config: &InstallConfig) -> Command {
    let mut command = Command::new(&config.systemctl);
    if config.user {
        command.arg("--user");
    }
    command
}

fn systemctl(config: &InstallConfig, args: &[&str]) -> Result<()> {
    let mut command = systemctl_command(config);
    command.args(args);
    debug!(command = ?command, "Running systemctl");

    let output = command.output().map_err(|e| {
        MonitorError::install(format!("Failed to run {}: {e}", config.systemctl))
    })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(MonitorError::install(format!(
            "{} {} failed: {}",
            config.systemctl,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
