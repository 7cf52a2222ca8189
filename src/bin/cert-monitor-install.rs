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

//! Certificate Expiry Monitor Timer Installer
//!
//! Installs, removes and inspects the systemd units that run the monitor
//! once a day.
//!
//! # Usage
//!
//! ```text
//! cert-monitor-install install   - Write and enable cert-monitor.timer
//! cert-monitor-install uninstall - Disable and remove the units
//! cert-monitor-install status    - Show what is installed
//! ```
//!
//! # Privileges
//!
//! System units live in `/etc/systemd/system` and need root. With `--user`
//! the units go to `~/.config/systemd/user` and the per-user manager.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use cert_expiry_monitor::config::LoggingConfig;
use cert_expiry_monitor::error::MonitorError;
use cert_expiry_monitor::install::{self, InstallConfig};
use cert_expiry_monitor::logging;

/// Certificate Expiry Monitor Timer Installer
#[derive(Parser)]
#[command(name = "cert-monitor-install")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install the daily cert-monitor systemd timer", long_about = None)]
struct Cli {
    /// Per-user units instead of system units
    #[arg(long, global = true)]
    user: bool,

    /// Write or remove unit files only, do not call systemctl
    #[arg(long, global = true)]
    no_activate: bool,

    /// Unit directory (defaults to the systemd system or user directory)
    #[arg(long, global = true, value_name = "DIR")]
    unit_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write and enable cert-monitor.service and cert-monitor.timer
    Install {
        /// Configuration file passed to every run
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Monitor executable (defaults to cert-monitor next to this binary)
        #[arg(long, value_name = "PATH")]
        executable: Option<PathBuf>,

        /// Timer schedule as a systemd calendar expression
        #[arg(long, value_name = "CALENDAR", default_value = "daily")]
        on_calendar: String,
    },

    /// Disable the timer and remove both units
    Uninstall,

    /// Show which units are installed and whether the timer is active
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&LoggingConfig::default(), 0, 0) {
        eprintln!("{e}");
    }

    let result = match &cli.command {
        Commands::Install {
            config,
            executable,
            on_calendar,
        } => cmd_install(&cli, config.clone(), executable.clone(), on_calendar),
        Commands::Uninstall => cmd_uninstall(&cli),
        Commands::Status => cmd_status(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn base_config(cli: &Cli, executable: PathBuf) -> Result<InstallConfig, MonitorError> {
    let config = InstallConfig::new(executable, cli.user)?;
    Ok(match cli.unit_dir {
        Some(ref dir) => config.with_unit_dir(dir),
        None => config,
    })
}

/// `cert-monitor` in the directory of the running installer.
fn sibling_monitor() -> Result<PathBuf, MonitorError> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| MonitorError::install("Cannot locate the installer directory"))?;
    Ok(dir.join("cert-monitor"))
}

fn cmd_install(
    cli: &Cli,
    config_path: Option<PathBuf>,
    executable: Option<PathBuf>,
    on_calendar: &str,
) -> Result<(), MonitorError> {
    let executable = match executable {
        Some(path) => path,
        None => sibling_monitor()?,
    };
    if !executable.is_file() {
        return Err(MonitorError::install(format!(
            "Monitor executable not found: {}",
            executable.display()
        )));
    }
    let executable = std::fs::canonicalize(&executable)?;

    let mut config = base_config(cli, executable)?.with_on_calendar(on_calendar);
    if let Some(path) = config_path {
        let path = std::fs::canonicalize(&path).map_err(|e| {
            MonitorError::install(format!("Configuration file {}: {e}", path.display()))
        })?;
        config = config.with_config_path(path);
    }

    for path in install::install(&config, !cli.no_activate)? {
        println!("Wrote {}", path.display());
    }
    if cli.no_activate {
        let scope = if cli.user { " --user" } else { "" };
        println!(
            "Units written; enable with: systemctl{scope} enable --now {}",
            install::TIMER_UNIT
        );
    } else {
        println!("Enabled {}", install::TIMER_UNIT);
    }
    Ok(())
}

fn cmd_uninstall(cli: &Cli) -> Result<(), MonitorError> {
    let config = base_config(cli, PathBuf::new())?;
    let removed = install::uninstall(&config, !cli.no_activate)?;
    if removed.is_empty() {
        println!("Nothing installed in {}", config.unit_dir.display());
    }
    for path in removed {
        println!("Removed {}", path.display());
    }
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<(), MonitorError> {
    let config = base_config(cli, PathBuf::new())?;
    let status = install::status(&config, !cli.no_activate);

    let mark = |installed: bool| if installed { "installed" } else { "missing" };
    println!("Unit directory: {}", config.unit_dir.display());
    println!("  {}: {}", install::SERVICE_UNIT, mark(status.service_installed));
    println!("  {}: {}", install::TIMER_UNIT, mark(status.timer_installed));
    if let Some(state) = status.timer_state {
        println!("  Timer state: {state}");
    }
    Ok(())
}
