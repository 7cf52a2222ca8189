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

//! Certificate Expiry Monitor
//!
//! # Usage
//!
//! ```text
//! cert-monitor [OPTIONS] [COMMAND]
//!
//! Commands:
//!   run       Evaluate all certificates, notify and schedule a follow-up (default)
//!   status    Print the expiry table without notifying
//!   config    Configuration management
//!
//! Options:
//!   -c, --config <PATH>   Path to configuration file
//!   -v, --verbose         More log output (repeatable)
//!   -q, --quiet           Less log output (repeatable)
//!   --dry-run             Log notifications and follow-ups instead of performing them
//!   -h, --help            Print help
//!   -V, --version         Print version
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Run once, as the daily timer does
//! cert-monitor run --config /etc/cert-monitor/config.toml
//!
//! # See what would be notified
//! cert-monitor status
//!
//! # Start from the commented template
//! cert-monitor config init --output /etc/cert-monitor/config.toml
//! ```

use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::SystemTime;

use tracing::{error, info, warn};

use cert_expiry_monitor::config::{ConfigLoader, LoggingConfig, MonitorConfig, write_default_config};
use cert_expiry_monitor::error::MonitorError;
use cert_expiry_monitor::lock::InstanceLock;
use cert_expiry_monitor::logging;
use cert_expiry_monitor::monitor::Monitor;
use cert_expiry_monitor::scheduler::plan_follow_up;

/// Certificate Expiry Monitor
#[derive(Parser)]
#[command(name = "cert-monitor")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mail reminders for expiring X.509 certificates", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More log output (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Less log output (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    quiet: u8,

    /// Log notifications and follow-ups instead of performing them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Evaluate all certificates, notify and schedule a follow-up
    Run,

    /// Print the expiry table without notifying
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigAction {
    /// Validate the configuration file
    Validate,

    /// Print the effective configuration
    Show {
        /// Do not expand ${VAR} references
        #[arg(long)]
        raw: bool,
    },

    /// Write a commented configuration template
    Init {
        /// Where to write the template
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Commands::Run);

    if let Commands::Config {
        action: ConfigAction::Init { output, force },
    } = &command
    {
        init_logging(&LoggingConfig::default(), &cli);
        return finish(cmd_config_init(&cli, output.as_deref(), *force));
    }

    let expand = !matches!(
        command,
        Commands::Config {
            action: ConfigAction::Show { raw: true }
        }
    );
    let loaded = loader(&cli).with_expand_variables(expand).load_with_path();

    let logging_config = match &loaded {
        Ok((config, _)) => config.logging.clone(),
        Err(_) => LoggingConfig::default(),
    };
    init_logging(&logging_config, &cli);

    let (config, config_path) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    for warning in config.warnings() {
        warn!("{warning}");
    }

    let result = match command {
        Commands::Run => {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to create async runtime: {e}");
                    return ExitCode::FAILURE;
                }
            };
            runtime.block_on(cmd_run(&cli, &config, &config_path))
        }
        Commands::Status => cmd_status(&config),
        Commands::Config { action } => match action {
            ConfigAction::Validate => cmd_config_validate(&config, &config_path),
            ConfigAction::Show { .. } => cmd_config_show(&config),
            ConfigAction::Init { .. } => Ok(()),
        },
    };

    finish(result)
}

fn init_logging(config: &LoggingConfig, cli: &Cli) {
    if let Err(e) = logging::init(config, cli.verbose, cli.quiet) {
        eprintln!("{e}");
    }
}

fn finish(result: Result<(), MonitorError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn loader(cli: &Cli) -> ConfigLoader {
    let loader = ConfigLoader::new();
    match cli.config {
        Some(ref path) => loader.with_path(path),
        None => loader,
    }
}

/// Command line the follow-up timer runs: this executable with the same
/// configuration file, as absolute paths.
fn follow_up_command(config_path: &Path) -> Result<Vec<String>, MonitorError> {
    let exe = std::env::current_exe()?;
    let config_path = std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.into());

    Ok(vec![
        exe.to_string_lossy().into_owned(),
        "run".to_string(),
        "--config".to_string(),
        config_path.to_string_lossy().into_owned(),
    ])
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_run(cli: &Cli, config: &MonitorConfig, config_path: &Path) -> Result<(), MonitorError> {
    let _lock = match InstanceLock::acquire(config.lock.resolve_path(config.scheduler.user)) {
        Ok(lock) => lock,
        Err(MonitorError::AlreadyRunning(path)) => {
            warn!(lock = %path.display(), "Another run is in progress, skipping this one");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if cli.dry_run {
        info!("Dry run: notifications and follow-ups are only logged");
    }

    let monitor = Monitor::from_config(config, follow_up_command(config_path)?, cli.dry_run)?;
    let report = monitor.run_once(SystemTime::now()).await?;

    if report.failed_sends() > 0 {
        warn!(failed = report.failed_sends(), "Some notifications were not delivered");
    }
    Ok(())
}

fn cmd_status(config: &MonitorConfig) -> Result<(), MonitorError> {
    let monitor = Monitor::from_config(config, Vec::new(), true)?;
    let now = SystemTime::now();
    let (decisions, skipped) = monitor.evaluate_all(now)?;

    let width = decisions
        .iter()
        .map(|d| d.entity_id.len())
        .chain(skipped.iter().map(|s| s.id.len()))
        .chain(std::iter::once("ENTITY".len()))
        .max()
        .unwrap_or(6);

    println!(
        "{:<width$}  {:<10}  {:>5}  {:<6}  {:<9}  RECIPIENTS",
        "ENTITY", "EXPIRES", "DAYS", "NOTIFY", "FOLLOW-UP"
    );
    for decision in &decisions {
        let expires = time::OffsetDateTime::from(decision.expiry).date();
        let follow_up = match decision.policy.follow_up.interval() {
            Some(interval) => interval.to_string(),
            None => "-".to_string(),
        };
        println!(
            "{:<width$}  {:<10}  {:>5}  {:<6}  {:<9}  {}",
            decision.entity_id,
            expires.to_string(),
            decision.days_remaining,
            if decision.should_notify { "yes" } else { "no" },
            follow_up,
            decision.policy.recipients.join(", "),
        );
    }
    for skip in &skipped {
        println!("{:<width$}  skipped ({}): {}", skip.id, skip.reason, skip.error);
    }

    let outcome = plan_follow_up(&decisions, &config.policy, config.scheduler.follow_up_mode);
    println!();
    match outcome.next_run_delay {
        Some(delay) if !outcome.notified.is_empty() => {
            println!(
                "A run now would notify {} entities and follow up in {delay}.",
                outcome.notified.len()
            );
        }
        _ if !outcome.notified.is_empty() => {
            println!(
                "A run now would notify {} entities without a follow-up.",
                outcome.notified.len()
            );
        }
        _ => println!("Nothing to notify."),
    }

    Ok(())
}

fn cmd_config_validate(config: &MonitorConfig, config_path: &Path) -> Result<(), MonitorError> {
    println!("Configuration {} is valid.", config_path.display());
    println!();
    println!("Summary:");
    println!("  Certificates: {}", config.certificates.directory.display());
    println!("  Master recipient: {}", config.policy.master_recipient);
    println!("  Warning days: {}", config.policy.warning_days);
    println!("  Follow-up: {}", config.policy.follow_up);
    println!("  Domain overrides: {}", config.domains.len());
    println!("  Transport: {:?}", config.mail.transport);
    println!("  Scheduler: {:?}", config.scheduler.backend);

    let warnings = config.warnings();
    if !warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in warnings {
            println!("  {warning}");
        }
    }
    Ok(())
}

fn cmd_config_show(config: &MonitorConfig) -> Result<(), MonitorError> {
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_config_init(cli: &Cli, output: Option<&Path>, force: bool) -> Result<(), MonitorError> {
    let path = output
        .map(Path::to_path_buf)
        .or_else(|| cli.config.clone())
        .unwrap_or_else(|| PathBuf::from("cert-monitor.toml"));

    write_default_config(&path, force)?;
    println!("Wrote {}", path.display());
    Ok(())
}
