//! Integration test utilities and helpers
//!
//! Certificates are generated with `rcgen` at test time into a temporary
//! store laid out like `/etc/letsencrypt/live`. Mail and scheduling go to
//! in-memory fakes so each test can assert on exactly what left the monitor.

mod config_runs;
mod run_scenarios;
mod system_binaries;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use rcgen::{CertificateParams, KeyPair};
use tempfile::TempDir;
use time::OffsetDateTime;

use cert_expiry_monitor::error::{MonitorError, Result};
use cert_expiry_monitor::monitor::Monitor;
use cert_expiry_monitor::notify::{Dispatcher, MailMessage, MailTransport};
use cert_expiry_monitor::policy::{EntityOverrides, GlobalPolicy, Interval};
use cert_expiry_monitor::scheduler::{FollowUpMode, FollowUpScheduler, SchedulerPort};
use cert_expiry_monitor::source::DirectoryCertificateSource;

/// Sender used by every test monitor.
pub const SENDER: &str = "cert-monitor@monitor.example.com";

/// Master recipient used by every test policy.
pub const MASTER: &str = "hostmaster@example.com";

/// Follow-up command handed to the scheduler.
pub fn follow_up_payload() -> Vec<String> {
    vec![
        "/usr/local/bin/cert-monitor".to_string(),
        "run".to_string(),
    ]
}

/// Temporary certificate store.
pub struct CertStore {
    dir: TempDir,
}

impl CertStore {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    fn entity_dir(&self, id: &str) -> PathBuf {
        let dir = self.root().join(id);
        std::fs::create_dir_all(&dir).expect("entity dir");
        dir
    }

    /// Add a self-signed certificate for `id` expiring `days` days and one
    /// hour after `now`. A negative `days` yields an expired certificate.
    pub fn add(&self, id: &str, now: SystemTime, days: i64) {
        let now = OffsetDateTime::from(now);
        let mut params = CertificateParams::new(vec![id.to_string()]).expect("params");
        params.not_before = now - time::Duration::days(400);
        params.not_after = now + time::Duration::days(days) + time::Duration::hours(1);

        let key = KeyPair::generate().expect("key");
        let cert = params.self_signed(&key).expect("self-signed");
        std::fs::write(self.entity_dir(id).join("fullchain.pem"), cert.pem()).expect("write pem");
    }

    /// Add an entity whose chain file is not a certificate.
    pub fn add_garbage(&self, id: &str) {
        std::fs::write(
            self.entity_dir(id).join("fullchain.pem"),
            "-----BEGIN CERTIFICATE-----\nnot base64 at all\n-----END CERTIFICATE-----\n",
        )
        .expect("write garbage");
    }

    /// Add an entity whose chain file holds only whitespace.
    pub fn add_blank(&self, id: &str) {
        std::fs::write(self.entity_dir(id).join("fullchain.pem"), "\n").expect("write blank");
    }

    /// Add an entity directory without a chain file.
    pub fn add_empty(&self, id: &str) {
        self.entity_dir(id);
    }
}

/// Records every message; fails for the listed recipients.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<MailMessage>>,
    failing: BTreeSet<String>,
}

impl Outbox {
    pub fn failing(recipients: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().expect("outbox lock").clone()
    }

    /// Recipients of the messages about `entity`, in sorted order.
    pub fn recipients_for(&self, entity: &str) -> Vec<String> {
        let mut recipients: Vec<String> = self
            .sent()
            .into_iter()
            .filter(|m| m.subject.contains(&format!(" {entity} ")))
            .map(|m| m.to)
            .collect();
        recipients.sort();
        recipients
    }
}

#[async_trait]
impl MailTransport for Outbox {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        if self.failing.contains(&message.to) {
            return Err(MonitorError::dispatch(&message.to, "mailbox unavailable"));
        }
        self.sent.lock().expect("outbox lock").push(message.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "outbox"
    }
}

/// One recorded follow-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRequest {
    pub name: String,
    pub delay: Interval,
    pub payload: Vec<String>,
}

/// Records follow-up requests; optionally refuses them.
#[derive(Default)]
pub struct Timers {
    requests: Mutex<Vec<TimerRequest>>,
    refuse: bool,
}

impl Timers {
    pub fn refusing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            refuse: true,
        }
    }

    pub fn requests(&self) -> Vec<TimerRequest> {
        self.requests.lock().expect("timers lock").clone()
    }
}

#[async_trait]
impl SchedulerPort for Timers {
    async fn schedule_once(&self, name: &str, delay: Interval, payload: &[String]) -> Result<()> {
        if self.refuse {
            return Err(MonitorError::scheduling("timer manager unavailable"));
        }
        self.requests.lock().expect("timers lock").push(TimerRequest {
            name: name.to_string(),
            delay,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn backend(&self) -> &str {
        "timers"
    }
}

/// Monitor over `store` with the given policy, wired to the fakes.
pub fn monitor(
    store: &CertStore,
    global: GlobalPolicy,
    overrides: EntityOverrides,
    mode: FollowUpMode,
    outbox: Arc<Outbox>,
    timers: Arc<Timers>,
) -> Monitor {
    let dispatcher = Dispatcher::new(outbox, SENDER);
    let scheduler = FollowUpScheduler::new(timers, "cert-monitor-followup", follow_up_payload());
    Monitor::new(
        Box::new(DirectoryCertificateSource::new(store.root())),
        global,
        overrides,
        dispatcher,
        scheduler,
    )
    .with_follow_up_mode(mode)
}

/// Interval from a span string.
pub fn interval(span: &str) -> Interval {
    span.parse().expect("interval")
}
