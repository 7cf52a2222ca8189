//! Real transports and scheduler ports against stand-in system binaries.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use cert_expiry_monitor::monitor::Monitor;
use cert_expiry_monitor::notify::{Dispatcher, MailTransport, SendmailTransport};
use cert_expiry_monitor::policy::{EntityOverrides, FollowUp, GlobalPolicy};
use cert_expiry_monitor::scheduler::{
    FollowUpScheduler, RunState, SchedulerPort, SystemdRunScheduler,
};
use cert_expiry_monitor::source::DirectoryCertificateSource;

use super::{CertStore, MASTER, SENDER, interval};

/// Write an executable shell script that appends its arguments to `log`
/// and copies stdin to `stdin_copy` when given.
fn recorder(dir: &Path, name: &str, log: &Path, stdin_copy: Option<&Path>) -> PathBuf {
    let path = dir.join(name);
    let mut script = format!(
        "#!/bin/sh\necho \"{name} $*\" >> \"{}\"\n",
        log.display()
    );
    if let Some(copy) = stdin_copy {
        script.push_str(&format!("cat > \"{}\"\n", copy.display()));
    }
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// `--unit=` value of a recorded `systemd-run` call.
fn unit_of(line: &str) -> &str {
    line.split_whitespace()
        .find_map(|word| word.strip_prefix("--unit="))
        .unwrap()
}

#[tokio::test]
async fn test_systemd_port_replaces_pending_follow_up() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let systemd_run = recorder(dir.path(), "systemd-run", &log, None);
    let systemctl = recorder(dir.path(), "systemctl", &log, None);

    let port = SystemdRunScheduler::new()
        .with_user(true)
        .with_commands(systemd_run.to_string_lossy(), systemctl.to_string_lossy());

    let payload = vec![
        "/usr/local/bin/cert-monitor".to_string(),
        "run".to_string(),
    ];
    port.schedule_once("cert-monitor-followup", interval("1d"), &payload)
        .await
        .unwrap();

    let calls = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "systemctl --user --quiet stop cert-monitor-followup-*.timer");
    assert_eq!(
        lines[1],
        "systemctl --user --quiet reset-failed cert-monitor-followup-*.service"
    );

    let unit = unit_of(lines[2]);
    let suffix = unit.strip_prefix("cert-monitor-followup-").unwrap();
    assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(
        lines[2],
        format!(
            "systemd-run --user --unit={unit} --on-active=86400s \
             --timer-property=AccuracySec=1s \
             --description=Certificate expiry follow-up check (1d) \
             -- /usr/local/bin/cert-monitor run"
        )
    );
}

#[tokio::test]
async fn test_systemd_port_follow_up_can_request_the_next() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let systemd_run = recorder(dir.path(), "systemd-run", &log, None);
    let systemctl = recorder(dir.path(), "systemctl", &log, None);

    let port = SystemdRunScheduler::new()
        .with_commands(systemd_run.to_string_lossy(), systemctl.to_string_lossy());
    let payload = vec!["/usr/local/bin/cert-monitor".to_string(), "run".to_string()];

    port.schedule_once("cert-monitor-followup", interval("6h"), &payload)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    port.schedule_once("cert-monitor-followup", interval("6h"), &payload)
        .await
        .unwrap();

    let calls = std::fs::read_to_string(&log).unwrap();
    let runs: Vec<&str> = calls
        .lines()
        .filter(|l| l.starts_with("systemd-run "))
        .collect();
    assert_eq!(runs.len(), 2);

    // The second request must not reuse the unit the first run executes in.
    let first = unit_of(runs[0]);
    let second = unit_of(runs[1]);
    assert_ne!(first, second);

    let stops: Vec<&str> = calls
        .lines()
        .filter(|l| l.starts_with("systemctl --quiet stop "))
        .collect();
    assert_eq!(stops.len(), 2);
    for stop in stops {
        let pattern = stop.rsplit(' ').next().unwrap();
        let prefix = pattern.strip_suffix("*.timer").unwrap();
        assert!(format!("{first}.timer").starts_with(prefix));
        assert!(format!("{second}.timer").starts_with(prefix));
    }
}

#[tokio::test]
async fn test_systemd_port_reports_refusal() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let systemctl = recorder(dir.path(), "systemctl", &log, None);
    let systemd_run = dir.path().join("systemd-run");
    std::fs::write(&systemd_run, "#!/bin/sh\necho 'Unit already exists' >&2\nexit 1\n").unwrap();
    std::fs::set_permissions(&systemd_run, std::fs::Permissions::from_mode(0o755)).unwrap();

    let port = SystemdRunScheduler::new()
        .with_commands(systemd_run.to_string_lossy(), systemctl.to_string_lossy());
    let scheduler = FollowUpScheduler::new(
        Arc::new(port),
        "cert-monitor-followup",
        vec!["/bin/true".to_string()],
    );

    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 2);

    let monitor = Monitor::new(
        Box::new(DirectoryCertificateSource::new(store.root())),
        GlobalPolicy::new(MASTER).with_follow_up(FollowUp::After(interval("12h"))),
        EntityOverrides::new(),
        Dispatcher::new(Arc::new(super::Outbox::default()), SENDER),
        scheduler,
    );

    let report = monitor.run_once(now).await.unwrap();
    match report.state {
        RunState::FollowUpFailed { ref error, .. } => {
            assert!(error.contains("Unit already exists"));
        }
        ref other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn test_sendmail_transport_hands_message_to_binary() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let message_copy = dir.path().join("message.eml");
    let sendmail = recorder(dir.path(), "sendmail", &log, Some(&message_copy));

    let transport = SendmailTransport::new(sendmail.to_string_lossy());
    assert_eq!(transport.name(), "sendmail");

    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);

    let monitor = Monitor::new(
        Box::new(DirectoryCertificateSource::new(store.root())),
        GlobalPolicy::new(MASTER),
        EntityOverrides::new(),
        Dispatcher::new(Arc::new(transport), SENDER),
        FollowUpScheduler::new(
            Arc::new(super::Timers::default()),
            "cert-monitor-followup",
            Vec::new(),
        ),
    );

    let report = monitor.run_once(now).await.unwrap();
    assert_eq!(report.failed_sends(), 0);

    let calls = std::fs::read_to_string(&log).unwrap();
    assert!(calls.contains(MASTER));
    assert!(calls.contains(SENDER));

    let message = std::fs::read_to_string(&message_copy).unwrap();
    assert!(message.contains("Subject: Certificate for a.example expires in 10 days"));
    assert!(message.contains("Days remaining: 10"));
}
