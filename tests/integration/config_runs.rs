//! Runs assembled from a configuration file.

use std::time::SystemTime;

use cert_expiry_monitor::config::ConfigLoader;
use cert_expiry_monitor::monitor::Monitor;
use cert_expiry_monitor::scheduler::RunState;

use super::{CertStore, follow_up_payload};

fn write_config(store: &CertStore, body: &str) -> tempfile::NamedTempFile {
    let text = format!(
        "[certificates]\ndirectory = \"{}\"\n\n{body}",
        store.root().display()
    );
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), text).unwrap();
    file
}

#[tokio::test]
async fn test_config_file_drives_policy_and_overrides() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);
    store.add("b.example", now, 30);
    store.add("c.example", now, 5);

    let file = write_config(
        &store,
        r#"
[policy]
master_recipient = "hostmaster@example.com"
sender = "monitor@example.com"
warning_days = 14
follow_up_interval = "24h"

[domains."b.example"]
recipients = ["shop@example.com"]
warning_days = 45

[domains."c.example"]
warning_days = 2

[mail]
transport = "log"

[scheduler]
backend = "none"
"#,
    );

    let config = ConfigLoader::new().with_path(file.path()).load().unwrap();
    let monitor = Monitor::from_config(&config, follow_up_payload(), false).unwrap();
    let report = monitor.run_once(now).await.unwrap();

    let notified: Vec<&str> = report.outcome.notified.iter().map(String::as_str).collect();
    assert_eq!(notified, vec!["a.example", "b.example"]);

    let b = report
        .decisions
        .iter()
        .find(|d| d.entity_id == "b.example")
        .unwrap();
    assert_eq!(
        b.policy.recipients,
        vec![
            "hostmaster@example.com".to_string(),
            "shop@example.com".to_string()
        ]
    );

    assert_eq!(report.failed_sends(), 0);
    assert!(matches!(report.state, RunState::FollowUpScheduled { .. }));
}

#[tokio::test]
async fn test_dry_run_does_not_build_real_transport() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 1);

    // Would fail to build for a real run: the password variable is unset.
    let file = write_config(
        &store,
        r#"
[policy]
master_recipient = "hostmaster@example.com"
follow_up_interval = "2h"

[mail]
transport = "smtp"

[mail.smtp]
server = "smtp.example.com"
username = "monitor"
password_source = "env:CERT_MONITOR_IT_UNSET_PASSWORD"
"#,
    );

    let config = ConfigLoader::new().with_path(file.path()).load().unwrap();
    assert!(Monitor::from_config(&config, follow_up_payload(), false).is_err());

    let monitor = Monitor::from_config(&config, follow_up_payload(), true).unwrap();
    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(report.outcome.notified.len(), 1);
    assert_eq!(report.failed_sends(), 0);
    assert_eq!(
        report.state,
        RunState::FollowUpScheduled {
            delay: super::interval("2h")
        }
    );
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let store = CertStore::new();
    let file = write_config(
        &store,
        r#"
[policy]
master_recipient = "hostmaster@example.com"
follow_up_interval = "every day"
"#,
    );

    let err = ConfigLoader::new()
        .with_path(file.path())
        .load()
        .unwrap_err()
        .to_string();
    assert!(err.contains("Invalid TOML"));
}
