//! End-to-end runs over a generated certificate store.

use std::sync::Arc;
use std::time::SystemTime;

use cert_expiry_monitor::policy::{EntityOverride, EntityOverrides, FollowUp, GlobalPolicy};
use cert_expiry_monitor::scheduler::{FollowUpMode, RunState};
use cert_expiry_monitor::source::SkipReason;

use super::{CertStore, MASTER, Outbox, SENDER, Timers, follow_up_payload, interval, monitor};

fn daily_policy() -> GlobalPolicy {
    GlobalPolicy::new(MASTER)
        .with_warning_days(14)
        .with_follow_up(FollowUp::After(interval("24h")))
}

#[tokio::test]
async fn test_notifying_entity_gets_mail_and_one_follow_up() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        EntityOverrides::new(),
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].days_remaining, 10);
    assert!(report.decisions[0].should_notify);

    let sent = outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, SENDER);
    assert_eq!(sent[0].to, MASTER);
    assert_eq!(sent[0].subject, "Certificate for a.example expires in 10 days");
    assert!(sent[0].body.contains("Days remaining: 10"));

    let requests = timers.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].name, "cert-monitor-followup");
    assert_eq!(requests[0].delay.as_secs(), 24 * 3600);
    assert_eq!(requests[0].payload, follow_up_payload());
    assert_eq!(
        report.state,
        RunState::FollowUpScheduled {
            delay: interval("24h")
        }
    );
}

#[tokio::test]
async fn test_entity_outside_window_is_quiet() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("b.example", now, 30);

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        EntityOverrides::new(),
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(report.decisions[0].days_remaining, 30);
    assert!(!report.decisions[0].should_notify);
    assert!(outbox.sent().is_empty());
    assert!(timers.requests().is_empty());
    assert_eq!(report.state, RunState::NoFollowUp);
}

#[tokio::test]
async fn test_override_narrows_window() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("c.example", now, 5);

    let mut overrides = EntityOverrides::new();
    overrides.insert(
        "c.example".to_string(),
        EntityOverride {
            warning_days: Some(2),
            ..Default::default()
        },
    );

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        overrides,
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(report.decisions[0].policy.warning_days, 2);
    assert!(!report.decisions[0].should_notify);
    assert!(outbox.sent().is_empty());
    assert!(timers.requests().is_empty());
}

#[tokio::test]
async fn test_disabled_follow_up_sends_single_warning() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        GlobalPolicy::new(MASTER).with_follow_up("".parse().unwrap()),
        EntityOverrides::new(),
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(outbox.sent().len(), 1);
    assert!(timers.requests().is_empty());
    assert_eq!(report.state, RunState::NoFollowUp);
    assert!(report.outcome.notified.contains("a.example"));
}

#[tokio::test]
async fn test_malformed_certificate_is_skipped() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);
    store.add_garbage("d.example");
    store.add_empty("e.example");

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        EntityOverrides::new(),
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].id, "d.example");
    assert_eq!(report.skipped[0].reason, SkipReason::Unparsable);
    assert_eq!(report.skipped[1].id, "e.example");
    assert_eq!(report.skipped[1].reason, SkipReason::Unreadable);

    assert_eq!(outbox.recipients_for("a.example"), vec![MASTER.to_string()]);
    assert_eq!(timers.requests().len(), 1);
}

#[tokio::test]
async fn test_blank_chain_file_is_skipped() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);
    store.add_blank("b.example");

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        EntityOverrides::new(),
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "b.example");
    assert_eq!(report.skipped[0].reason, SkipReason::Unparsable);
    assert_eq!(outbox.recipients_for("a.example"), vec![MASTER.to_string()]);
}

#[tokio::test]
async fn test_failed_recipient_does_not_stop_the_others() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 3);
    store.add("f.example", now, 1);

    let mut overrides = EntityOverrides::new();
    overrides.insert(
        "a.example".to_string(),
        EntityOverride {
            recipients: vec!["web@example.com".to_string()],
            ..Default::default()
        },
    );

    let outbox = Arc::new(Outbox::failing(&[MASTER]));
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        overrides,
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(report.dispatches.len(), 2);
    assert_eq!(report.failed_sends(), 2);
    assert_eq!(
        outbox.recipients_for("a.example"),
        vec!["web@example.com".to_string()]
    );
    assert!(outbox.recipients_for("f.example").is_empty());

    // Delivery problems do not suppress the reminder chain.
    assert_eq!(timers.requests().len(), 1);
}

#[tokio::test]
async fn test_scheduling_failure_does_not_fail_the_run() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::refusing());
    let monitor = monitor(
        &store,
        daily_policy(),
        EntityOverrides::new(),
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(outbox.sent().len(), 1);
    match report.state {
        RunState::FollowUpFailed { delay, ref error } => {
            assert_eq!(delay, interval("24h"));
            assert!(error.contains("timer manager unavailable"));
        }
        ref other => panic!("unexpected state {other:?}"),
    }
    assert!(report.state.is_terminal());
}

#[tokio::test]
async fn test_expired_certificate_keeps_notifying() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("old.example", now, -3);

    let outbox = Arc::new(Outbox::default());
    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        EntityOverrides::new(),
        FollowUpMode::Global,
        outbox.clone(),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    // Expiry is 3 days minus one hour ago, which floors to -3.
    assert_eq!(report.decisions[0].days_remaining, -3);
    assert_eq!(
        outbox.sent()[0].subject,
        "Certificate for old.example expired 3 days ago"
    );
    assert_eq!(timers.requests().len(), 1);
}

#[tokio::test]
async fn test_global_mode_ignores_entity_intervals() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);

    let mut overrides = EntityOverrides::new();
    overrides.insert(
        "a.example".to_string(),
        EntityOverride {
            follow_up: Some(FollowUp::After(interval("1h"))),
            ..Default::default()
        },
    );

    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        overrides,
        FollowUpMode::Global,
        Arc::new(Outbox::default()),
        timers.clone(),
    );

    let report = monitor.run_once(now).await.unwrap();

    assert_eq!(
        report.decisions[0].policy.follow_up,
        FollowUp::After(interval("1h"))
    );
    assert_eq!(timers.requests()[0].delay, interval("24h"));
}

#[tokio::test]
async fn test_shortest_effective_mode_uses_entity_intervals() {
    let now = SystemTime::now();
    let store = CertStore::new();
    store.add("a.example", now, 10);
    store.add("g.example", now, 4);
    store.add("h.example", now, 60);

    let mut overrides = EntityOverrides::new();
    overrides.insert(
        "g.example".to_string(),
        EntityOverride {
            follow_up: Some(FollowUp::After(interval("6h"))),
            ..Default::default()
        },
    );
    overrides.insert(
        "h.example".to_string(),
        EntityOverride {
            follow_up: Some(FollowUp::After(interval("1min"))),
            ..Default::default()
        },
    );

    let timers = Arc::new(Timers::default());
    let monitor = monitor(
        &store,
        daily_policy(),
        overrides,
        FollowUpMode::ShortestEffective,
        Arc::new(Outbox::default()),
        timers.clone(),
    );

    monitor.run_once(now).await.unwrap();

    // h.example is outside its window, so its 1min interval does not count.
    let requests = timers.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].delay, interval("6h"));
}

#[tokio::test]
async fn test_missing_store_is_fatal() {
    let store = CertStore::new();
    let missing = store.root().join("does-not-exist");
    let source =
        cert_expiry_monitor::source::DirectoryCertificateSource::new(&missing);

    let monitor = cert_expiry_monitor::monitor::Monitor::new(
        Box::new(source),
        daily_policy(),
        EntityOverrides::new(),
        cert_expiry_monitor::notify::Dispatcher::new(Arc::new(Outbox::default()), SENDER),
        cert_expiry_monitor::scheduler::FollowUpScheduler::new(
            Arc::new(Timers::default()),
            "cert-monitor-followup",
            follow_up_payload(),
        ),
    );

    let err = monitor.run_once(SystemTime::now()).await.unwrap_err();
    assert!(matches!(
        err,
        cert_expiry_monitor::error::MonitorError::SourceUnavailable { .. }
    ));
}
