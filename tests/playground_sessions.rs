//! Playground session tests
//!
//! Covers the host selector: opening sessions per release, reporting runs,
//! aborting a pending run, switching releases and closing sessions.

use std::sync::Arc;
use std::time::Duration;

use aiscript_runner::host::{Playground, RunOutcome, RunnerRegistry, Stage};
use aiscript_runner::runner::{ErrorLabel, OutputSink};
use aiscript_runner::{HostError, PlaygroundConfig};
use parking_lot::Mutex;

type Seen = Arc<Mutex<Vec<String>>>;

fn recorder() -> (OutputSink, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let sink: OutputSink = Arc::new(move |text: &str| recorder.lock().push(text.to_string()));
    (sink, seen)
}

fn playground() -> Playground {
    Playground::new(RunnerRegistry::builtin(), &PlaygroundConfig::default()).unwrap()
}

#[tokio::test]
async fn test_default_session_uses_latest_release() {
    let playground = playground();
    assert_eq!(playground.default_version(), "0.16.0");

    let (sink, seen) = recorder();
    let id = playground.open(None, sink).unwrap();
    let report = playground.run(id, "let x = 20\nx + 1").await.unwrap();

    assert_eq!(report.version, "0.16.0");
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(*seen.lock(), vec!["21"]);
}

#[tokio::test]
async fn test_configured_default_version() {
    let config = PlaygroundConfig {
        default_version: Some("0.14.1".to_string()),
        ..PlaygroundConfig::default()
    };
    let playground = Playground::new(RunnerRegistry::builtin(), &config).unwrap();
    let (sink, seen) = recorder();
    let id = playground.open(None, sink).unwrap();
    playground.run(id, "#x = 20\nx + 1").await.unwrap();
    assert_eq!(*seen.lock(), vec!["21"]);

    let config = PlaygroundConfig {
        default_version: Some("9.9.9".to_string()),
        ..PlaygroundConfig::default()
    };
    let err = Playground::new(RunnerRegistry::builtin(), &config).err().unwrap();
    assert!(matches!(err, HostError::UnknownVersion(v) if v == "9.9.9"));

    let err = Playground::new(RunnerRegistry::new(), &PlaygroundConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, HostError::NoVersions));
}

#[tokio::test]
async fn test_failures_are_reported_with_labels() {
    let playground = playground();
    let (sink, _) = recorder();
    let id = playground.open(Some("0.16.0"), sink).unwrap();

    let report = playground.run(id, "1 + ").await.unwrap();
    match report.outcome {
        RunOutcome::Failed {
            stage,
            label,
            message,
        } => {
            assert_eq!(stage, Stage::Parse);
            assert_eq!(label, Some(ErrorLabel::SyntaxError));
            assert!(message.is_some());
        }
        other => panic!("expected parse failure, got {other:?}"),
    }

    let report = playground.run(id, "### { n: 1 }\n[][0]").await.unwrap();
    assert_eq!(report.metadata.len(), 1);
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::Exec,
            label: Some(ErrorLabel::IndexOutOfRangeError),
            ..
        }
    ));
}

#[tokio::test]
async fn test_report_serializes_metadata_entries() {
    let playground = playground();
    let (sink, _) = recorder();
    let id = playground.open(None, sink).unwrap();
    let report = playground
        .run(id, "### { title: \"t\" }\n### level 2\n<: 1")
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "version": "0.16.0",
            "metadata": [
                { "name": null, "value": { "title": "t" } },
                { "name": "level", "value": 2 }
            ],
            "outcome": { "status": "completed" }
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_stops_pending_run_and_keeps_session() {
    let playground = Arc::new(playground());
    let (sink, seen) = recorder();
    let id = playground.open(None, sink).unwrap();

    let pending = {
        let playground = Arc::clone(&playground);
        tokio::spawn(async move {
            playground
                .run(id, "<: \"start\"\nCore:sleep(60000)\n<: \"late\"")
                .await
        })
    };
    for _ in 0..200 {
        if !seen.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    playground.abort(id).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("run resolves after abort")
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(*seen.lock(), vec!["\"start\""]);

    // Same session, fresh runner
    let report = playground.run(id, "<: \"again\"").await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(*seen.lock(), vec!["\"start\"", "\"again\""]);
}

#[tokio::test]
async fn test_switch_version_changes_dialect() {
    let playground = playground();
    let (sink, seen) = recorder();
    let id = playground.open(Some("0.16.0"), sink).unwrap();

    playground.switch_version(id, "0.14.1").unwrap();
    let report = playground.run(id, "$n <- 1\nn <- n + 1\n<: n").await.unwrap();
    assert_eq!(report.version, "0.14.1");
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(*seen.lock(), vec!["2"]);

    let err = playground.switch_version(id, "2.0.0").unwrap_err();
    assert!(matches!(err, HostError::UnknownVersion(_)));
    assert_eq!(playground.sessions()[0].version, "0.14.1");
}

#[tokio::test]
async fn test_close_and_list_sessions() {
    let playground = playground();
    let (sink, _) = recorder();
    let first = playground.open(Some("0.14.1"), sink.clone()).unwrap();
    let second = playground.open(None, sink).unwrap();

    let listed: Vec<_> = playground.sessions().iter().map(|info| info.id).collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first) && listed.contains(&second));

    playground.close(first).unwrap();
    assert!(matches!(
        playground.close(first),
        Err(HostError::UnknownSession(id)) if id == first
    ));
    assert!(matches!(
        playground.run(first, "1").await,
        Err(HostError::UnknownSession(_))
    ));
    assert_eq!(playground.sessions().len(), 1);
}
