//! Runner contract tests
//!
//! Every check runs against each registered release through `dyn Runner`, so
//! the host-visible behaviour is verified independently of the adapter.

use std::sync::Arc;
use std::time::Duration;

use aiscript_runner::engine::Limits;
use aiscript_runner::runner::{ErrorLabel, ExecOutcome, OutputSink, Runner, RunnerError};
use aiscript_runner::RunnerRegistry;
use parking_lot::Mutex;

type Seen = Arc<Mutex<Vec<String>>>;

fn recorder() -> (OutputSink, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let sink: OutputSink = Arc::new(move |text: &str| recorder.lock().push(text.to_string()));
    (sink, seen)
}

fn runners() -> Vec<(Arc<dyn Runner>, Seen)> {
    let registry = RunnerRegistry::builtin();
    registry
        .versions()
        .into_iter()
        .map(|version| {
            let (sink, seen) = recorder();
            let runner = registry
                .create(version, sink, &Limits::default())
                .expect("builtin release");
            (Arc::from(runner), seen)
        })
        .collect()
}

/// Per-release spelling of `true`.
fn yes(runner: &dyn Runner) -> &'static str {
    if runner.version() == "0.14.1" { "yes" } else { "true" }
}

#[tokio::test]
async fn test_one_plus_one_prints_two() {
    for (runner, seen) in runners() {
        let parsed = runner.parse("1 + 1").expect("valid program");
        assert!(parsed.metadata.is_empty());
        assert_eq!(parsed.tree.version(), runner.version());

        let outcome = runner.exec(&parsed.tree).await.unwrap();
        assert_eq!(outcome, ExecOutcome::Completed);
        assert_eq!(*seen.lock(), vec!["2"], "{}", runner.version());
    }
}

#[tokio::test]
async fn test_truncated_program_is_syntax_error() {
    for (runner, seen) in runners() {
        let failure = runner.parse("1 + ").unwrap_err();
        let error = failure.error().expect("native error");
        assert_eq!(runner.classify_error(error), Some(ErrorLabel::SyntaxError));
        assert_eq!(runner.error_name(error), Some("SyntaxError"));
        assert!(seen.lock().is_empty());
    }
}

#[tokio::test]
async fn test_outputs_then_final_value_in_order() {
    for (runner, seen) in runners() {
        let parsed = runner.parse("<: \"first\"\n<: 0.5\n[1, 2].len").unwrap();
        runner.exec(&parsed.tree).await.unwrap();
        assert_eq!(*seen.lock(), vec!["\"first\"", "0.5", "2"], "{}", runner.version());
    }
}

#[tokio::test]
async fn test_no_final_value_after_output_statement() {
    for (runner, seen) in runners() {
        let parsed = runner.parse("<: 1").unwrap();
        runner.exec(&parsed.tree).await.unwrap();
        assert_eq!(*seen.lock(), vec!["1"]);
    }
}

#[tokio::test]
async fn test_type_errors_share_a_label() {
    for (runner, _) in runners() {
        let code = format!("1 + {}", yes(runner.as_ref()));
        let parsed = runner.parse(&code).unwrap();
        let err = runner.exec(&parsed.tree).await.unwrap_err();
        assert_eq!(
            runner.classify_error(&err),
            Some(ErrorLabel::TypeError),
            "{}",
            runner.version()
        );
    }
}

#[tokio::test]
async fn test_index_and_runtime_errors_share_labels() {
    for (runner, _) in runners() {
        for (code, label) in [
            ("[1, 2][5]", ErrorLabel::IndexOutOfRangeError),
            ("undefined_name", ErrorLabel::RuntimeError),
            ("Core:abort(\"stop\")", ErrorLabel::GenericEngineError),
        ] {
            let parsed = runner.parse(code).unwrap();
            let err = runner.exec(&parsed.tree).await.unwrap_err();
            assert_eq!(runner.classify_error(&err), Some(label), "{code}");
        }
    }
}

#[tokio::test]
async fn test_errors_of_other_releases_are_unknown() {
    let all = runners();
    let (old, _) = &all[0];
    let (new, _) = &all[1];

    let old_failure = old.parse("1 +").unwrap_err();
    let old_error = old_failure.error().unwrap();
    assert_eq!(old.classify_error(old_error), Some(ErrorLabel::SyntaxError));
    assert_eq!(new.classify_error(old_error), None);
    assert_eq!(new.error_name(old_error), None);

    let plain = anyhow::anyhow!("not from an engine");
    assert_eq!(old.classify_error(&plain), None);
}

#[tokio::test]
async fn test_foreign_tree_is_refused() {
    let all = runners();
    let (old, _) = &all[0];
    let (new, seen) = &all[1];

    let parsed = old.parse("<: 1").unwrap();
    let err = new.exec(&parsed.tree).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunnerError>(),
        Some(RunnerError::ForeignTree { .. })
    ));
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_dispose_twice_is_silent() {
    for (runner, seen) in runners() {
        let parsed = runner.parse("<: 1").unwrap();
        runner.exec(&parsed.tree).await.unwrap();
        runner.dispose();
        runner.dispose();
        assert_eq!(*seen.lock(), vec!["1"]);

        let err = runner.exec(&parsed.tree).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::Disposed { .. })
        ));
        assert_eq!(runner.classify_error(&err), None);
    }
}

async fn wait_for_output(seen: &Seen, count: usize) {
    for _ in 0..200 {
        if seen.lock().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("program produced no output");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_aborts_suspended_exec() {
    for (runner, seen) in runners() {
        let parsed = runner
            .parse("<: 1\nCore:sleep(60000)\n<: 2\n3")
            .unwrap();
        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.exec(&parsed.tree).await })
        };

        wait_for_output(&seen, 1).await;
        runner.dispose();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("exec resolves after dispose")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Aborted);
        assert_eq!(*seen.lock(), vec!["1"], "{}", runner.version());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_aborts_busy_loop() {
    for (runner, seen) in runners() {
        let parsed = runner.parse("<: 0\nloop { }").unwrap();
        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.exec(&parsed.tree).await })
        };

        wait_for_output(&seen, 1).await;
        runner.dispose();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("exec resolves after dispose")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Aborted);
        assert_eq!(*seen.lock(), vec!["0"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_aborts_empty_counted_loop() {
    for (runner, seen) in runners() {
        let binding = if runner.version() == "0.14.1" { "#i" } else { "let i" };
        let code = format!("<: 0\nfor {binding}, 1000000000000000 {{ }}");
        let parsed = runner.parse(&code).unwrap();
        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.exec(&parsed.tree).await })
        };

        wait_for_output(&seen, 1).await;
        runner.dispose();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("exec resolves after dispose")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Aborted, "{}", runner.version());
        assert_eq!(*seen.lock(), vec!["0"]);
    }
}

#[test]
fn test_long_operator_chain_is_a_syntax_error() {
    let code = format!("1{}", "+1".repeat(20_000));
    for (runner, _) in runners() {
        let failure = runner.parse(&code).unwrap_err();
        let error = failure.error().expect("native error");
        assert_eq!(runner.classify_error(error), Some(ErrorLabel::SyntaxError));
    }
}

#[tokio::test]
async fn test_step_limit_is_a_runtime_error() {
    let registry = RunnerRegistry::builtin();
    let limits = Limits {
        max_step: Some(500),
        ..Limits::default()
    };
    for version in registry.versions() {
        let (sink, _) = recorder();
        let runner = registry.create(version, sink, &limits).unwrap();
        let parsed = runner.parse("loop { }").unwrap();
        let err = runner.exec(&parsed.tree).await.unwrap_err();
        assert_eq!(runner.classify_error(&err), Some(ErrorLabel::RuntimeError));
    }
}

#[test]
fn test_metadata_is_returned_in_source_order() {
    for (runner, _) in runners() {
        let code = "### { title: \"Demo\" }\n### order [3, 1]\n<: 1";
        let parsed = runner.parse(code).unwrap();
        let entries: Vec<_> = parsed.metadata.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, &None);
        assert_eq!(entries[0].1, &serde_json::json!({ "title": "Demo" }));
        assert_eq!(entries[1].0.as_deref(), Some("order"));
        assert_eq!(entries[1].1, &serde_json::json!([3, 1]));
    }
}
