#![cfg(unix)]

use std::time::{Duration, Instant};

use opsbench_core::{ArtifactExecutor, ExitStatus, ProcessRunner, RuntimeHandle};
use tempfile::tempdir;

#[tokio::test]
async fn timeout_kills_the_child_and_returns_promptly() {
    let dir = tempdir().unwrap();
    let pidfile = dir.path().join("child.pid");
    let script = dir.path().join("sleepy.sh");
    std::fs::write(
        &script,
        format!("echo $$ > {}\nexec sleep 30\n", pidfile.display()),
    )
    .unwrap();

    let start = Instant::now();
    let outcome = ProcessRunner::new()
        .run(
            &RuntimeHandle::unprobed("sh"),
            &script,
            Duration::from_millis(500),
        )
        .await;
    let elapsed = start.elapsed();

    assert_eq!(outcome.status, ExitStatus::Timeout);
    assert!(outcome.exit_code.is_none());
    assert!(outcome.stderr.contains("timed out"));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    let pid = std::fs::read_to_string(&pidfile).unwrap();
    let pid = pid.trim();
    assert!(!pid.is_empty());
    if cfg!(target_os = "linux") {
        assert!(
            !std::path::Path::new(&format!("/proc/{pid}")).exists(),
            "child {pid} still present after timeout"
        );
    }
}

#[tokio::test]
async fn timeout_also_kills_background_processes_holding_the_pipes() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("spawner.sh");
    std::fs::write(
        &script,
        "echo before-timeout\necho partial-trace >&2\nsleep 30 &\nexec sleep 30\n",
    )
    .unwrap();

    let start = Instant::now();
    let outcome = ProcessRunner::new()
        .run(
            &RuntimeHandle::unprobed("sh"),
            &script,
            Duration::from_millis(500),
        )
        .await;
    let elapsed = start.elapsed();

    assert_eq!(outcome.status, ExitStatus::Timeout);
    // The background sleep shares stdout/stderr; output only survives if it
    // was killed along with the child.
    assert_eq!(outcome.stdout.trim(), "before-timeout");
    assert!(outcome.stderr.contains("partial-trace"));
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[tokio::test]
async fn stdout_and_stderr_are_captured_separately() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("both.sh");
    std::fs::write(&script, "echo out-line\necho err-line >&2\n").unwrap();

    let outcome = ProcessRunner::new()
        .run(
            &RuntimeHandle::unprobed("sh"),
            &script,
            Duration::from_secs(10),
        )
        .await;

    assert_eq!(outcome.status, ExitStatus::Ok);
    assert_eq!(outcome.stdout.trim(), "out-line");
    assert_eq!(outcome.stderr.trim(), "err-line");
    assert_eq!(outcome.runtime, "sh");
}

#[tokio::test]
async fn missing_runtime_is_a_launch_failure() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("a.py");
    std::fs::write(&script, "print(1)\n").unwrap();

    let outcome = ProcessRunner::new()
        .run(
            &RuntimeHandle::unprobed("/no/such/python3"),
            &script,
            Duration::from_secs(5),
        )
        .await;

    assert_eq!(outcome.status, ExitStatus::LaunchFailure);
    assert!(outcome.stdout.is_empty());
}
