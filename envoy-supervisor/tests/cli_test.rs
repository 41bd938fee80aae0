//! The `envoy-supervise` binary, driven as a subprocess

#![cfg(unix)]

mod common;

use common::*;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const READY_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_TIMEOUT: Duration = Duration::from_secs(30);

fn envoy_supervise() -> &'static str {
    env!("CARGO_BIN_EXE_envoy-supervise")
}

/// Scenario: Ctrl-C at the supervisor runs the graceful shutdown and archives
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_shuts_down_and_archives() {
    init_tracing();
    let parent = tempfile::tempdir().unwrap();
    let run_dir = parent.path().join("run");

    let mut supervisor = tokio::process::Command::new(envoy_supervise())
        .arg(fake_envoy())
        .arg(&run_dir)
        .args(["--", "--config-yaml", STATIC_CONFIG_YAML])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn envoy-supervise");
    let pid = supervisor.id().expect("supervisor should have a pid");

    let mut lines = BufReader::new(supervisor.stdout.take().unwrap()).lines();
    let discovered = tokio::time::timeout(READY_TIMEOUT, async {
        while let Some(line) = lines.next_line().await.unwrap() {
            if line.starts_with("discovered admin address: ") {
                return true;
            }
        }
        false
    })
    .await
    .expect("supervisor should report the admin address");
    assert!(discovered, "stdout closed before the admin address was reported");

    // Keep the pipe drained so shutdown output never blocks the supervisor
    let drain = tokio::spawn(async move {
        let mut rest = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            rest.push(line);
        }
        rest
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) }, 0);

    let status = tokio::time::timeout(EXIT_TIMEOUT, supervisor.wait())
        .await
        .expect("supervisor should exit after SIGINT")
        .expect("Failed to reap supervisor");
    let rest = drain.await.unwrap();

    assert!(status.success(), "exit status {:?}, output {:?}", status, rest);
    assert!(
        rest.iter().any(|l| l.starts_with("invoking shutdown hooks with deadline")),
        "{:?}",
        rest
    );
    assert!(parent.path().join("run.tar.gz").is_file(), "archive should exist");
    assert!(!run_dir.exists(), "run directory should be removed");
}
