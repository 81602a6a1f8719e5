//! Tests for process supervision and escalating termination

use nm_gpclient_core::vpn::process::{Lifecycle, ProcessHandle, TerminationOutcome};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn spawn(path: &Path) -> ProcessHandle {
    let child = Command::new("/bin/sh")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    ProcessHandle::adopt(child).unwrap()
}

#[tokio::test]
async fn test_exit_code_is_reported() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "quits", "exit 3");

    let handle = spawn(&script);
    assert!(handle.pid() > 0);
    assert_eq!(handle.wait().await, Some(3));
    assert_eq!(handle.exit_code(), Some(3));
    assert_eq!(handle.lifecycle(), Lifecycle::Exited);
}

#[tokio::test]
async fn test_terminate_already_exited() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "quits", "exit 0");

    let mut handle = spawn(&script);
    handle.wait().await;

    let outcome = handle
        .terminate(Duration::from_secs(1), Duration::from_secs(1))
        .await;
    assert_eq!(outcome, TerminationOutcome::AlreadyExited);
}

#[tokio::test]
async fn test_sigterm_is_enough_for_a_cooperative_process() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "sleeper", "exec sleep 30");

    let mut handle = spawn(&script);
    assert_eq!(handle.lifecycle(), Lifecycle::Running);

    let outcome = handle
        .terminate(Duration::from_secs(5), Duration::from_secs(2))
        .await;

    assert_eq!(outcome, TerminationOutcome::Graceful);
    assert_eq!(handle.lifecycle(), Lifecycle::Exited);
    // Killed by SIGTERM, so no exit code
    assert_eq!(handle.exit_code(), None);
}

#[tokio::test]
async fn test_sigkill_after_ignored_sigterm() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "stubborn",
        "trap '' TERM\nwhile true; do sleep 1; done",
    );

    let mut handle = spawn(&script);
    // Give the shell time to install the trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let outcome = handle
        .terminate(Duration::from_millis(300), Duration::from_secs(2))
        .await;

    assert_eq!(outcome, TerminationOutcome::Killed);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(handle.has_exited());
}

#[tokio::test]
async fn test_exit_watch_is_shared() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "quits", "sleep 0.1; exit 7");

    let handle = spawn(&script);
    let first = nm_gpclient_core::vpn::process::wait_for_exit(handle.exit_watch());
    let second = nm_gpclient_core::vpn::process::wait_for_exit(handle.exit_watch());

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first, Some(7));
    assert_eq!(second, Some(7));
}
