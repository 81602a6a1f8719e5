//! gpclient process handle and termination
//!
//! A reaper task owns the [`Child`] and publishes its exit status on a watch
//! channel. Everyone else works with the pid and that channel, so the output
//! watcher and the teardown path can both wait for the exit independently.

use crate::error::VpnError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle flag of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Terminating,
    Exited,
}

/// Exit status as seen by the reaper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// Exit code, `None` when the process was killed by a signal
    Exited(Option<i32>),
}

/// Result of [`ProcessHandle::terminate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process was already gone
    AlreadyExited,
    /// Exited after SIGTERM
    Graceful,
    /// Exited after SIGKILL
    Killed,
    /// Still around after SIGKILL and the grace period
    Unresponsive,
}

/// Handle to a running client process
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    lifecycle: Lifecycle,
    exit: watch::Receiver<ExitState>,
    reaper: JoinHandle<()>,
}

impl ProcessHandle {
    /// Take ownership of a spawned child and start reaping it
    ///
    /// The caller should already have taken any stdio pipes it needs.
    pub fn adopt(mut child: Child) -> Result<Self, VpnError> {
        let pid = child.id().ok_or_else(|| VpnError::ProcessSpawnError {
            reason: "process exited before its pid could be read".to_string(),
        })?;

        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        let reaper = tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Failed to wait for process {}: {}", pid, e);
                    None
                }
            };
            debug!("Process {} reaped with status {:?}", pid, code);
            let _ = exit_tx.send(ExitState::Exited(code));
        });

        Ok(Self {
            pid,
            lifecycle: Lifecycle::Running,
            exit: exit_rx,
            reaper,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.has_exited() {
            Lifecycle::Exited
        } else {
            self.lifecycle
        }
    }

    /// Exit code once the process has exited with one
    pub fn exit_code(&self) -> Option<i32> {
        match *self.exit.borrow() {
            ExitState::Exited(code) => code,
            ExitState::Running => None,
        }
    }

    pub fn has_exited(&self) -> bool {
        matches!(*self.exit.borrow(), ExitState::Exited(_))
    }

    /// Independent receiver for the exit status
    pub fn exit_watch(&self) -> watch::Receiver<ExitState> {
        self.exit.clone()
    }

    /// Wait for the process to exit and return its code
    pub async fn wait(&self) -> Option<i32> {
        wait_for_exit(self.exit.clone()).await
    }

    /// SIGTERM, then SIGKILL, each followed by a bounded wait
    pub async fn terminate(
        &mut self,
        term_grace: Duration,
        kill_grace: Duration,
    ) -> TerminationOutcome {
        if self.has_exited() {
            self.lifecycle = Lifecycle::Exited;
            return TerminationOutcome::AlreadyExited;
        }

        self.lifecycle = Lifecycle::Terminating;
        let pid = Pid::from_raw(self.pid as i32);

        info!("Sending SIGTERM to process {}", pid);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }

        if self.exited_within(term_grace).await {
            info!("Process {} terminated gracefully", pid);
            self.lifecycle = Lifecycle::Exited;
            return TerminationOutcome::Graceful;
        }

        warn!(
            "Process {} did not exit within {:?}, sending SIGKILL",
            pid, term_grace
        );
        if let Err(e) = kill(pid, Signal::SIGKILL) {
            debug!("SIGKILL to {} failed: {}", pid, e);
        }

        if self.exited_within(kill_grace).await {
            self.lifecycle = Lifecycle::Exited;
            return TerminationOutcome::Killed;
        }

        error!(
            "{}",
            VpnError::TerminationTimeout {
                operation: format!("Killing process {}", pid),
                seconds: kill_grace.as_secs(),
            }
        );
        TerminationOutcome::Unresponsive
    }

    async fn exited_within(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, wait_for_exit(self.exit.clone()))
            .await
            .is_ok()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Dropping the reaper's Child kills the process (kill_on_drop).
        if !self.has_exited() {
            self.reaper.abort();
        }
    }
}

/// Wait until the reaper reports an exit
pub async fn wait_for_exit(mut exit: watch::Receiver<ExitState>) -> Option<i32> {
    let code = match exit
        .wait_for(|state| matches!(state, ExitState::Exited(_)))
        .await
    {
        Ok(state) => match *state {
            ExitState::Exited(code) => code,
            ExitState::Running => None,
        },
        // Reaper gone without reporting
        Err(_) => None,
    };
    code
}

const PGREP_TIMEOUT: Duration = Duration::from_secs(2);

/// Find processes by exact name and owner
///
/// Returns an empty list when nothing matches, `pgrep` is unavailable or it
/// does not answer within two seconds.
pub async fn find_processes(name: &str, uid: u32) -> Vec<u32> {
    query_pids(Path::new("pgrep"), name, uid, PGREP_TIMEOUT).await
}

async fn query_pids(pgrep: &Path, name: &str, uid: u32, limit: Duration) -> Vec<u32> {
    let output = tokio::time::timeout(
        limit,
        tokio::process::Command::new(pgrep)
            .args(["-u", &uid.to_string(), "-x", name])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(out)) if out.status.success() => parse_pids(&String::from_utf8_lossy(&out.stdout)),
        Ok(Ok(_)) => vec![],
        Ok(Err(e)) => {
            warn!("pgrep failed: {}", e);
            vec![]
        }
        Err(_) => {
            warn!("pgrep did not answer within {:?}", limit);
            vec![]
        }
    }
}

fn parse_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

/// Send SIGKILL to a process, ignoring ones that are already gone
pub fn force_kill(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            debug!("SIGKILL to {} failed: {}", pid, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_processes_with_unknown_name() {
        let pids = find_processes("no-such-process-name", nix::unistd::getuid().as_raw()).await;
        assert!(pids.is_empty());
    }

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("1234\n 5678 \n\nnot-a-pid\n"), vec![1234, 5678]);
        assert!(parse_pids("").is_empty());
    }

    #[tokio::test]
    async fn test_hung_pgrep_is_abandoned() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pgrep = dir.path().join("pgrep");
        std::fs::write(&pgrep, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&pgrep, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        let pids = query_pids(&pgrep, "gpauth", 1000, Duration::from_millis(200)).await;
        assert!(pids.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pgrep_output_is_parsed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pgrep = dir.path().join("pgrep");
        std::fs::write(&pgrep, "#!/bin/sh\necho 4242\necho 4243\n").unwrap();
        std::fs::set_permissions(&pgrep, std::fs::Permissions::from_mode(0o755)).unwrap();

        let pids = query_pids(&pgrep, "gpauth", 1000, PGREP_TIMEOUT).await;
        assert_eq!(pids, vec![4242, 4243]);
    }

    #[test]
    fn test_force_kill_nonexistent_pid() {
        // PID 99999999 is above pid_max
        assert!(!force_kill(99_999_999));
    }
}
