//! gpclient process supervisor
//!
//! Launches `gpclient connect` for a [`ConnectionRequest`], follows its
//! output until it exits and tears it down on request.

use crate::config::ClientConfig;
use crate::error::VpnError;
use crate::settings::ConnectionRequest;
use crate::vpn::connection_event::ClientExit;
use crate::vpn::elevation::{resolve_real_user, RealUser};
use crate::vpn::output_parser::{ClientOutput, OutputScanner};
use crate::vpn::process::{self, ExitState, ProcessHandle, TerminationOutcome};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long to keep reading output after the client exited
const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

/// A freshly spawned client with its output pipes
#[derive(Debug)]
pub struct LaunchedClient {
    pub process: ProcessHandle,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Supervisor for the external gpclient binary
pub struct ClientSupervisor {
    config: ClientConfig,
    scanner: Arc<OutputScanner>,
}

impl ClientSupervisor {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            scanner: Arc::new(OutputScanner::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Arguments for `gpclient`, gateway given both as flag and positional
    pub fn client_arguments(request: &ConnectionRequest) -> Vec<String> {
        let mut args = vec!["connect".to_string()];
        if request.hip_enabled {
            args.push("--hip".to_string());
        }
        args.extend([
            "--browser".to_string(),
            request.browser.clone(),
            "--gateway".to_string(),
            request.gateway.clone(),
            request.gateway.clone(),
        ]);
        args
    }

    /// Child environment: the service's own plus what gpclient needs to
    /// reach the user's display and apply the routing options
    pub fn build_environment<I>(
        base: I,
        request: &ConnectionRequest,
        user: &RealUser,
    ) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = base.into_iter().collect();

        env.entry("DISPLAY".to_string())
            .or_insert_with(|| ":0".to_string());

        if !user.is_root() {
            env.insert("SUDO_UID".to_string(), user.uid.to_string());
            env.insert("SUDO_USER".to_string(), user.name.clone());

            if !env.contains_key("XAUTHORITY") {
                let xauthority = user.home.join(".Xauthority");
                if xauthority.exists() {
                    info!("Set XAUTHORITY={}", xauthority.display());
                    env.insert(
                        "XAUTHORITY".to_string(),
                        xauthority.to_string_lossy().to_string(),
                    );
                }
            }
        }

        env.insert(
            "GPCLIENT_NM_IGNORE_AUTO_ROUTES".to_string(),
            flag(request.ignore_auto_routes),
        );
        env.insert(
            "GPCLIENT_NM_NEVER_DEFAULT".to_string(),
            flag(request.never_default),
        );

        if request.dns_domains.is_empty() {
            env.remove("GPCLIENT_CUSTOM_DNS_DOMAINS");
        } else {
            env.insert(
                "GPCLIENT_CUSTOM_DNS_DOMAINS".to_string(),
                request.dns_domains.join(" "),
            );
        }

        env
    }

    /// Kill leftover authentication helpers owned by `user`
    ///
    /// A hung helper from an earlier attempt keeps the browser flow from
    /// starting again. Returns how many were killed.
    pub async fn kill_stale_helpers(&self, user: &RealUser) -> usize {
        let pids = process::find_processes(&self.config.auth_helper, user.uid).await;
        let killed = pids.into_iter().filter(|pid| process::force_kill(*pid)).count();

        if killed > 0 {
            info!(
                "Killed {} stale {} process(es) of {}",
                killed, self.config.auth_helper, user.name
            );
        }
        killed
    }

    /// Spawn `gpclient connect` for the request
    pub async fn launch(&self, request: &ConnectionRequest) -> Result<LaunchedClient, VpnError> {
        let user = resolve_real_user().await;
        info!("Will run gpclient for user {}", user.name);

        self.kill_stale_helpers(&user).await;

        let args = Self::client_arguments(request);
        let env = Self::build_environment(std::env::vars(), request, &user);
        info!("Spawning: {} {}", self.config.path.display(), args.join(" "));

        let mut child = Command::new(&self.config.path)
            .args(&args)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VpnError::ProcessSpawnError {
                reason: format!("{}: {}", self.config.path.display(), e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| VpnError::ProcessSpawnError {
            reason: "Failed to capture stdout".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| VpnError::ProcessSpawnError {
            reason: "Failed to capture stderr".to_string(),
        })?;

        let process = ProcessHandle::adopt(child)?;
        info!("Started gpclient with PID {}", process.pid());

        Ok(LaunchedClient {
            process,
            stdout,
            stderr,
        })
    }

    /// Escalating termination with the configured grace periods
    pub async fn terminate(&self, process: &mut ProcessHandle) -> TerminationOutcome {
        process
            .terminate(self.config.terminate_timeout(), self.config.kill_timeout())
            .await
    }

    /// Run `gpclient disconnect` so it releases routes and DNS it set up
    ///
    /// Failures are logged; teardown always continues.
    pub async fn release_client_resources(&self) {
        let timeout = self.config.disconnect_timeout();
        debug!("Running {} disconnect", self.config.path.display());

        let run = Command::new(&self.config.path)
            .arg("disconnect")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => {
                for line in String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .chain(String::from_utf8_lossy(&output.stderr).lines())
                    .filter(|line| !line.trim().is_empty())
                {
                    debug!("gpclient disconnect: {}", line);
                }
                if output.status.success() {
                    info!("gpclient disconnect completed");
                } else {
                    warn!("gpclient disconnect exited with {}", output.status);
                }
            }
            Ok(Err(e)) => warn!("Failed to run gpclient disconnect: {}", e),
            Err(_) => error!(
                "{}",
                VpnError::TerminationTimeout {
                    operation: "gpclient disconnect".to_string(),
                    seconds: timeout.as_secs(),
                }
            ),
        }
    }

    pub fn scanner(&self) -> Arc<OutputScanner> {
        Arc::clone(&self.scanner)
    }
}

fn flag(enabled: bool) -> String {
    let value = if enabled { "1" } else { "0" };
    value.to_string()
}

/// Follow client output until the process exits
///
/// Every line is logged. Returns `None` when cancelled, otherwise how the
/// client ended.
pub async fn watch_client_output(
    scanner: Arc<OutputScanner>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    exit: watch::Receiver<ExitState>,
    cancel: CancellationToken,
) -> Option<ClientExit> {
    // Raw segments: gpclient output is not guaranteed to be UTF-8.
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut login_failed = false;
    let mut exit_code: Option<Option<i32>> = None;
    let mut drain_deadline = Instant::now();

    while stdout_open || stderr_open {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            line = stdout.next_segment(), if stdout_open => match line {
                Ok(Some(line)) => record_line(&scanner, &line, &mut login_failed),
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!("Failed to read gpclient stdout: {}", e);
                    stdout_open = false;
                }
            },
            line = stderr.next_segment(), if stderr_open => match line {
                Ok(Some(line)) => record_line(&scanner, &line, &mut login_failed),
                Ok(None) => stderr_open = false,
                Err(e) => {
                    warn!("Failed to read gpclient stderr: {}", e);
                    stderr_open = false;
                }
            },
            code = process::wait_for_exit(exit.clone()), if exit_code.is_none() => {
                // A daemonised grandchild may hold the pipes open.
                exit_code = Some(code);
                drain_deadline = Instant::now() + OUTPUT_DRAIN;
            }
            _ = tokio::time::sleep_until(drain_deadline), if exit_code.is_some() => break,
        }
    }

    let code = match exit_code {
        Some(code) => code,
        None => tokio::select! {
            _ = cancel.cancelled() => return None,
            code = process::wait_for_exit(exit) => code,
        },
    };

    info!("gpclient process exited with status {:?}", code);
    Some(ClientExit { code, login_failed })
}

fn record_line(scanner: &OutputScanner, raw: &[u8], login_failed: &mut bool) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    info!("gpclient output: {}", line);
    match scanner.scan(line) {
        ClientOutput::TunnelUp => {
            info!("Detected VPN connection message - checking for interface")
        }
        ClientOutput::AuthFailure => {
            warn!("gpclient reported an authentication failure");
            *login_failed = true;
        }
        ClientOutput::Other => {}
    }
}
