//! Connection state machine
//!
//! A single task owns the [`ServiceState`] and the active connect attempt.
//! Connect, Disconnect and Shutdown reach it as messages with one-shot
//! replies, so they are handled strictly one after another. Child tasks of an
//! attempt (output watcher, discovery poller) report back over an unbounded
//! channel tagged with the attempt id, and never wait on the state machine.

use crate::config::ServiceConfig;
use crate::error::{GpError, VpnError};
use crate::settings::{ConnectionRequest, ConnectionSettings};
use crate::vpn::connection_event::{ClientExit, PluginEvent};
use crate::vpn::discovery::{Ip4Config, TunnelPoller, TunnelStatus};
use crate::vpn::probe::TunnelProbe;
use crate::vpn::process::ProcessHandle;
use crate::vpn::state::{FailureReason, ServiceState};
use crate::vpn::supervisor::{watch_client_output, ClientSupervisor};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handle to the connection state machine
///
/// Cheap to clone; the state machine stops once every handle is dropped or
/// [`Session::shutdown`] is called.
#[derive(Debug, Clone)]
pub struct Session {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<ServiceState>,
}

#[derive(Debug)]
enum Request {
    Connect {
        settings: ConnectionSettings,
        reply: oneshot::Sender<Result<(), GpError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results delivered by an attempt's child tasks
#[derive(Debug)]
enum AttemptEvent {
    TunnelReady { attempt: u64, status: TunnelStatus },
    ClientExited { attempt: u64, exit: ClientExit },
}

impl Session {
    /// Spawn the state machine in state INIT
    ///
    /// Lifecycle events are sent to `events` in the order they happen.
    pub fn start(
        config: &ServiceConfig,
        probe: Arc<dyn TunnelProbe>,
        events: mpsc::UnboundedSender<PluginEvent>,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ServiceState::Init);

        let machine = StateMachine {
            state_tx,
            events,
            supervisor: ClientSupervisor::new(config.client.clone()),
            poller: Arc::new(TunnelPoller::new(probe, &config.discovery)),
            default_browser: config.client.default_browser.clone(),
            attempt: None,
            last_attempt_id: 0,
            attempt_tx,
        };
        tokio::spawn(machine.run(requests_rx, attempt_rx));

        Self {
            requests: requests_tx,
            state: state_rx,
        }
    }

    /// Start a new connect attempt, replacing any active one
    ///
    /// Returns once the client has been spawned. Settings and spawn errors
    /// are returned here and also reported as a `Failure` event.
    pub async fn connect(&self, settings: ConnectionSettings) -> Result<(), GpError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Connect { settings, reply })?;
        response.await.map_err(|_| VpnError::SessionClosed)?
    }

    /// Tear down the active attempt, if any. Always succeeds while the
    /// state machine is running.
    pub async fn disconnect(&self) -> Result<(), GpError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Disconnect { reply })?;
        response.await.map_err(|_| VpnError::SessionClosed)?;
        Ok(())
    }

    /// Tear down and move to SHUTDOWN; the state machine stops afterwards
    pub async fn shutdown(&self) -> Result<(), GpError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Shutdown { reply })?;
        response.await.map_err(|_| VpnError::SessionClosed)?;
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state.clone()
    }

    fn send(&self, request: Request) -> Result<(), VpnError> {
        self.requests
            .send(request)
            .map_err(|_| VpnError::SessionClosed)
    }
}

/// One connect attempt and everything it owns
struct Attempt {
    id: u64,
    process: ProcessHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct StateMachine {
    state_tx: watch::Sender<ServiceState>,
    events: mpsc::UnboundedSender<PluginEvent>,
    supervisor: ClientSupervisor,
    poller: Arc<TunnelPoller>,
    default_browser: String,
    attempt: Option<Attempt>,
    last_attempt_id: u64,
    attempt_tx: mpsc::UnboundedSender<AttemptEvent>,
}

impl StateMachine {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut attempt_events: mpsc::UnboundedReceiver<AttemptEvent>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Connect { settings, reply }) => {
                        let result = self.connect(settings).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Disconnect { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                    }
                    Some(Request::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        debug!("All session handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = attempt_events.recv() => self.handle_attempt_event(event).await,
            }
        }
        debug!("Connection state machine stopped");
    }

    fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: ServiceState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("VPN state: {} -> {}", previous, state);
            self.emit(PluginEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: PluginEvent) {
        if self.events.send(event).is_err() {
            debug!("Plugin event receiver dropped");
        }
    }

    fn fail(&self, reason: FailureReason) {
        warn!("VPN connection failed: {}", reason);
        self.emit(PluginEvent::Failure(reason));
    }

    async fn connect(&mut self, settings: ConnectionSettings) -> Result<(), GpError> {
        let request = match ConnectionRequest::decode(&settings, &self.default_browser) {
            Ok(request) => Arc::new(request),
            Err(e) => {
                error!("Rejecting connect: {}", e);
                self.fail(FailureReason::ConnectFailed);
                return Err(e.into());
            }
        };

        if self.attempt.is_some() {
            info!("Connect while {}: tearing down the previous attempt", self.state());
            self.teardown().await;
        }

        info!("Connecting to gateway {}", request.gateway);
        self.set_state(ServiceState::Starting);

        let launched = match self.supervisor.launch(&request).await {
            Ok(launched) => launched,
            Err(e) => {
                error!("{}", e);
                self.fail(FailureReason::ConnectFailed);
                self.set_state(ServiceState::Stopped);
                return Err(e.into());
            }
        };

        self.last_attempt_id += 1;
        let id = self.last_attempt_id;
        let cancel = CancellationToken::new();

        let watcher = {
            let scanner = self.supervisor.scanner();
            let exit = launched.process.exit_watch();
            let cancel = cancel.clone();
            let results = self.attempt_tx.clone();
            let (stdout, stderr) = (launched.stdout, launched.stderr);
            tokio::spawn(async move {
                if let Some(exit) = watch_client_output(scanner, stdout, stderr, exit, cancel).await {
                    let _ = results.send(AttemptEvent::ClientExited { attempt: id, exit });
                }
            })
        };

        let discovery = {
            let poller = Arc::clone(&self.poller);
            let request = Arc::clone(&request);
            let cancel = cancel.clone();
            let results = self.attempt_tx.clone();
            tokio::spawn(async move {
                if let Some(status) = poller.run(&request, cancel).await {
                    let _ = results.send(AttemptEvent::TunnelReady { attempt: id, status });
                }
            })
        };

        self.attempt = Some(Attempt {
            id,
            process: launched.process,
            cancel,
            tasks: vec![watcher, discovery],
        });

        Ok(())
    }

    async fn handle_attempt_event(&mut self, event: AttemptEvent) {
        let attempt = match &event {
            AttemptEvent::TunnelReady { attempt, .. } | AttemptEvent::ClientExited { attempt, .. } => {
                *attempt
            }
        };
        if self.attempt.as_ref().map(|a| a.id) != Some(attempt) {
            debug!("Dropping event from superseded attempt {}: {:?}", attempt, event);
            return;
        }

        match event {
            AttemptEvent::TunnelReady { status, .. } => {
                if self.state() != ServiceState::Starting {
                    debug!("Tunnel reported while {}, ignoring", self.state());
                    return;
                }

                match Ip4Config::from_status(&status) {
                    Some(config) => {
                        info!(
                            "Sending Ip4Config for {}: address=0x{:08x}, prefix={}, gateway=0x{:08x}",
                            config.tundev, config.address, config.prefix, config.gateway
                        );
                        self.emit(PluginEvent::Ip4Config(config));
                        self.set_state(ServiceState::Started);
                    }
                    None => {
                        self.fail(FailureReason::BadIpConfig);
                        self.teardown().await;
                    }
                }
            }
            AttemptEvent::ClientExited { exit, .. } => {
                let tunnel_up = self.state() == ServiceState::Started;
                match exit.failure_reason(tunnel_up) {
                    Some(reason) => {
                        error!("gpclient exited with {:?} while {}", exit.code, self.state());
                        self.fail(reason);
                    }
                    None => info!("gpclient ended the session"),
                }
                self.teardown().await;
            }
        }
    }

    /// STOPPING, stop the attempt's tasks, stop the client, release its
    /// resources, STOPPED
    async fn teardown(&mut self) {
        self.set_state(ServiceState::Stopping);

        if let Some(mut attempt) = self.attempt.take() {
            debug!("Tearing down attempt {}", attempt.id);
            attempt.cancel.cancel();
            for task in attempt.tasks.drain(..) {
                if let Err(e) = task.await {
                    warn!("Attempt task ended abnormally: {}", e);
                }
            }

            let outcome = self.supervisor.terminate(&mut attempt.process).await;
            debug!("Client termination: {:?}", outcome);
        }

        self.supervisor.release_client_resources().await;
        self.set_state(ServiceState::Stopped);
    }

    async fn shutdown(&mut self) {
        if self.attempt.is_some() {
            self.teardown().await;
        }
        self.set_state(ServiceState::Shutdown);
    }
}
