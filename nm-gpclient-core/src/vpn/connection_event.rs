//! Events produced by the connection lifecycle
//!
//! [`PluginEvent`]s leave the session and become D-Bus signals.
//! [`ClientExit`] is what the output watcher learns about a finished client.

use crate::vpn::discovery::Ip4Config;
use crate::vpn::state::{FailureReason, ServiceState};

/// Events emitted by the session towards NetworkManager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    /// The service state changed
    StateChanged(ServiceState),

    /// The tunnel is configured and ready to be handed to NetworkManager
    Ip4Config(Ip4Config),

    /// The current attempt failed
    Failure(FailureReason),
}

/// How the gpclient process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientExit {
    /// Exit status, `None` when killed by a signal
    pub code: Option<i32>,

    /// An authentication failure was reported on the client's output
    pub login_failed: bool,
}

impl ClientExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Failure to report for this exit
    ///
    /// A clean exit once the tunnel was up is a normal end of session.
    pub fn failure_reason(&self, tunnel_up: bool) -> Option<FailureReason> {
        if tunnel_up && self.success() {
            None
        } else if self.login_failed && !tunnel_up {
            Some(FailureReason::LoginFailed)
        } else {
            Some(FailureReason::ConnectFailed)
        }
    }
}
