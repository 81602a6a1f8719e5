//! VPN service state and failure codes
//!
//! Numeric values are part of the NetworkManager VPN plugin contract.

use std::fmt;

/// NetworkManager VPN service states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceState {
    #[default]
    Unknown,
    Init,
    Shutdown,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl ServiceState {
    /// Wire value used by the `State` property and `StateChanged` signal
    pub fn code(self) -> u32 {
        match self {
            ServiceState::Unknown => 0,
            ServiceState::Init => 1,
            ServiceState::Shutdown => 2,
            ServiceState::Starting => 3,
            ServiceState::Started => 4,
            ServiceState::Stopping => 5,
            ServiceState::Stopped => 6,
        }
    }

    /// True while a connect attempt is in flight or up
    pub fn is_active(self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Started)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Unknown => "unknown",
            ServiceState::Init => "init",
            ServiceState::Shutdown => "shutdown",
            ServiceState::Starting => "starting",
            ServiceState::Started => "started",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Reason carried by the `Failure` signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    LoginFailed,
    ConnectFailed,
    BadIpConfig,
}

impl FailureReason {
    pub fn code(self) -> u32 {
        match self {
            FailureReason::LoginFailed => 0,
            FailureReason::ConnectFailed => 1,
            FailureReason::BadIpConfig => 2,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::LoginFailed => write!(f, "login failed"),
            FailureReason::ConnectFailed => write!(f, "connect failed"),
            FailureReason::BadIpConfig => write!(f, "bad IP configuration"),
        }
    }
}
