//! VPN connection module
//!
//! gpclient supervision, tunnel discovery and the connection state machine.

pub mod connection_event;
pub mod discovery;
pub mod elevation;
pub mod output_parser;
pub mod probe;
pub mod process;
pub mod session;
pub mod state;
pub mod supervisor;

// Public re-exports
pub use connection_event::{ClientExit, PluginEvent};
pub use discovery::{Ip4Config, TunnelPoller, TunnelStatus};
pub use output_parser::{ClientOutput, OutputScanner};
pub use probe::{InterfaceAddress, IpCommandProbe, TunnelProbe};
pub use session::Session;
pub use state::{FailureReason, ServiceState};
pub use supervisor::ClientSupervisor;
