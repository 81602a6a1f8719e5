//! Configuration module
//!
//! Service-level settings read from a TOML file. Everything here has a
//! default, so the service runs without any configuration file at all.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod toml_config;

pub use toml_config::{load, DEFAULT_CONFIG_PATH};

/// Default browser wrapper handed to `gpclient --browser`
pub const DEFAULT_BROWSER: &str = "/usr/libexec/gpclient/edge-wrapper";

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How the external client is launched and torn down
    pub client: ClientConfig,

    /// Tunnel interface discovery
    pub discovery: DiscoveryConfig,

    /// D-Bus registration
    pub dbus: DbusConfig,
}

/// External `gpclient` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Path to the gpclient binary
    pub path: PathBuf,

    /// Browser used when the connection settings do not name one
    pub default_browser: String,

    /// Process name of the authentication helper killed before each launch
    pub auth_helper: String,

    /// Grace period after SIGTERM
    pub terminate_timeout_secs: u64,

    /// Grace period after SIGKILL
    pub kill_timeout_secs: u64,

    /// Upper bound for `gpclient disconnect`
    pub disconnect_timeout_secs: u64,
}

impl ClientConfig {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/usr/bin/gpclient"),
            default_browser: DEFAULT_BROWSER.to_string(),
            auth_helper: "gpauth".to_string(),
            terminate_timeout_secs: 5,
            kill_timeout_secs: 2,
            disconnect_timeout_secs: 10,
        }
    }
}

/// Tunnel discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Candidate interfaces in priority order; a trailing `*` matches a prefix
    pub interfaces: Vec<String>,

    /// Delay between discovery passes
    pub poll_interval_ms: u64,

    /// Directory listing the kernel's network interfaces
    pub sysfs_net: PathBuf,

    /// iproute2 binary used to read addresses and routes
    pub ip_command: PathBuf,
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interfaces: vec!["gpd0".to_string(), "tun0".to_string(), "tun1".to_string()],
            poll_interval_ms: 500,
            sysfs_net: PathBuf::from("/sys/class/net"),
            ip_command: PathBuf::from("ip"),
        }
    }
}

/// D-Bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbusConfig {
    /// Well-known name requested on the system bus
    pub bus_name: String,
}

impl Default for DbusConfig {
    fn default() -> Self {
        Self {
            bus_name: crate::plugin::DEFAULT_BUS_NAME.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.client.path.as_os_str().is_empty() {
            return Err("client.path cannot be empty".to_string());
        }

        if self.client.default_browser.trim().is_empty() {
            return Err("client.default_browser cannot be empty".to_string());
        }

        if self.client.auth_helper.trim().is_empty() {
            return Err("client.auth_helper cannot be empty".to_string());
        }

        if self.client.terminate_timeout_secs == 0
            || self.client.kill_timeout_secs == 0
            || self.client.disconnect_timeout_secs == 0
        {
            return Err("client timeouts must be greater than zero".to_string());
        }

        if self.discovery.interfaces.is_empty() {
            return Err("discovery.interfaces must list at least one interface".to_string());
        }

        if let Some(bad) = self
            .discovery
            .interfaces
            .iter()
            .find(|name| name.trim().is_empty() || name.as_str() == "*")
        {
            return Err(format!("Invalid discovery interface pattern: {:?}", bad));
        }

        if self.discovery.poll_interval_ms == 0 {
            return Err("discovery.poll_interval_ms cannot be zero".to_string());
        }

        if self.dbus.bus_name.trim().is_empty() {
            return Err("dbus.bus_name cannot be empty".to_string());
        }

        Ok(())
    }
}
