//! Error types for the gpclient NetworkManager plugin
//!
//! This module defines all error types used throughout the service,
//! grouped by the component that raises them.

use thiserror::Error;

/// Main error type for the plugin service
#[derive(Error, Debug)]
pub enum GpError {
    /// Errors related to the service configuration file
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors decoding the connection settings handed over by NetworkManager
    #[error("Invalid connection settings: {0}")]
    Settings(#[from] SettingsError),

    /// Errors related to the VPN client process and connection lifecycle
    #[error("VPN error: {0}")]
    Vpn(#[from] VpnError),

    /// D-Bus transport errors
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Service configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },
}

/// Connection settings errors
///
/// Any of these fails `Connect` before a client process is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Missing settings section: {section}")]
    MissingSection { section: String },

    #[error("Missing required setting: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// VPN client and connection lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VpnError {
    #[error("Failed to spawn VPN client: {reason}")]
    ProcessSpawnError { reason: String },

    #[error("VPN client exited with status {}", display_code(.code))]
    ProcessExited { code: Option<i32> },

    #[error("{operation} did not finish within {seconds} seconds")]
    TerminationTimeout { operation: String, seconds: u64 },

    #[error("Connection session is no longer running")]
    SessionClosed,
}

/// Transient failures while querying interface or route state
///
/// These are logged and retried on the next poll tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Failed to run {command}: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Failed to list network interfaces: {reason}")]
    InterfaceListing { reason: String },

    #[error("Unexpected output from {command}: {line}")]
    ParseError { command: String, line: String },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown (terminated by signal)".to_string(),
    }
}

impl From<GpError> for zbus::fdo::Error {
    fn from(error: GpError) -> Self {
        zbus::fdo::Error::Failed(error.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GpError>;
