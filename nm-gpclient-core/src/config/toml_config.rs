//! TOML configuration file I/O
//!
//! Loads the service configuration from `/etc/nm-gpclient/config.toml` or an
//! explicit path given on the command line.

use crate::config::ServiceConfig;
use crate::error::{ConfigError, GpError};
use std::path::Path;
use tracing::{debug, info, warn};

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nm-gpclient/config.toml";

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, GpError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GpError::Config(ConfigError::LoadFailed {
                path: path.to_string_lossy().to_string(),
            }),
            _ => GpError::Io(e),
        })?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, GpError> {
        let config: ServiceConfig = toml::from_str(contents)?;

        config.validate().map_err(|message| {
            warn!("Configuration validation failed: {}", message);
            GpError::Config(ConfigError::ValidationError { message })
        })?;

        Ok(config)
    }
}

/// Load the service configuration
///
/// An explicit path must exist. The default path is optional and its absence
/// yields the built-in defaults.
pub fn load(path: Option<&Path>) -> Result<ServiceConfig, GpError> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ServiceConfig::from_file(path)?
        }
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                info!("Loading configuration from {}", default_path.display());
                ServiceConfig::from_file(default_path)?
            } else {
                debug!(
                    "No configuration file at {}, using defaults",
                    default_path.display()
                );
                ServiceConfig::default()
            }
        }
    };

    debug!(
        "Client {} (browser {}), candidates {:?} every {}ms",
        config.client.path.display(),
        config.client.default_browser,
        config.discovery.interfaces,
        config.discovery.poll_interval_ms
    );

    Ok(config)
}
