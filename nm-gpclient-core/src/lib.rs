//! Core library for the gpclient NetworkManager VPN plugin
//!
//! This crate decodes NetworkManager connection settings, supervises the
//! `gpclient` process, discovers the tunnel interface it creates and exposes
//! the whole lifecycle over the NetworkManager VPN plugin D-Bus interface.

pub mod error;

pub mod config;
pub mod plugin;
pub mod settings;
pub mod vpn;

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when the service was started
/// by NetworkManager under systemd. Otherwise logs to stderr.
pub fn init_logging(debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?.with_syslog_identifier(
                "nm-gpclient-service".to_string(),
            );
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(level)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(level)
        .try_init()?;

    Ok(())
}

/// Whether debug logging was requested through the environment
///
/// `GPCLIENT_DEBUG=1` has the same effect as `--debug`.
pub fn debug_requested_by_env() -> bool {
    std::env::var("GPCLIENT_DEBUG")
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}
