//! Unit tests for service configuration loading and validation

use nm_gpclient_core::config::{self, ServiceConfig, DEFAULT_BROWSER};
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_defaults() {
    let config = ServiceConfig::default();

    assert_eq!(config.client.path, Path::new("/usr/bin/gpclient"));
    assert_eq!(config.client.default_browser, DEFAULT_BROWSER);
    assert_eq!(config.client.auth_helper, "gpauth");
    assert_eq!(config.client.terminate_timeout(), Duration::from_secs(5));
    assert_eq!(config.client.kill_timeout(), Duration::from_secs(2));
    assert_eq!(config.client.disconnect_timeout(), Duration::from_secs(10));
    assert_eq!(config.discovery.interfaces, vec!["gpd0", "tun0", "tun1"]);
    assert_eq!(config.discovery.poll_interval(), Duration::from_millis(500));
    assert_eq!(config.discovery.sysfs_net, Path::new("/sys/class/net"));
    assert_eq!(config.dbus.bus_name, "org.freedesktop.NetworkManager.gpclient");
}

#[test]
fn test_empty_file_is_default() {
    let config = ServiceConfig::from_toml_str("").unwrap();
    assert_eq!(config, ServiceConfig::default());
}

#[test]
fn test_full_file() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[client]
path = "/opt/globalprotect/gpclient"
default_browser = "/usr/bin/firefox"
auth_helper = "gpauth"
terminate_timeout_secs = 3
kill_timeout_secs = 1
disconnect_timeout_secs = 4

[discovery]
interfaces = ["gpd*", "tun0"]
poll_interval_ms = 250
sysfs_net = "/sys/class/net"
ip_command = "/usr/sbin/ip"

[dbus]
bus_name = "org.freedesktop.NetworkManager.gpclient.dev"
"#,
    )
    .unwrap();

    let config = config::load(Some(path.as_path())).unwrap();

    assert_eq!(config.client.path, Path::new("/opt/globalprotect/gpclient"));
    assert_eq!(config.client.default_browser, "/usr/bin/firefox");
    assert_eq!(config.client.terminate_timeout(), Duration::from_secs(3));
    assert_eq!(config.discovery.interfaces, vec!["gpd*", "tun0"]);
    assert_eq!(config.discovery.ip_command, Path::new("/usr/sbin/ip"));
    assert_eq!(config.dbus.bus_name, "org.freedesktop.NetworkManager.gpclient.dev");
}

#[test]
fn test_zero_timeouts_are_rejected() {
    assert!(ServiceConfig::from_toml_str("[client]\nterminate_timeout_secs = 0\n").is_err());
    assert!(ServiceConfig::from_toml_str("[client]\ndisconnect_timeout_secs = 0\n").is_err());
}

#[test]
fn test_empty_bus_name_is_rejected() {
    let mut config = ServiceConfig::default();
    config.dbus.bus_name = "  ".to_string();
    assert_eq!(
        config.validate().unwrap_err(),
        "dbus.bus_name cannot be empty"
    );
}

#[test]
fn test_unknown_keys_are_ignored() {
    let config = ServiceConfig::from_toml_str("[client]\ncolour = \"blue\"\n").unwrap();
    assert_eq!(config.client, ServiceConfig::default().client);
}
