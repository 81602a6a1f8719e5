//! Tests for tunnel interface discovery

use async_trait::async_trait;
use nm_gpclient_core::config::DiscoveryConfig;
use nm_gpclient_core::error::DiscoveryError;
use nm_gpclient_core::settings::{ConnectionRequest, CustomRoute};
use nm_gpclient_core::vpn::{InterfaceAddress, IpCommandProbe, TunnelPoller, TunnelProbe};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory kernel state; interfaces show up after `appear_after` passes
#[derive(Default)]
struct MockProbe {
    interfaces: Vec<String>,
    addresses: HashMap<String, InterfaceAddress>,
    gateways: HashMap<String, Ipv4Addr>,
    failing: Vec<String>,
    failing_routes: Vec<String>,
    appear_after: usize,
    passes: AtomicUsize,
}

impl MockProbe {
    fn with_interface(mut self, name: &str, address: Option<(Ipv4Addr, u8)>) -> Self {
        self.interfaces.push(name.to_string());
        if let Some((address, prefix)) = address {
            self.addresses
                .insert(name.to_string(), InterfaceAddress { address, prefix });
        }
        self
    }
}

#[async_trait]
impl TunnelProbe for MockProbe {
    async fn interfaces(&self) -> Result<Vec<String>, DiscoveryError> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst);
        if pass < self.appear_after {
            return Ok(vec!["lo".to_string()]);
        }
        Ok(self.interfaces.clone())
    }

    async fn ipv4_address(
        &self,
        interface: &str,
    ) -> Result<Option<InterfaceAddress>, DiscoveryError> {
        if self.failing.iter().any(|name| name == interface) {
            return Err(DiscoveryError::CommandFailed {
                command: format!("ip -4 addr show dev {}", interface),
                reason: "Device does not exist".to_string(),
            });
        }
        Ok(self.addresses.get(interface).copied())
    }

    async fn route_gateway(&self, interface: &str) -> Result<Option<Ipv4Addr>, DiscoveryError> {
        if self.failing_routes.iter().any(|name| name == interface) {
            return Err(DiscoveryError::CommandFailed {
                command: format!("ip route show dev {}", interface),
                reason: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }
        Ok(self.gateways.get(interface).copied())
    }
}

fn request() -> ConnectionRequest {
    ConnectionRequest {
        gateway: "vpn.example.com".to_string(),
        browser: "default".to_string(),
        dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
        dns_domains: vec![],
        hip_enabled: false,
        never_default: false,
        ignore_auto_routes: false,
        custom_routes: vec![CustomRoute {
            destination: Ipv4Addr::new(10, 0, 0, 0),
            prefix: 8,
        }],
    }
}

fn poller(probe: MockProbe) -> TunnelPoller {
    let config = DiscoveryConfig {
        poll_interval_ms: 10,
        ..DiscoveryConfig::default()
    };
    TunnelPoller::new(Arc::new(probe), &config)
}

#[tokio::test]
async fn test_nothing_present() {
    let poller = poller(MockProbe::default().with_interface("eth0", None));
    assert!(poller.poll_once(&request()).await.is_none());
}

#[tokio::test]
async fn test_gateway_falls_back_to_tunnel_address() {
    let probe = MockProbe::default().with_interface("tun0", Some((Ipv4Addr::new(10, 8, 0, 5), 24)));
    let status = poller(probe).poll_once(&request()).await.unwrap();

    assert_eq!(status.interface_name, "tun0");
    assert_eq!(status.address, Some(Ipv4Addr::new(10, 8, 0, 5)));
    assert_eq!(status.prefix_length, 24);
    assert_eq!(status.gateway, Some(Ipv4Addr::new(10, 8, 0, 5)));
    assert_eq!(
        status.routes,
        vec![(Ipv4Addr::new(10, 0, 0, 0), 8, Ipv4Addr::UNSPECIFIED, 0)]
    );
    assert_eq!(status.dns, request().dns_servers);
}

#[tokio::test]
async fn test_route_gateway_is_used_when_present() {
    let mut probe =
        MockProbe::default().with_interface("gpd0", Some((Ipv4Addr::new(10, 1, 2, 3), 24)));
    probe
        .gateways
        .insert("gpd0".to_string(), Ipv4Addr::new(10, 1, 2, 1));

    let status = poller(probe).poll_once(&request()).await.unwrap();
    assert_eq!(status.gateway, Some(Ipv4Addr::new(10, 1, 2, 1)));
}

#[tokio::test]
async fn test_candidate_priority() {
    let probe = MockProbe::default()
        .with_interface("tun0", Some((Ipv4Addr::new(10, 8, 0, 5), 24)))
        .with_interface("gpd0", Some((Ipv4Addr::new(10, 9, 0, 5), 32)));

    let status = poller(probe).poll_once(&request()).await.unwrap();
    assert_eq!(status.interface_name, "gpd0");
}

#[tokio::test]
async fn test_interface_without_address_is_skipped() {
    let probe = MockProbe::default()
        .with_interface("gpd0", None)
        .with_interface("tun1", Some((Ipv4Addr::new(10, 8, 0, 9), 24)));

    let status = poller(probe).poll_once(&request()).await.unwrap();
    assert_eq!(status.interface_name, "tun1");
}

#[tokio::test]
async fn test_query_failure_skips_candidate() {
    let mut probe = MockProbe::default()
        .with_interface("gpd0", Some((Ipv4Addr::new(10, 9, 0, 5), 32)))
        .with_interface("tun0", Some((Ipv4Addr::new(10, 8, 0, 5), 24)));
    probe.failing.push("gpd0".to_string());

    let status = poller(probe).poll_once(&request()).await.unwrap();
    assert_eq!(status.interface_name, "tun0");
}

#[tokio::test]
async fn test_route_query_failure_falls_back_to_tunnel_address() {
    let mut probe =
        MockProbe::default().with_interface("gpd0", Some((Ipv4Addr::new(10, 9, 0, 5), 32)));
    probe.failing_routes.push("gpd0".to_string());

    let status = poller(probe).poll_once(&request()).await.unwrap();
    assert_eq!(status.interface_name, "gpd0");
    assert_eq!(status.gateway, Some(Ipv4Addr::new(10, 9, 0, 5)));
}

#[tokio::test]
async fn test_run_polls_until_interface_appears() {
    let mut probe =
        MockProbe::default().with_interface("tun0", Some((Ipv4Addr::new(10, 8, 0, 5), 24)));
    probe.appear_after = 3;
    let probe = Arc::new(probe);

    let config = DiscoveryConfig {
        poll_interval_ms: 10,
        ..DiscoveryConfig::default()
    };
    let poller = TunnelPoller::new(probe.clone(), &config);

    let status = tokio::time::timeout(
        Duration::from_secs(5),
        poller.run(&request(), CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(status.interface_name, "tun0");
    assert_eq!(probe.passes.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_run_stops_on_cancellation() {
    let poller = poller(MockProbe::default());
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let result = tokio::time::timeout(Duration::from_secs(5), poller.run(&request(), cancel))
        .await
        .unwrap();
    assert!(result.is_none());
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_ip_command_probe_with_fake_system() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = dir.path().join("net");
    for name in ["lo", "tun0", "eth0"] {
        std::fs::create_dir_all(sysfs.join(name)).unwrap();
    }

    let ip = dir.path().join("ip");
    std::fs::write(
        &ip,
        r#"#!/bin/sh
case "$*" in
  "-4 addr show dev tun0")
    echo "5: tun0: <POINTOPOINT,UP> mtu 1400 state UNKNOWN"
    echo "    inet 10.8.0.5/24 scope global tun0"
    ;;
  "route show dev tun0")
    echo "10.8.0.0/24 proto kernel scope link src 10.8.0.5"
    ;;
  *)
    echo "Device does not exist" >&2
    exit 1
    ;;
esac
"#,
    )
    .unwrap();
    std::fs::set_permissions(&ip, std::fs::Permissions::from_mode(0o755)).unwrap();

    let probe = IpCommandProbe::new(&sysfs, &ip);

    assert_eq!(probe.interfaces().await.unwrap(), vec!["eth0", "lo", "tun0"]);
    assert_eq!(
        probe.ipv4_address("tun0").await.unwrap(),
        Some(InterfaceAddress {
            address: Ipv4Addr::new(10, 8, 0, 5),
            prefix: 24,
        })
    );
    assert_eq!(probe.route_gateway("tun0").await.unwrap(), None);
    assert!(matches!(
        probe.ipv4_address("gpd0").await,
        Err(DiscoveryError::CommandFailed { .. })
    ));

    let config = DiscoveryConfig {
        sysfs_net: sysfs.clone(),
        ip_command: ip.clone(),
        ..DiscoveryConfig::default()
    };
    let status = TunnelPoller::new(Arc::new(probe), &config)
        .poll_once(&request())
        .await
        .unwrap();
    assert_eq!(status.interface_name, "tun0");
    assert_eq!(status.gateway, Some(Ipv4Addr::new(10, 8, 0, 5)));
}

#[tokio::test]
async fn test_missing_sysfs_is_a_listing_error() {
    let probe = IpCommandProbe::new("/nonexistent/sys/class/net", "ip");
    assert!(matches!(
        probe.interfaces().await,
        Err(DiscoveryError::InterfaceListing { .. })
    ));
}
