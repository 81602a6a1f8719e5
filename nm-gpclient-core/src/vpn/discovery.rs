//! Tunnel interface discovery
//!
//! gpclient does not tell us which interface it created or when it is ready,
//! so we poll the kernel until one of the candidate interfaces carries an
//! IPv4 address and turn that into the `Ip4Config` NetworkManager expects.

use crate::config::DiscoveryConfig;
use crate::settings::wire::{address_to_wire, dns_to_wire};
use crate::settings::ConnectionRequest;
use crate::vpn::probe::TunnelProbe;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Route entry: destination, prefix, next hop, metric
pub type RouteEntry = (Ipv4Addr, u8, Ipv4Addr, u32);

/// State of a discovered tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
    pub interface_name: String,
    pub address: Option<Ipv4Addr>,
    pub prefix_length: u8,
    pub gateway: Option<Ipv4Addr>,
    pub routes: Vec<RouteEntry>,
    pub dns: Vec<Ipv4Addr>,
}

/// `Ip4Config` payload with every value already in wire byte order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ip4Config {
    pub tundev: String,
    /// Network order
    pub address: u32,
    pub prefix: u32,
    /// Network order
    pub gateway: u32,
    /// `[dest (network order), prefix, next hop, metric]`
    pub routes: Vec<[u32; 4]>,
    /// Little-endian order
    pub dns: Vec<u32>,
}

impl Ip4Config {
    /// Encode a tunnel status; `None` if it has no address
    pub fn from_status(status: &TunnelStatus) -> Option<Self> {
        let address = status.address?;
        let gateway = status.gateway.unwrap_or(address);

        Some(Self {
            tundev: status.interface_name.clone(),
            address: address_to_wire(address),
            prefix: u32::from(status.prefix_length),
            gateway: address_to_wire(gateway),
            routes: status
                .routes
                .iter()
                .map(|(dest, prefix, next_hop, metric)| {
                    [
                        address_to_wire(*dest),
                        u32::from(*prefix),
                        address_to_wire(*next_hop),
                        *metric,
                    ]
                })
                .collect(),
            dns: status.dns.iter().copied().map(dns_to_wire).collect(),
        })
    }
}

/// Resolve the candidate list against the interfaces that exist
///
/// Exact names are kept in order when present. A trailing `*` matches every
/// present interface with that prefix, in sorted order.
pub fn expand_candidates(candidates: &[String], present: &[String]) -> Vec<String> {
    let mut sorted: Vec<&String> = present.iter().collect();
    sorted.sort();

    let mut expanded: Vec<String> = Vec::new();
    for candidate in candidates {
        let matches: Vec<&String> = match candidate.strip_suffix('*') {
            Some(prefix) => sorted
                .iter()
                .copied()
                .filter(|name| name.starts_with(prefix))
                .collect(),
            None => sorted
                .iter()
                .copied()
                .filter(|name| *name == candidate)
                .collect(),
        };

        for name in matches {
            if !expanded.contains(name) {
                expanded.push(name.clone());
            }
        }
    }
    expanded
}

/// Repeating discovery over an ordered candidate list
pub struct TunnelPoller {
    probe: Arc<dyn TunnelProbe>,
    candidates: Vec<String>,
    interval: Duration,
}

impl TunnelPoller {
    pub fn new(probe: Arc<dyn TunnelProbe>, config: &DiscoveryConfig) -> Self {
        Self {
            probe,
            candidates: config.interfaces.clone(),
            interval: config.poll_interval(),
        }
    }

    /// Poll until a tunnel is found or `cancel` fires
    ///
    /// There is no timeout of its own; the attempt owning the token decides
    /// when to give up.
    pub async fn run(
        &self,
        request: &ConnectionRequest,
        cancel: CancellationToken,
    ) -> Option<TunnelStatus> {
        debug!(
            "Polling {:?} every {:?} for the tunnel interface",
            self.candidates, self.interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                status = self.poll_once(request) => {
                    if let Some(status) = status {
                        return Some(status);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// One pass over the candidates; first interface with an address wins
    pub async fn poll_once(&self, request: &ConnectionRequest) -> Option<TunnelStatus> {
        let present = match self.probe.interfaces().await {
            Ok(present) => present,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };

        for interface in expand_candidates(&self.candidates, &present) {
            let assigned = match self.probe.ipv4_address(&interface).await {
                Ok(Some(assigned)) => assigned,
                Ok(None) => {
                    debug!("Interface {} exists but has no IP, skipping", interface);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to get tunnel IP for {}: {}", interface, e);
                    continue;
                }
            };

            // Point-to-point tunnels often have no `via` route; NetworkManager
            // still needs a gateway, so the tunnel address stands in.
            let gateway = match self.probe.route_gateway(&interface).await {
                Ok(Some(gateway)) => gateway,
                Ok(None) => assigned.address,
                Err(e) => {
                    warn!("Failed to read routes of {}, using its address: {}", interface, e);
                    assigned.address
                }
            };

            info!(
                "VPN connected - tunnel interface {} detected with IP {}/{}",
                interface, assigned.address, assigned.prefix
            );

            return Some(TunnelStatus {
                interface_name: interface,
                address: Some(assigned.address),
                prefix_length: assigned.prefix,
                gateway: Some(gateway),
                routes: request
                    .custom_routes
                    .iter()
                    .map(|route| (route.destination, route.prefix, Ipv4Addr::UNSPECIFIED, 0))
                    .collect(),
                dns: request.dns_servers.clone(),
            });
        }

        None
    }
}
