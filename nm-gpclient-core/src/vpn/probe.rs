//! Kernel network state queries used by tunnel discovery

use crate::error::DiscoveryError;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// IPv4 address assigned to an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub address: Ipv4Addr,
    pub prefix: u8,
}

/// Source of interface and route information
#[async_trait]
pub trait TunnelProbe: Send + Sync {
    /// Names of all network interfaces currently known to the kernel
    async fn interfaces(&self) -> Result<Vec<String>, DiscoveryError>;

    /// First IPv4 address of `interface`, if any
    async fn ipv4_address(
        &self,
        interface: &str,
    ) -> Result<Option<InterfaceAddress>, DiscoveryError>;

    /// Next hop of the first `via` route on `interface`, if any
    async fn route_gateway(&self, interface: &str) -> Result<Option<Ipv4Addr>, DiscoveryError>;
}

/// Probe backed by sysfs and iproute2
#[derive(Debug, Clone)]
pub struct IpCommandProbe {
    sysfs_net: PathBuf,
    ip_command: PathBuf,
}

impl IpCommandProbe {
    pub fn new(sysfs_net: impl Into<PathBuf>, ip_command: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_net: sysfs_net.into(),
            ip_command: ip_command.into(),
        }
    }

    async fn ip(&self, args: &[&str]) -> Result<String, DiscoveryError> {
        let command = format!("{} {}", self.ip_command.display(), args.join(" "));

        let output = Command::new(&self.ip_command)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DiscoveryError::CommandFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(DiscoveryError::CommandFailed {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl TunnelProbe for IpCommandProbe {
    async fn interfaces(&self) -> Result<Vec<String>, DiscoveryError> {
        let listing_error = |e: std::io::Error| DiscoveryError::InterfaceListing {
            reason: format!("{}: {}", self.sysfs_net.display(), e),
        };

        let mut entries = tokio::fs::read_dir(&self.sysfs_net)
            .await
            .map_err(listing_error)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(listing_error)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn ipv4_address(
        &self,
        interface: &str,
    ) -> Result<Option<InterfaceAddress>, DiscoveryError> {
        let output = self.ip(&["-4", "addr", "show", "dev", interface]).await?;
        parse_inet_address(&output)
    }

    async fn route_gateway(&self, interface: &str) -> Result<Option<Ipv4Addr>, DiscoveryError> {
        let output = self.ip(&["route", "show", "dev", interface]).await?;
        Ok(parse_via_gateway(&output))
    }
}

/// Extract the first `inet a.b.c.d[/len]` from `ip -4 addr show` output
///
/// A missing prefix length means a host address (/32).
pub fn parse_inet_address(output: &str) -> Result<Option<InterfaceAddress>, DiscoveryError> {
    let parse_error = |line: &str| DiscoveryError::ParseError {
        command: "ip -4 addr show".to_string(),
        line: line.trim().to_string(),
    };

    for line in output.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("inet") {
            continue;
        }

        let Some(cidr) = fields.next() else {
            return Err(parse_error(line));
        };

        let (address, prefix) = match cidr.split_once('/') {
            Some((address, prefix)) => (address, prefix),
            None => (cidr, "32"),
        };

        let address = address.parse::<Ipv4Addr>().map_err(|_| parse_error(line))?;
        let prefix = prefix
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| parse_error(line))?;

        return Ok(Some(InterfaceAddress { address, prefix }));
    }

    Ok(None)
}

/// Next hop of the first route in `ip route show` output that has one
pub fn parse_via_gateway(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        fields.find(|field| *field == "via")?;
        fields.next()?.parse::<Ipv4Addr>().ok()
    })
}
