//! Connection settings translator
//!
//! Turns the `a{sa{sv}}` settings NetworkManager passes to `Connect` into an
//! immutable [`ConnectionRequest`]. Decoding is pure: the same settings and
//! default browser always produce the same request or the same error.

use crate::error::SettingsError;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, warn};
use zbus::zvariant::{OwnedValue, Value};

mod variant;
pub mod wire;

use variant::{as_bool, as_str, as_u32, elements, string_map, variant_map};

/// Settings as received over D-Bus: section name to key/value map
pub type ConnectionSettings = HashMap<String, HashMap<String, OwnedValue>>;

/// A route the VPN should carry in addition to what the gateway pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomRoute {
    pub destination: Ipv4Addr,
    pub prefix: u8,
}

/// Typed view of one connect attempt's settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Portal/gateway host, passed to gpclient verbatim
    pub gateway: String,

    /// Browser used for SAML authentication
    pub browser: String,

    /// DNS servers to report with the tunnel configuration
    pub dns_servers: Vec<Ipv4Addr>,

    /// Search domains forwarded to gpclient
    pub dns_domains: Vec<String>,

    /// Submit a HIP report after connecting
    pub hip_enabled: bool,

    /// Never route the default route through the tunnel
    pub never_default: bool,

    /// Ignore routes pushed by the gateway
    pub ignore_auto_routes: bool,

    pub custom_routes: Vec<CustomRoute>,
}

const VPN_SECTION: &str = "vpn";
const IPV4_SECTION: &str = "ipv4";
const HOST_PREFIX: u32 = 32;

impl ConnectionRequest {
    /// Decode NetworkManager settings
    ///
    /// `default_browser` is used when the `browser` key is absent or empty.
    pub fn decode(
        settings: &ConnectionSettings,
        default_browser: &str,
    ) -> Result<Self, SettingsError> {
        let vpn = settings
            .get(VPN_SECTION)
            .ok_or_else(|| SettingsError::MissingSection {
                section: VPN_SECTION.to_string(),
            })?;

        let data = match vpn.get("data") {
            Some(value) => string_map(value).ok_or_else(|| SettingsError::InvalidValue {
                field: "vpn.data".to_string(),
                reason: "expected a string dictionary".to_string(),
            })?,
            None => HashMap::new(),
        };

        let gateway = data
            .get("gateway")
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .ok_or_else(|| SettingsError::MissingField {
                field: "gateway".to_string(),
            })?
            .to_string();

        let browser = data
            .get("browser")
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .unwrap_or(default_browser)
            .to_string();

        let dns_servers = data
            .get("dns")
            .map(|dns| parse_dns_servers(dns))
            .unwrap_or_default();

        let dns_domains = data
            .get("dns-domains")
            .map(|domains| domains.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let hip_enabled = data
            .get("hip")
            .map(|hip| hip.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        let ipv4 = settings.get(IPV4_SECTION);
        let flag = |key: &str| {
            ipv4.and_then(|section| section.get(key))
                .and_then(|value| as_bool(value))
                .unwrap_or(false)
        };
        let never_default = flag("never-default");
        let ignore_auto_routes = flag("ignore-auto-routes");

        let custom_routes = match ipv4 {
            Some(section) => decode_routes(section)?,
            None => Vec::new(),
        };

        let request = Self {
            gateway,
            browser,
            dns_servers,
            dns_domains,
            hip_enabled,
            never_default,
            ignore_auto_routes,
            custom_routes,
        };

        debug!("Decoded connection settings: {:?}", request);
        Ok(request)
    }
}

/// Split a `;`-separated DNS list, dropping blanks and non-IPv4 entries
fn parse_dns_servers(raw: &str) -> Vec<Ipv4Addr> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<Ipv4Addr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!("Ignoring invalid DNS server {:?}", entry);
                None
            }
        })
        .collect()
}

/// Structured `route-data` wins over the legacy `routes` encoding
fn decode_routes(ipv4: &HashMap<String, OwnedValue>) -> Result<Vec<CustomRoute>, SettingsError> {
    if let Some(records) = ipv4.get("route-data").and_then(|value| elements(value)) {
        if !records.is_empty() {
            return records
                .into_iter()
                .filter_map(|record| route_from_record(record).transpose())
                .collect();
        }
    }

    match ipv4.get("routes").and_then(|value| elements(value)) {
        Some(records) => records
            .into_iter()
            .filter_map(|record| route_from_legacy(record).transpose())
            .collect(),
        None => Ok(Vec::new()),
    }
}

/// `{dest: s, prefix: u}`; records without a usable destination are skipped
fn route_from_record(record: &Value<'_>) -> Result<Option<CustomRoute>, SettingsError> {
    let Some(fields) = variant_map(record) else {
        warn!("Skipping malformed route-data record");
        return Ok(None);
    };

    let mut destination = None;
    let mut prefix = None;
    for (key, value) in fields {
        match key {
            "dest" => destination = as_str(value).and_then(|d| d.trim().parse::<Ipv4Addr>().ok()),
            "prefix" => prefix = as_u32(value),
            _ => {}
        }
    }

    let Some(destination) = destination else {
        warn!("Skipping route-data record without a valid destination");
        return Ok(None);
    };

    Ok(Some(CustomRoute {
        destination,
        prefix: checked_prefix(prefix.unwrap_or(HOST_PREFIX))?,
    }))
}

/// `[dest, prefix, next_hop, metric]` with `dest` in little-endian order
fn route_from_legacy(record: &Value<'_>) -> Result<Option<CustomRoute>, SettingsError> {
    let fields = elements(record).unwrap_or_default();

    let Some(raw_destination) = fields.first().and_then(|value| as_u32(value)) else {
        warn!("Skipping legacy route without a destination");
        return Ok(None);
    };

    let prefix = fields
        .get(1)
        .and_then(|value| as_u32(value))
        .unwrap_or(HOST_PREFIX);

    Ok(Some(CustomRoute {
        destination: wire::legacy_route_destination(raw_destination),
        prefix: checked_prefix(prefix)?,
    }))
}

fn checked_prefix(prefix: u32) -> Result<u8, SettingsError> {
    u8::try_from(prefix)
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| SettingsError::InvalidValue {
            field: "ipv4.routes".to_string(),
            reason: format!("prefix length {} is larger than 32", prefix),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dns_servers() {
        assert_eq!(
            parse_dns_servers(" 8.8.8.8 ;; 8.8.4.4;"),
            vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)]
        );
        assert_eq!(
            parse_dns_servers("dns.example.com;1.1.1.1"),
            vec![Ipv4Addr::new(1, 1, 1, 1)]
        );
        assert!(parse_dns_servers("").is_empty());
    }

    #[test]
    fn test_checked_prefix() {
        assert_eq!(checked_prefix(0), Ok(0));
        assert_eq!(checked_prefix(32), Ok(32));
        assert!(checked_prefix(33).is_err());
        assert!(checked_prefix(u32::MAX).is_err());
    }
}
