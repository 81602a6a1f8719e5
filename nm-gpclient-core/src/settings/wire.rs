//! Byte-order conversions for IPv4 values exchanged with NetworkManager
//!
//! NetworkManager is not consistent about how it packs IPv4 addresses into a
//! `u32`, so each direction/field gets its own named conversion.

use std::net::Ipv4Addr;

/// Decode the destination of a legacy `aau` route record.
///
/// NetworkManager writes these in host byte order on a little-endian machine,
/// so the first octet is the least significant byte.
pub fn legacy_route_destination(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_le_bytes())
}

/// Encode an address, gateway or route destination for `Ip4Config`
/// (network order: `10.1.2.3` becomes `0x0A010203`).
pub fn address_to_wire(addr: Ipv4Addr) -> u32 {
    u32::from(addr)
}

/// Encode a DNS server for `Ip4Config`.
///
/// Unlike addresses these are sent in little-endian host order, which is what
/// the receiving side of the gpclient plugin has always expected.
pub fn dns_to_wire(addr: Ipv4Addr) -> u32 {
    u32::from_le_bytes(addr.octets())
}
