//! Translation between the runtime's socket addresses and the embedded
//! stack's wire address types.

use smoltcp::wire::{IpAddress, IpEndpoint, Ipv4Address, Ipv6Address};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Converts a standard library address into the stack's wire representation.
pub fn to_wire(addr: IpAddr) -> IpAddress {
    match addr {
        IpAddr::V4(v4) => IpAddress::Ipv4(Ipv4Address::from_bytes(&v4.octets())),
        IpAddr::V6(v6) => IpAddress::Ipv6(Ipv6Address::from_bytes(&v6.octets())),
    }
}

/// Converts a wire address back into the standard library representation.
pub fn from_wire(addr: IpAddress) -> IpAddr {
    match addr {
        IpAddress::Ipv4(v4) => IpAddr::V4(Ipv4Addr::from(v4.0)),
        IpAddress::Ipv6(v6) => IpAddr::V6(Ipv6Addr::from(v6.0)),
    }
}

/// Converts a `SocketAddr` into the stack's `(address, port)` endpoint pair.
pub fn to_wire_endpoint(addr: SocketAddr) -> IpEndpoint {
    IpEndpoint::new(to_wire(addr.ip()), addr.port())
}

/// Converts a stack endpoint back into a `SocketAddr`.
pub fn from_wire_endpoint(endpoint: IpEndpoint) -> SocketAddr {
    SocketAddr::new(from_wire(endpoint.addr), endpoint.port)
}

/// Content-based hash key for the listener table: the normalized IP bytes
/// plus port, not a derived string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddrKey {
    bytes: [u8; 16],
    is_v6: bool,
    port: u16,
}

impl AddrKey {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        let mut bytes = [0u8; 16];
        let is_v6 = match addr {
            IpAddr::V4(v4) => {
                bytes[..4].copy_from_slice(&v4.octets());
                false
            }
            IpAddr::V6(v6) => {
                bytes.copy_from_slice(&v6.octets());
                true
            }
        };
        Self { bytes, is_v6, port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ipv4() {
        let addr: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(from_wire(to_wire(addr)), addr);
    }

    #[test]
    fn round_trips_ipv6() {
        let addr: IpAddr = "fd00::1".parse().unwrap();
        assert_eq!(from_wire(to_wire(addr)), addr);
    }

    #[test]
    fn addr_key_distinguishes_family() {
        let v4 = AddrKey::new("0.0.0.1".parse().unwrap(), 80);
        let v6 = AddrKey::new("::1".parse().unwrap(), 80);
        assert_ne!(v4, v6);
    }

    #[test]
    fn addr_key_distinguishes_port() {
        let a = AddrKey::new("10.0.0.1".parse().unwrap(), 80);
        let b = AddrKey::new("10.0.0.1".parse().unwrap(), 443);
        assert_ne!(a, b);
    }
}
