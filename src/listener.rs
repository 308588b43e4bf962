//! Per-device listener table: `(address, protocol) -> Listener`, consulted
//! when the stack promotes an inbound SYN past the three-way handshake.
//! Lookup misses fall through to the stack's default handling (typically
//! RST) -- this module has no "reject" API of its own, the caller just
//! doesn't find an entry.

use crate::address::AddrKey;
use rustc_hash::FxHashMap;
use std::net::IpAddr;

/// Protocol tag a listener is registered under. TCP is the only live path;
/// UDP exists on the wire format but has no bridge behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A passive endpoint bound to a local `(address, protocol)`.
#[derive(Debug, Clone, Copy)]
pub struct Listener {
    pub address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
}

/// Per-device hash table, keyed by the content hash of the normalized
/// address bytes plus port (`AddrKey`) and the protocol tag, rather than a
/// derived string key.
#[derive(Debug, Default)]
pub struct ListenerTable {
    entries: FxHashMap<(AddrKey, Protocol), Listener>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(address: IpAddr, port: u16, protocol: Protocol) -> (AddrKey, Protocol) {
        (AddrKey::new(address, port), protocol)
    }

    /// Inserts a listener on `listen`. Replaces any existing entry at the
    /// same key.
    pub fn insert(&mut self, address: IpAddr, port: u16, protocol: Protocol) {
        let key = Self::key(address, port, protocol);
        self.entries.insert(
            key,
            Listener {
                address,
                port,
                protocol,
            },
        );
    }

    /// Looked up when the stack delivers a new inbound flow. A miss means
    /// "route to the stack's default handling" -- the caller does nothing
    /// further with the connection.
    pub fn lookup(&self, address: IpAddr, port: u16, protocol: Protocol) -> Option<&Listener> {
        self.entries.get(&Self::key(address, port, protocol))
    }

    /// Explicit close of a single listener.
    pub fn remove(&mut self, address: IpAddr, port: u16, protocol: Protocol) -> Option<Listener> {
        self.entries.remove(&Self::key(address, port, protocol))
    }

    /// Frees every listener, as device shutdown requires.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut table = ListenerTable::new();
        let addr: IpAddr = "0.0.0.0".parse().unwrap();
        table.insert(addr, 80, Protocol::Tcp);
        assert!(table.lookup(addr, 80, Protocol::Tcp).is_some());
        assert!(table.lookup(addr, 81, Protocol::Tcp).is_none());
        assert!(table.lookup(addr, 80, Protocol::Udp).is_none());
    }

    #[test]
    fn remove_drops_only_matching_entry() {
        let mut table = ListenerTable::new();
        let addr: IpAddr = "0.0.0.0".parse().unwrap();
        table.insert(addr, 80, Protocol::Tcp);
        table.insert(addr, 443, Protocol::Tcp);
        table.remove(addr, 80, Protocol::Tcp);
        assert!(table.lookup(addr, 80, Protocol::Tcp).is_none());
        assert!(table.lookup(addr, 443, Protocol::Tcp).is_some());
    }

    #[test]
    fn clear_frees_all_listeners() {
        let mut table = ListenerTable::new();
        let addr: IpAddr = "0.0.0.0".parse().unwrap();
        table.insert(addr, 80, Protocol::Tcp);
        table.insert(addr, 443, Protocol::Tcp);
        table.clear();
        assert!(table.is_empty());
    }
}
