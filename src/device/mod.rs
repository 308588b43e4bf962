//! Device abstraction: the per-interface aggregate owning a listener table,
//! an identity known to the TCP/IP stack, and (for TUN devices) the
//! event-loop watcher registered on its file descriptor. The file
//! descriptor itself is owned by `stack::smol::SmolStack`, which embeds a
//! `tun::TunDevice` as its `smoltcp::phy::Device` -- this struct holds the
//! bookkeeping the driver, not the stack, is responsible for.

pub mod tun;

use crate::listener::ListenerTable;
use crate::runtime::IoWatcher;
use std::net::Ipv4Addr;

pub const DEFAULT_MTU: usize = tun::DEFAULT_MTU;

/// The two device kinds this driver can bind to. `Raw` has no behavior yet
/// -- it's left unimplemented until a consumer exists.
pub enum DeviceKind {
    Tun {
        name: String,
        local_addr: Option<Ipv4Addr>,
        netmask: Option<Ipv4Addr>,
    },
    Raw,
}

/// A device bound to this driver: common fields (frame MTU, listener
/// table) plus whatever the kind requires. Freeing a `Device` frees its
/// listeners and unregisters its event-loop watcher.
pub struct Device<W: IoWatcher> {
    kind: DeviceKind,
    mtu: usize,
    listeners: ListenerTable,
    watcher: Option<W>,
}

impl<W: IoWatcher> Device<W> {
    /// Records a TUN device already opened and registered for readability
    /// by the caller (`driver::Driver::add_tun_device`, which owns the
    /// `tun::TunDevice`/`SmolStack` pairing).
    pub fn new_tun(
        watcher: W,
        name: String,
        mtu: usize,
        local_addr: Option<Ipv4Addr>,
        netmask: Option<Ipv4Addr>,
    ) -> Self {
        Self {
            kind: DeviceKind::Tun {
                name,
                local_addr,
                netmask,
            },
            mtu,
            listeners: ListenerTable::new(),
            watcher: Some(watcher),
        }
    }

    pub fn raw(mtu: usize) -> Self {
        Self {
            kind: DeviceKind::Raw,
            mtu,
            listeners: ListenerTable::new(),
            watcher: None,
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn listeners(&self) -> &ListenerTable {
        &self.listeners
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerTable {
        &mut self.listeners
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            DeviceKind::Tun { name, .. } => Some(name),
            DeviceKind::Raw => None,
        }
    }

    pub fn local_ipv4(&self) -> Option<Ipv4Addr> {
        match &self.kind {
            DeviceKind::Tun { local_addr, .. } => *local_addr,
            DeviceKind::Raw => None,
        }
    }

    pub fn netmask(&self) -> Option<Ipv4Addr> {
        match &self.kind {
            DeviceKind::Tun { netmask, .. } => *netmask,
            DeviceKind::Raw => None,
        }
    }

    pub fn is_tun(&self) -> bool {
        matches!(self.kind, DeviceKind::Tun { .. })
    }
}

impl<W: IoWatcher> Drop for Device<W> {
    fn drop(&mut self) {
        self.listeners.clear();
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
    }
}

#[cfg(test)]
mod tests;
