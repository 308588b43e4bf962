//! The driver aggregate: owns the embedded TCP/IP stack instance, the
//! device list, the scratch buffer, and the live endpoint table this
//! driver type bridges PCBs into. Ties the device, listener, and endpoint
//! layers together into a single-threaded cooperative tick loop.

use crate::config::DriverConfig;
use crate::device::{tun, Device};
use crate::endpoint::{self, EndpointId, PcbTable};
use crate::error::NetworkError;
use crate::listener::{ListenerTable, Protocol};
use crate::logger::{self, BreadcrumbFlags};
use crate::runtime::{Endpoint, EndpointState, ErrorSource, EventLoop};
use crate::stack::smol::{SmolStack, StackConfig};
use crate::stack::{ErrCode, PcbEvent, TcpStack};
use rustc_hash::FxHashMap;
use std::net::{IpAddr, SocketAddr};

/// Aggregate owning everything a driver instance needs. Generic over the
/// runtime's concrete [`Endpoint`] type and [`EventLoop`] so it can be
/// driven against `runtime::tokio_adapter` in production or a lighter
/// stand-in in tests.
pub struct Driver<E: Endpoint, L: EventLoop> {
    stack: SmolStack<tun::TunDevice>,
    device: Device<L::Watcher>,
    endpoints: FxHashMap<EndpointId, E>,
    pcb_table: PcbTable,
    next_endpoint_id: u64,
    scratch: Vec<u8>,
    debug_level: BreadcrumbFlags,
}

impl<E: Endpoint, L: EventLoop> Driver<E, L> {
    /// Opens a TUN device and builds the embedded stack over it. There is
    /// exactly one stack/device pair per driver in this implementation --
    /// a deliberate simplification noted in DESIGN.md, since
    /// `smoltcp::iface::Interface` is itself bound to a single `Device`.
    pub fn open_tun(config: DriverConfig, event_loop: &L, ifname: Option<&str>) -> std::io::Result<Self> {
        let tun = tun::TunDevice::open(ifname, config.mtu)?;
        let fd = tun.as_raw_fd();
        let name = tun.name().to_string();
        let local_addr = tun.local_addr();
        let netmask = tun.netmask();
        let mtu = tun.mtu();

        let watcher = event_loop.watch_readable(fd);
        let device = Device::new_tun(watcher, name, mtu, local_addr, netmask);

        let stack_config = StackConfig {
            tcp_rx_buffer_size: config.tcp_rx_buffer_size,
            tcp_tx_buffer_size: config.tcp_tx_buffer_size,
            tcp_socket_count: config.tcp_socket_count,
        };
        let stack = SmolStack::new(tun, stack_config);

        logger::set_breadcrumb_mask(config.debug_level.bits());

        Ok(Self {
            stack,
            device,
            endpoints: FxHashMap::default(),
            pcb_table: PcbTable::new(),
            next_endpoint_id: 1,
            // Capped at the 64KiB fail-safe ceiling frames are dropped past
            // anyway, so a larger scratch buffer would never be filled.
            scratch: vec![0u8; tun::MAX_FRAME_SIZE],
            debug_level: config.debug_level,
        })
    }

    pub fn debug_level(&self) -> BreadcrumbFlags {
        self.debug_level
    }

    pub fn scratch_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    pub fn listeners(&self) -> &ListenerTable {
        self.device.listeners()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device.name()
    }

    /// Starts listening on `addr:port` and records it in the listener table.
    pub fn listen(&mut self, addr: IpAddr, port: u16) -> Result<(), ()> {
        self.stack.listen(addr, port).map_err(|_| ())?;
        self.device.listeners_mut().insert(addr, port, Protocol::Tcp);
        logger::breadcrumb(BreadcrumbFlags::LISTENER, format!("listening on {addr}:{port}"));
        Ok(())
    }

    /// Stops listening on `addr:port` and drops it from the listener table.
    pub fn unlisten(&mut self, addr: IpAddr, port: u16) {
        self.stack.unlisten(addr, port);
        self.device.listeners_mut().remove(addr, port, Protocol::Tcp);
    }

    fn fresh_id(&mut self) -> EndpointId {
        let id = EndpointId(self.next_endpoint_id);
        self.next_endpoint_id += 1;
        id
    }

    /// Registers a freshly constructed endpoint under a new id and returns
    /// it; the caller drives further operations (`connect`, reads, writes)
    /// by id.
    pub fn insert_endpoint(&mut self, endpoint: E) -> EndpointId {
        let id = self.fresh_id();
        self.endpoints.insert(id, endpoint);
        id
    }

    pub fn endpoint_ids(&self) -> Vec<EndpointId> {
        self.endpoints.keys().copied().collect()
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&E> {
        self.endpoints.get(&id)
    }

    pub fn endpoint_mut(&mut self, id: EndpointId) -> Option<&mut E> {
        self.endpoints.get_mut(&id)
    }

    pub fn remove_endpoint(&mut self, id: EndpointId) -> Option<E> {
        self.endpoints.remove(&id)
    }

    /// Outbound connect against an already-registered endpoint id.
    pub fn connect(&mut self, id: EndpointId, remote: SocketAddr) -> Result<(), ()> {
        let endpoint = self.endpoints.get_mut(&id).ok_or(())?;
        endpoint::connect(endpoint, &mut self.stack, &mut self.pcb_table, id, remote)
    }

    pub fn set_no_delay(&mut self, id: EndpointId, enabled: bool) {
        if let Some(endpoint) = self.endpoints.get(&id) {
            endpoint::set_no_delay(endpoint, &mut self.stack, enabled);
        }
    }

    pub fn get_mss(&self, id: EndpointId) -> usize {
        self.endpoints
            .get(&id)
            .map(|endpoint| endpoint::get_mss(endpoint, &self.stack))
            .unwrap_or(0)
    }

    pub fn calc_size(&self, id: EndpointId) -> (usize, usize) {
        self.endpoints
            .get(&id)
            .map(|endpoint| endpoint::calc_size(endpoint, &self.stack))
            .unwrap_or((0, 0))
    }

    /// One driver tick: accept newly promoted inbound flows (binding a
    /// fresh endpoint built by `make_endpoint` to each), drain and dispatch
    /// PCB events to their owning endpoint, then run the state-driven
    /// `update` for every live endpoint. A stack failure surfaced by
    /// `update` is escalated onto the endpoint as a network error, forcing
    /// it toward `Error`/`Deleting` rather than being retried forever.
    /// Returns the ids of any endpoints accepted this tick.
    pub fn poll(&mut self, make_endpoint: impl Fn() -> E) -> Vec<EndpointId> {
        let accepted_ids = self.accept_inbound(make_endpoint);

        let events = self.stack.poll_events();
        for event in events {
            self.dispatch(event);
        }

        let ids: Vec<EndpointId> = self.endpoints.keys().copied().collect();
        for id in ids {
            if let Some(endpoint) = self.endpoints.get_mut(&id) {
                if endpoint.state() == EndpointState::Deleting {
                    continue;
                }
                if endpoint::update(endpoint, &mut self.stack, &mut self.pcb_table, id).is_err() {
                    if !endpoint.have_error() {
                        endpoint.set_error(ErrorSource::Network, NetworkError::internal("update failed"));
                    }
                    if endpoint.set_state(EndpointState::Error).is_err() {
                        let _ = endpoint.set_state(EndpointState::Deleting);
                    }
                }
            }
        }

        self.endpoints
            .retain(|_, endpoint| endpoint.state() != EndpointState::Deleting || endpoint.pcb().is_some());

        accepted_ids
    }

    /// Matches newly accepted flows against the listener table (already
    /// done inside `SmolStack::accept_events`, which only promotes sockets
    /// still registered as listeners) and binds a fresh endpoint built by
    /// `make_endpoint` to each.
    fn accept_inbound(&mut self, make_endpoint: impl Fn() -> E) -> Vec<EndpointId> {
        let accepted = self.stack.accept_events();
        let mut ids = Vec::with_capacity(accepted.len());
        for (local_addr, local_port, pcb) in accepted {
            let mut endpoint = make_endpoint();
            endpoint.set_local_addr(SocketAddr::new(local_addr, local_port));
            let id = self.fresh_id();
            endpoint::set_pcb(&mut endpoint, &mut self.stack, &mut self.pcb_table, id, Some(pcb), false);
            let _ = endpoint.set_state(EndpointState::Established);
            self.endpoints.insert(id, endpoint);
            ids.push(id);
            logger::breadcrumb(
                BreadcrumbFlags::LISTENER,
                format!("accepted inbound flow on {local_addr}:{local_port}"),
            );
        }
        ids
    }

    fn dispatch(&mut self, event: PcbEvent) {
        let pcb = match &event {
            PcbEvent::Connected { pcb, .. }
            | PcbEvent::Recv { pcb, .. }
            | PcbEvent::Sent { pcb, .. }
            | PcbEvent::Err { pcb, .. } => *pcb,
        };
        let Some(id) = self.pcb_table.owner_of(pcb) else {
            return;
        };
        let Some(mut endpoint) = self.endpoints.remove(&id) else {
            return;
        };

        match event {
            PcbEvent::Connected { result, .. } => {
                endpoint::on_connected(&mut endpoint, &mut self.stack, &mut self.pcb_table, id, result);
            }
            PcbEvent::Recv { data, .. } => {
                endpoint::on_recv(&mut endpoint, &mut self.stack, &mut self.pcb_table, id, data);
            }
            PcbEvent::Sent { len, .. } => {
                endpoint::on_sent(&mut endpoint, &mut self.stack, len);
            }
            PcbEvent::Err { code, .. } => {
                endpoint::on_err(&mut endpoint, &mut self.pcb_table, pcb, code);
            }
        }

        self.endpoints.insert(id, endpoint);
    }
}

/// Surfaces a stack `ErrCode` as a `-1`/`0` result, the convention used for
/// calls made outside a PCB callback.
pub fn as_call_result(err: ErrCode) -> i32 {
    if err.is_ok() {
        0
    } else {
        -1
    }
}
