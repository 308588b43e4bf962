//! Production `TcpStack` implementation over `smoltcp`'s polled socket
//! model: an `Interface` + `SocketSet` driven by periodic `poll()`, with
//! per-socket watermarks diffed each tick to synthesize `PcbEvent`s instead
//! of exposing `smoltcp`'s own socket handles directly.

use super::{ErrCode, PacketBuffer, PcbEvent, PcbHandle, TcpStack};
use crate::address;
use rustc_hash::FxHashMap;
use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::phy::Device;
use smoltcp::socket::tcp;
use smoltcp::time::Instant;
use smoltcp::wire::{HardwareAddress, IpAddress, IpCidr, IpEndpoint, Ipv4Address, Ipv6Address};
use std::net::IpAddr;
use std::time::Instant as StdInstant;

/// Sizing knobs for sockets created through this stack, set from
/// `DriverConfig`.
#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    pub tcp_rx_buffer_size: usize,
    pub tcp_tx_buffer_size: usize,
    /// Upper bound on concurrently live sockets (listeners + flows), used
    /// only to size `SocketSet`'s backing storage up front.
    pub tcp_socket_count: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            tcp_rx_buffer_size: 64 * 1024,
            tcp_tx_buffer_size: 64 * 1024,
            tcp_socket_count: 256,
        }
    }
}

/// Default MSS reported when the underlying socket doesn't expose one yet
/// (before the handshake completes). Matches the usual Ethernet-minus-headers
/// figure; a deliberate simplification over a real `tcp_mss`, noted in the
/// design ledger.
const DEFAULT_MSS: usize = 1460;

#[derive(Default)]
struct Watermark {
    local: Option<(IpAddr, u16)>,
    connecting: bool,
    established: bool,
    rx_closed: bool,
    fin_delivered: bool,
    last_send_queue: usize,
    self_initiated_close: bool,
}

pub struct SmolStack<D: Device> {
    iface: Interface,
    device: D,
    sockets: SocketSet<'static>,
    epoch: StdInstant,
    next_id: u64,
    next_ephemeral_port: u16,
    handle_of: FxHashMap<PcbHandle, SocketHandle>,
    pcb_of: FxHashMap<SocketHandle, PcbHandle>,
    watermarks: FxHashMap<PcbHandle, Watermark>,
    listeners: FxHashMap<(IpAddr, u16), SocketHandle>,
    config: StackConfig,
}

impl<D: Device> SmolStack<D> {
    /// Builds the interface with the fixed virtual addresses the driver
    /// terminates flows against (10.0.0.1/24, fd00::1/64).
    pub fn new(mut device: D, config: StackConfig) -> Self {
        let mut iface_config = Config::new(HardwareAddress::Ip);
        iface_config.random_seed = 0;
        let mut iface = Interface::new(iface_config, &mut device, Instant::from_millis(0));
        iface.update_ip_addrs(|addrs| {
            addrs
                .push(IpCidr::new(IpAddress::v4(10, 0, 0, 1), 24))
                .expect("fresh address list has room");
            addrs
                .push(IpCidr::new(
                    IpAddress::v6(0xfd00, 0, 0, 0, 0, 0, 0, 1),
                    64,
                ))
                .expect("fresh address list has room");
        });
        iface
            .routes_mut()
            .add_default_ipv4_route(Ipv4Address::new(10, 0, 0, 1))
            .expect("default route slot available");
        iface
            .routes_mut()
            .add_default_ipv6_route(Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 1))
            .expect("default route slot available");

        Self {
            iface,
            device,
            sockets: SocketSet::new(Vec::with_capacity(config.tcp_socket_count)),
            epoch: StdInstant::now(),
            next_id: 1,
            next_ephemeral_port: 49_152,
            handle_of: FxHashMap::default(),
            pcb_of: FxHashMap::default(),
            watermarks: FxHashMap::default(),
            listeners: FxHashMap::default(),
            config,
        }
    }

    fn now(&self) -> Instant {
        let millis = self.epoch.elapsed().as_millis().min(i64::MAX as u128) as i64;
        Instant::from_millis(millis)
    }

    fn fresh_socket(&self) -> tcp::Socket<'static> {
        let rx = tcp::SocketBuffer::new(vec![0u8; self.config.tcp_rx_buffer_size]);
        let tx = tcp::SocketBuffer::new(vec![0u8; self.config.tcp_tx_buffer_size]);
        tcp::Socket::new(rx, tx)
    }

    fn alloc_pcb(&mut self, handle: SocketHandle) -> PcbHandle {
        let pcb = PcbHandle(self.next_id);
        self.next_id += 1;
        self.handle_of.insert(pcb, handle);
        self.pcb_of.insert(handle, pcb);
        self.watermarks.insert(pcb, Watermark::default());
        pcb
    }

    fn next_ephemeral(&mut self) -> u16 {
        let port = self.next_ephemeral_port;
        self.next_ephemeral_port = self.next_ephemeral_port.checked_add(1).unwrap_or(49_152);
        port
    }

    /// Registers a listener's local endpoint with the stack. Keeps exactly
    /// one `smoltcp` socket parked in `Listen` state for it, replenished
    /// each time it's promoted by an inbound SYN -- one pooled listening
    /// socket per registered listener rather than a single fixed pool.
    pub fn listen(&mut self, addr: IpAddr, port: u16) -> Result<(), ErrCode> {
        if self.listeners.contains_key(&(addr, port)) {
            return Ok(());
        }
        let mut socket = self.fresh_socket();
        socket
            .listen((address::to_wire(addr), port))
            .map_err(|_| ErrCode::Other)?;
        let handle = self.sockets.add(socket);
        self.listeners.insert((addr, port), handle);
        Ok(())
    }

    pub fn unlisten(&mut self, addr: IpAddr, port: u16) {
        if let Some(handle) = self.listeners.remove(&(addr, port)) {
            self.sockets.remove(handle);
        }
    }

    fn replenish_listener(&mut self, addr: IpAddr, port: u16) {
        let mut socket = self.fresh_socket();
        if socket.listen((address::to_wire(addr), port)).is_ok() {
            let handle = self.sockets.add(socket);
            self.listeners.insert((addr, port), handle);
        }
    }

    /// Inbound connections accepted since the last call: `(local_addr,
    /// local_port, pcb)`, to be matched against the listener table by the
    /// caller and bound to a freshly created endpoint.
    pub fn accept_events(&mut self) -> Vec<(IpAddr, u16, PcbHandle)> {
        let mut accepted = Vec::new();
        let promoted: Vec<((IpAddr, u16), SocketHandle)> = self
            .listeners
            .iter()
            .filter(|(_, &handle)| {
                let socket = self.sockets.get::<tcp::Socket>(handle);
                socket.state() == tcp::State::Established
            })
            .map(|(&key, &handle)| (key, handle))
            .collect();

        for (key, handle) in promoted {
            self.listeners.remove(&key);
            let pcb = self.alloc_pcb(handle);
            if let Some(w) = self.watermarks.get_mut(&pcb) {
                w.established = true;
                w.local = Some(key);
            }
            accepted.push((key.0, key.1, pcb));
            self.replenish_listener(key.0, key.1);
        }
        accepted
    }
}

impl<D: Device> TcpStack for SmolStack<D> {
    fn tcp_new(&mut self) -> PcbHandle {
        let socket = self.fresh_socket();
        let handle = self.sockets.add(socket);
        self.alloc_pcb(handle)
    }

    fn tcp_bind(&mut self, pcb: PcbHandle, addr: IpAddr, port: u16) -> ErrCode {
        match self.watermarks.get_mut(&pcb) {
            Some(w) => {
                w.local = Some((addr, port));
                ErrCode::Ok
            }
            None => ErrCode::Conn,
        }
    }

    fn tcp_connect(&mut self, pcb: PcbHandle, addr: IpAddr, port: u16) -> ErrCode {
        let Some(&handle) = self.handle_of.get(&pcb) else {
            return ErrCode::Conn;
        };
        let local_port = self
            .watermarks
            .get(&pcb)
            .and_then(|w| w.local)
            .map(|(_, p)| p)
            .unwrap_or(0);
        let local_port = if local_port == 0 {
            self.next_ephemeral()
        } else {
            local_port
        };
        let remote = IpEndpoint::new(address::to_wire(addr), port);
        let cx = self.iface.context();
        let socket = self.sockets.get_mut::<tcp::Socket>(handle);
        match socket.connect(cx, remote, local_port) {
            Ok(()) => {
                if let Some(w) = self.watermarks.get_mut(&pcb) {
                    w.connecting = true;
                }
                ErrCode::Ok
            }
            Err(_) => ErrCode::Other,
        }
    }

    fn tcp_abort(&mut self, pcb: PcbHandle) {
        if let Some(&handle) = self.handle_of.get(&pcb) {
            self.sockets.get_mut::<tcp::Socket>(handle).abort();
        }
        if let Some(w) = self.watermarks.get_mut(&pcb) {
            w.self_initiated_close = true;
        }
    }

    fn tcp_close(&mut self, pcb: PcbHandle) -> ErrCode {
        let Some(&handle) = self.handle_of.get(&pcb) else {
            return ErrCode::Conn;
        };
        self.sockets.get_mut::<tcp::Socket>(handle).close();
        if let Some(w) = self.watermarks.get_mut(&pcb) {
            w.self_initiated_close = true;
        }
        ErrCode::Ok
    }

    fn tcp_shutdown(&mut self, pcb: PcbHandle, rx: bool, tx: bool) -> ErrCode {
        let Some(&handle) = self.handle_of.get(&pcb) else {
            return ErrCode::Conn;
        };
        if tx {
            self.sockets.get_mut::<tcp::Socket>(handle).close();
            if let Some(w) = self.watermarks.get_mut(&pcb) {
                w.self_initiated_close = true;
            }
        }
        if rx {
            if let Some(w) = self.watermarks.get_mut(&pcb) {
                w.rx_closed = true;
            }
        }
        ErrCode::Ok
    }

    fn tcp_write(&mut self, pcb: PcbHandle, data: &[u8], _flags: u8) -> ErrCode {
        let Some(&handle) = self.handle_of.get(&pcb) else {
            return ErrCode::Conn;
        };
        let socket = self.sockets.get_mut::<tcp::Socket>(handle);
        let available = socket.send_capacity().saturating_sub(socket.send_queue());
        if available < data.len() {
            return ErrCode::Mem;
        }
        match socket.send_slice(data) {
            Ok(_) => ErrCode::Ok,
            Err(_) => ErrCode::Other,
        }
    }

    fn tcp_output(&mut self, _pcb: PcbHandle) -> ErrCode {
        // smoltcp has no separate flush step: queued segments are emitted
        // on the next `Interface::poll`, which `poll_events` already drives.
        ErrCode::Ok
    }

    fn tcp_recved(&mut self, _pcb: PcbHandle, _len: usize) {
        // smoltcp advances its receive window automatically as bytes are
        // drained via `recv_slice`; there is no separate accounting call.
    }

    fn tcp_sndbuf(&self, pcb: PcbHandle) -> usize {
        let Some(&handle) = self.handle_of.get(&pcb) else {
            return 0;
        };
        let socket = self.sockets.get::<tcp::Socket>(handle);
        if socket.can_send() {
            socket.send_capacity().saturating_sub(socket.send_queue())
        } else {
            0
        }
    }

    fn tcp_mss(&self, pcb: PcbHandle) -> usize {
        let Some(&handle) = self.handle_of.get(&pcb) else {
            return DEFAULT_MSS;
        };
        let socket = self.sockets.get::<tcp::Socket>(handle);
        socket.remote_mss().unwrap_or(DEFAULT_MSS)
    }

    fn tcp_set_nodelay(&mut self, pcb: PcbHandle, enabled: bool) {
        if let Some(&handle) = self.handle_of.get(&pcb) {
            self.sockets
                .get_mut::<tcp::Socket>(handle)
                .set_nagle_enabled(!enabled);
        }
    }

    fn local_endpoint(&self, pcb: PcbHandle) -> Option<(IpAddr, u16)> {
        let &handle = self.handle_of.get(&pcb)?;
        let socket = self.sockets.get::<tcp::Socket>(handle);
        socket
            .local_endpoint()
            .map(|ep| (address::from_wire(ep.addr), ep.port))
    }

    fn poll_events(&mut self) -> Vec<PcbEvent> {
        let timestamp = self.now();
        self.iface.poll(timestamp, &mut self.device, &mut self.sockets);

        let mut events = Vec::new();
        let mut to_remove = Vec::new();
        let live: Vec<(PcbHandle, SocketHandle)> =
            self.handle_of.iter().map(|(&p, &h)| (p, h)).collect();

        for (pcb, handle) in live {
            let socket = self.sockets.get_mut::<tcp::Socket>(handle);
            let state = socket.state();
            let watermark = self
                .watermarks
                .get_mut(&pcb)
                .expect("watermark tracked for every live pcb");

            if watermark.connecting {
                match state {
                    tcp::State::Established => {
                        watermark.connecting = false;
                        watermark.established = true;
                        events.push(PcbEvent::Connected {
                            pcb,
                            result: ErrCode::Ok,
                        });
                    }
                    tcp::State::Closed if !watermark.self_initiated_close => {
                        watermark.connecting = false;
                        events.push(PcbEvent::Connected {
                            pcb,
                            result: ErrCode::Other,
                        });
                        to_remove.push((pcb, handle));
                        continue;
                    }
                    _ => {}
                }
            }

            if watermark.established && !watermark.rx_closed {
                if socket.can_recv() {
                    let mut buf = vec![0u8; socket.recv_capacity().max(1)];
                    if let Ok(n) = socket.recv_slice(&mut buf) {
                        if n > 0 {
                            buf.truncate(n);
                            events.push(PcbEvent::Recv {
                                pcb,
                                data: Some(PacketBuffer::from_bytes(buf)),
                            });
                        }
                    }
                }
                if !watermark.fin_delivered && !socket.may_recv() && state != tcp::State::Closed {
                    watermark.fin_delivered = true;
                    events.push(PcbEvent::Recv { pcb, data: None });
                }
            }

            let queued = socket.send_queue();
            if queued < watermark.last_send_queue {
                events.push(PcbEvent::Sent {
                    pcb,
                    len: watermark.last_send_queue - queued,
                });
            }
            watermark.last_send_queue = queued;

            if state == tcp::State::Closed {
                if watermark.self_initiated_close {
                    to_remove.push((pcb, handle));
                } else if watermark.established {
                    events.push(PcbEvent::Err {
                        pcb,
                        code: ErrCode::Rst,
                    });
                    to_remove.push((pcb, handle));
                }
            }
        }

        for (pcb, handle) in to_remove {
            self.handle_of.remove(&pcb);
            self.pcb_of.remove(&handle);
            self.watermarks.remove(&pcb);
            self.sockets.remove(handle);
        }

        events
    }
}
