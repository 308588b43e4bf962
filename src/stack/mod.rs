//! Facade over an embedded TCP/IP stack, shaped like lwIP's PCB-callback
//! contract. No published Rust crate exposes that exact callback surface,
//! so this module presents it as a trait, `TcpStack`, with two
//! implementations: `smol::SmolStack` over `smoltcp`'s polled sockets in
//! production, and `mock::MockStack` as a test double the endpoint bridge
//! can be driven against directly.

pub mod mock;
pub mod smol;

use std::net::IpAddr;

/// Mirrors the subset of lwIP's `err_t` this driver observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    Ok,
    Mem,
    Abrt,
    Rst,
    Conn,
    Other,
}

impl ErrCode {
    pub fn is_ok(self) -> bool {
        matches!(self, ErrCode::Ok)
    }

    pub fn strerror(self) -> &'static str {
        match self {
            ErrCode::Ok => "no error",
            ErrCode::Mem => "out of memory",
            ErrCode::Abrt => "connection aborted",
            ErrCode::Rst => "connection reset by peer",
            ErrCode::Conn => "not connected",
            ErrCode::Other => "stack error",
        }
    }
}

/// An owned packet buffer -- this facade's `pbuf`. Since there is no shared
/// C allocator pool behind it, `pbuf_alloc`/`pbuf_take` degrade to ordinary
/// `Vec` allocation (see the expanded specification's note on this
/// simplification); `pbuf_free` is simply `Drop`.
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    data: Vec<u8>,
}

impl PacketBuffer {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn tot_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `pbuf_copy_partial(p, dst, len, off)`: copies up to `dst.len()` bytes
    /// starting at `offset`, returning the number actually copied.
    pub fn copy_partial(&self, dst: &mut [u8], offset: usize) -> usize {
        if offset >= self.data.len() {
            return 0;
        }
        let available = &self.data[offset..];
        let n = available.len().min(dst.len());
        dst[..n].copy_from_slice(&available[..n]);
        n
    }
}

/// Opaque PCB handle. The concrete meaning (a `smoltcp::iface::SocketHandle`
/// for `SmolStack`, a table index for `MockStack`) is private to each
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcbHandle(pub u64);

/// Edge-triggered notification drained once per driver tick. Replaces
/// lwIP's fn-pointer callback invocation with an explicit poll; callback
/// ordering guarantees are unchanged, only the delivery mechanism differs.
#[derive(Debug, Clone)]
pub enum PcbEvent {
    /// Delivered once, at most, for a PCB that was mid-`tcp_connect`.
    Connected { pcb: PcbHandle, result: ErrCode },
    /// `data == None` signals peer FIN, matching lwIP's `recv(p = NULL)`.
    Recv {
        pcb: PcbHandle,
        data: Option<PacketBuffer>,
    },
    /// Some of our previously written bytes were acknowledged.
    Sent { pcb: PcbHandle, len: usize },
    /// The stack is releasing the PCB; no further event follows for it.
    Err { pcb: PcbHandle, code: ErrCode },
}

pub const TCP_WRITE_FLAG_COPY: u8 = 0x01;

/// The lwIP-shaped per-connection contract the endpoint bridge is written
/// against.
pub trait TcpStack {
    fn tcp_new(&mut self) -> PcbHandle;
    fn tcp_bind(&mut self, pcb: PcbHandle, addr: IpAddr, port: u16) -> ErrCode;
    fn tcp_connect(&mut self, pcb: PcbHandle, addr: IpAddr, port: u16) -> ErrCode;
    fn tcp_abort(&mut self, pcb: PcbHandle);
    fn tcp_close(&mut self, pcb: PcbHandle) -> ErrCode;
    fn tcp_shutdown(&mut self, pcb: PcbHandle, rx: bool, tx: bool) -> ErrCode;
    fn tcp_write(&mut self, pcb: PcbHandle, data: &[u8], flags: u8) -> ErrCode;
    fn tcp_output(&mut self, pcb: PcbHandle) -> ErrCode;
    fn tcp_recved(&mut self, pcb: PcbHandle, len: usize);
    fn tcp_sndbuf(&self, pcb: PcbHandle) -> usize;
    fn tcp_mss(&self, pcb: PcbHandle) -> usize;
    fn tcp_set_nodelay(&mut self, pcb: PcbHandle, enabled: bool);

    /// The PCB's locally bound/assigned endpoint, once known. Used by
    /// `connect` to record an ephemeral local port back into the calling
    /// endpoint.
    fn local_endpoint(&self, pcb: PcbHandle) -> Option<(IpAddr, u16)>;

    /// Drains edge-triggered events accumulated since the last call.
    fn poll_events(&mut self) -> Vec<PcbEvent>;
}
