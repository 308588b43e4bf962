//! Reference runtime adapter over `tokio`, wiring [`EventLoop`]/[`IoWatcher`]
//! onto `tokio::io::unix::AsyncFd` and providing a concrete [`Endpoint`] with
//! `VecDeque`-backed read/write rings. [`crate::endpoint`] itself only ever
//! depends on the traits in the parent module.

use super::{BridgeState, Endpoint, EndpointFlags, EndpointState, ErrorSource, EventLoop, IoWatcher, Side, TransitionRejected};
use crate::error::NetworkError;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::runtime::Handle;

/// A readability watcher backed by a spawned task polling `AsyncFd`;
/// dropping/calling [`stop`](IoWatcher::stop) aborts it.
pub struct TokioWatcher {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl IoWatcher for TokioWatcher {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TokioWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`EventLoop`] over the ambient `tokio` runtime handle. The bridge never
/// calls [`EventLoop::watch_readable`] itself -- only [`crate::device::tun`]
/// does, at device creation.
pub struct TokioEventLoop {
    handle: Handle,
    wake: Arc<tokio::sync::Notify>,
}

impl TokioEventLoop {
    pub fn new(handle: Handle, wake: Arc<tokio::sync::Notify>) -> Self {
        Self { handle, wake }
    }
}

impl EventLoop for TokioEventLoop {
    type Watcher = TokioWatcher;

    fn watch_readable(&self, fd: RawFd) -> Self::Watcher {
        let wake = Arc::clone(&self.wake);
        // Safety (at the call site in `device::tun`): `fd` stays open and
        // owned by the `TunDevice` for at least as long as this watcher
        // lives; the watcher is stopped before the device closes the fd.
        let borrowed = unsafe { BorrowedRawFd::new(fd) };
        let task = self.handle.spawn(async move {
            let Ok(async_fd) = AsyncFd::new(borrowed) else {
                return;
            };
            loop {
                match async_fd.readable().await {
                    Ok(mut guard) => {
                        guard.clear_ready();
                        wake.notify_one();
                    }
                    Err(_) => break,
                }
            }
        });
        TokioWatcher { task: Some(task) }
    }
}

/// A `RawFd` wrapper that implements `AsRawFd` without taking ownership,
/// since the fd's lifetime is managed by `TunDevice`, not this watcher.
struct BorrowedRawFd(RawFd);

impl BorrowedRawFd {
    /// Safety: caller guarantees `fd` remains valid and open for the
    /// lifetime of the `AsyncFd` built from it.
    unsafe fn new(fd: RawFd) -> Self {
        Self(fd)
    }
}

impl std::os::unix::io::AsRawFd for BorrowedRawFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A concrete, in-process [`Endpoint`]: paired `VecDeque<u8>` rings for the
/// `read`/`write` sides, the seven-state machine with its allowed-transition
/// table, and the flag bitset.
pub struct RuntimeEndpoint {
    bridge: BridgeState,
    state: EndpointState,
    local_addr: Option<SocketAddr>,
    read_buf: VecDeque<u8>,
    write_buf: VecDeque<u8>,
    read_cap: usize,
    write_cap: usize,
    flags: EndpointFlags,
    error: Option<NetworkError>,
    scratch: Vec<u8>,
}

impl RuntimeEndpoint {
    pub fn new(read_cap: usize, write_cap: usize) -> Self {
        Self {
            bridge: BridgeState::new(),
            state: EndpointState::Connecting,
            local_addr: None,
            read_buf: VecDeque::with_capacity(read_cap),
            write_buf: VecDeque::with_capacity(write_cap),
            read_cap,
            write_cap,
            flags: EndpointFlags::IS_READABLE
                | EndpointFlags::IS_WRITEABLE
                | EndpointFlags::IS_ACTIVE,
            error: None,
            scratch: Vec::new(),
        }
    }

    pub fn error(&self) -> Option<&NetworkError> {
        self.error.as_ref()
    }

    fn side_buf(&self, side: Side) -> &VecDeque<u8> {
        match side {
            Side::Read => &self.read_buf,
            Side::Write => &self.write_buf,
        }
    }

    fn side_buf_mut(&mut self, side: Side) -> &mut VecDeque<u8> {
        match side {
            Side::Read => &mut self.read_buf,
            Side::Write => &mut self.write_buf,
        }
    }

    fn side_cap(&self, side: Side) -> usize {
        match side {
            Side::Read => self.read_cap,
            Side::Write => self.write_cap,
        }
    }

    /// Allowed runtime-endpoint transitions; anything not listed is
    /// refused, which the caller turns into a forced `Deleting`.
    fn transition_allowed(from: EndpointState, to: EndpointState) -> bool {
        use EndpointState::*;
        if to == Deleting {
            return true;
        }
        matches!(
            (from, to),
            (Connecting, Established)
                | (Connecting, Error)
                | (Connecting, Disable)
                | (Established, ReadClosed)
                | (Established, WriteClosed)
                | (Established, Error)
                | (Established, Disable)
                | (ReadClosed, WriteClosed)
                | (ReadClosed, Disable)
                | (ReadClosed, Error)
                | (WriteClosed, Disable)
                | (WriteClosed, ReadClosed)
                | (WriteClosed, Error)
                | (Disable, Error)
                | (Error, Disable)
        )
    }
}

impl Endpoint for RuntimeEndpoint {
    fn bridge_state(&mut self) -> &mut BridgeState {
        &mut self.bridge
    }

    fn pcb(&self) -> Option<crate::stack::PcbHandle> {
        self.bridge.pcb
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn set_state(&mut self, state: EndpointState) -> Result<(), TransitionRejected> {
        if state == self.state {
            return Ok(());
        }
        if !Self::transition_allowed(self.state, state) {
            return Err(TransitionRejected);
        }
        self.state = state;
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = Some(addr);
    }

    fn set_local_port(&mut self, port: u16) {
        if let Some(addr) = &mut self.local_addr {
            addr.set_port(port);
        }
    }

    fn buf_alloc_at_least(&mut self, side: Side, len: usize) -> Option<&mut [u8]> {
        let cap = self.side_cap(side);
        let buf = self.side_buf(side);
        if buf.len() + len > cap {
            return None;
        }
        // The ring has no contiguous-slice write API; callers (the bridge's
        // `on_recv`) use `buf_supply` immediately after copying into a
        // scratch slice, so a fixed scratch area stands in for a true
        // zero-copy allocation here. See DESIGN.md for this simplification.
        self.scratch.resize(len, 0);
        Some(&mut self.scratch[..len])
    }

    fn buf_supply(&mut self, side: Side, len: usize) -> Result<(), ()> {
        if self.state == EndpointState::Deleting {
            return Err(());
        }
        let bytes: Vec<u8> = self.scratch[..len].to_vec();
        self.side_buf_mut(side).extend(bytes);
        Ok(())
    }

    fn buf_peek_with_size(&self, side: Side, max_len: usize) -> &[u8] {
        let buf = self.side_buf(side);
        let (first, _) = buf.as_slices();
        &first[..first.len().min(max_len)]
    }

    fn buf_consume(&mut self, side: Side, len: usize) {
        let buf = self.side_buf_mut(side);
        buf.drain(..len.min(buf.len()));
    }

    fn buf_size(&self, side: Side) -> usize {
        self.side_buf(side).len()
    }

    fn flags(&self) -> EndpointFlags {
        self.flags
    }

    fn set_flag(&mut self, flag: EndpointFlags, value: bool) {
        self.flags.set(flag, value);
    }

    fn set_error(&mut self, _source: ErrorSource, error: NetworkError) {
        if self.have_error() {
            return;
        }
        self.error = Some(error);
        self.set_flag(EndpointFlags::HAVE_ERROR, true);
    }
}
