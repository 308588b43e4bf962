//! The outer endpoint/scheduler runtime the endpoint bridge is driven
//! against, expressed as traits so [`crate::endpoint`] is generic over
//! whatever concrete runtime embeds it.
//!
//! A reference implementation over `tokio`, [`tokio_adapter`], is provided
//! for driving a real async runtime around the bridge -- it is not required
//! by the bridge itself.

#[cfg(feature = "tokio-runtime")]
pub mod tokio_adapter;

use crate::error::NetworkError;
use crate::stack::PcbHandle;
use bitflags::bitflags;
use std::net::SocketAddr;

/// The seven states a runtime endpoint of this driver's type can occupy.
/// `set_state` may refuse a transition; the bridge's response to a refusal
/// is always to force `Deleting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Connecting,
    Established,
    ReadClosed,
    WriteClosed,
    Disable,
    Error,
    Deleting,
}

/// Returned by [`Endpoint::set_state`] when a transition is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRejected;

bitflags! {
    /// Boolean flags tracked alongside the state enum. `IS_WRITING` is the
    /// back-pressure flag; the set is a bitflag rather than separate bool
    /// fields so the bridge can read and toggle them in one place.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EndpointFlags: u8 {
        const IS_READABLE  = 0b0000_0001;
        const IS_WRITEABLE = 0b0000_0010;
        const IS_WRITING   = 0b0000_0100;
        const HAVE_ERROR   = 0b0000_1000;
        const IS_ACTIVE    = 0b0001_0000;
    }
}

/// Which side of the endpoint's paired ring buffers an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Read,
    Write,
}

/// Error source tag for [`Endpoint::set_error`]. `Network` is the only
/// source this crate ever records, but it's kept as an explicit parameter
/// rather than folded away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Network,
}

/// Per-endpoint state the bridge owns. Embedded in every concrete
/// `Endpoint` of this driver's type; [`crate::endpoint`]'s `set_pcb` is the
/// sole mutator.
#[derive(Debug, Default)]
pub struct BridgeState {
    pub pcb: Option<PcbHandle>,
    pub pcb_aborted: bool,
    /// Tracks which directions `update` has already shut down on the
    /// current `pcb`, so the `disable` arm -- which can be reached after one
    /// direction was already closed via `read_closed`/`write_closed` -- knows
    /// which direction is actually still open instead of re-deriving it from
    /// the (already-overwritten) endpoint state. Reset whenever a new `pcb`
    /// is bound via `set_pcb`.
    pub rx_shutdown: bool,
    pub tx_shutdown: bool,
}

impl BridgeState {
    pub const fn new() -> Self {
        Self {
            pcb: None,
            pcb_aborted: false,
            rx_shutdown: false,
            tx_shutdown: false,
        }
    }
}

/// The runtime's byte-stream endpoint abstraction, generalized as a trait
/// so [`crate::endpoint`]'s free functions can be driven against a test
/// double as well as a real async runtime adapter.
pub trait Endpoint {
    /// Access to the bridge's own state; never touched by the runtime
    /// itself, only by [`crate::endpoint`].
    fn bridge_state(&mut self) -> &mut BridgeState;

    /// Read-only view of the currently bound PCB, for capability queries
    /// that only need an `&self` borrow.
    fn pcb(&self) -> Option<PcbHandle>;

    fn state(&self) -> EndpointState;

    /// Attempts a state transition. A rejection leaves the current state
    /// unchanged; callers escalate to `Deleting`.
    fn set_state(&mut self, state: EndpointState) -> Result<(), TransitionRejected>;

    /// The endpoint's locally bound address, if any was set before connect
    /// or recorded back after.
    fn local_addr(&self) -> Option<SocketAddr>;
    fn set_local_addr(&mut self, addr: SocketAddr);
    /// Updates only the port of an already-known local address.
    fn set_local_port(&mut self, port: u16);

    /// Allocates at least `len` bytes in the given side's buffer and
    /// returns a writable view, or `None` on allocation failure.
    fn buf_alloc_at_least(&mut self, side: Side, len: usize) -> Option<&mut [u8]>;
    /// Commits `len` bytes just written into a side's buffer via
    /// `buf_alloc_at_least`, making them visible to the consumer. Returns
    /// `Err` if the runtime decided to reject the supply.
    fn buf_supply(&mut self, side: Side, len: usize) -> Result<(), ()>;
    /// Borrows up to `max_len` contiguous bytes from a side's buffer without
    /// consuming them.
    fn buf_peek_with_size(&self, side: Side, max_len: usize) -> &[u8];
    /// Removes `len` bytes from the front of a side's buffer.
    fn buf_consume(&mut self, side: Side, len: usize);
    fn buf_size(&self, side: Side) -> usize;
    fn buf_is_empty(&self, side: Side) -> bool {
        self.buf_size(side) == 0
    }

    fn flags(&self) -> EndpointFlags;
    fn set_flag(&mut self, flag: EndpointFlags, value: bool);
    fn is_readable(&self) -> bool {
        self.flags().contains(EndpointFlags::IS_READABLE)
    }
    fn is_writeable(&self) -> bool {
        self.flags().contains(EndpointFlags::IS_WRITEABLE)
    }
    fn is_writing(&self) -> bool {
        self.flags().contains(EndpointFlags::IS_WRITING)
    }
    fn have_error(&self) -> bool {
        self.flags().contains(EndpointFlags::HAVE_ERROR)
    }
    fn is_active(&self) -> bool {
        self.flags().contains(EndpointFlags::IS_ACTIVE)
    }

    /// Records an error on the endpoint. The bridge only calls this when
    /// `have_error()` is false -- an endpoint records only its first error.
    fn set_error(&mut self, source: ErrorSource, error: NetworkError);
}

/// Readability registration the injected reactor exposes. This crate never
/// runs its own event loop; a host provides one and registers readability
/// on a device's file descriptor through this trait.
pub trait IoWatcher {
    fn stop(&mut self);
}

/// The event loop `Driver` is handed at construction. Kept minimal: the
/// bridge itself never calls back into it except to register/unregister
/// readability for a device's file descriptor.
pub trait EventLoop {
    type Watcher: IoWatcher;

    /// Registers `fd` for readability; the concrete implementation's own
    /// dispatch loop invokes the driver once per edge (outside this
    /// trait's contract -- see `tokio_adapter` for how the reference
    /// implementation actually drives it).
    fn watch_readable(&self, fd: std::os::unix::io::RawFd) -> Self::Watcher;
}
