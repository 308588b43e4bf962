//! Driver-wide sizing and diagnostic knobs.
//!
//! A plain struct with a `Default` impl supplying the constants the
//! interface builder and the endpoint bridge would otherwise hard-code.

use crate::logger::BreadcrumbFlags;

/// Configuration for a [`crate::driver::Driver`].
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Frame MTU used for the TUN device and the scratch read buffer.
    pub mtu: usize,
    /// Per-socket receive buffer size handed to the embedded stack.
    pub tcp_rx_buffer_size: usize,
    /// Per-socket send buffer size handed to the embedded stack.
    pub tcp_tx_buffer_size: usize,
    /// Upper bound on concurrently live TCP sockets (listeners + flows).
    pub tcp_socket_count: usize,
    /// Breadcrumb categories enabled at startup.
    pub debug_level: BreadcrumbFlags,
}

/// Per-socket buffer size under the default profile.
#[cfg(not(feature = "constrained-memory-profile"))]
const DEFAULT_TCP_BUFFER_SIZE: usize = 64 * 1024;
/// Per-socket buffer size under `constrained-memory-profile`, which shrinks
/// buffers for memory-constrained hosts.
#[cfg(feature = "constrained-memory-profile")]
const DEFAULT_TCP_BUFFER_SIZE: usize = 4 * 1024;

#[cfg(not(feature = "constrained-memory-profile"))]
const DEFAULT_TCP_SOCKET_COUNT: usize = 256;
#[cfg(feature = "constrained-memory-profile")]
const DEFAULT_TCP_SOCKET_COUNT: usize = 32;

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mtu: crate::device::DEFAULT_MTU,
            tcp_rx_buffer_size: DEFAULT_TCP_BUFFER_SIZE,
            tcp_tx_buffer_size: DEFAULT_TCP_BUFFER_SIZE,
            tcp_socket_count: DEFAULT_TCP_SOCKET_COUNT,
            debug_level: BreadcrumbFlags::ALL,
        }
    }
}
