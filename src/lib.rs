#![deny(unsafe_op_in_unsafe_fn)]

//! A userspace TCP/IP driver bridging a host TUN device to an in-process,
//! event-driven endpoint runtime.
//!
//! The component map: [`address`] translates between standard library and
//! `smoltcp` wire addresses; [`device`] owns the per-interface listener
//! table and (for TUN devices) the live file descriptor, via
//! [`device::tun::TunDevice`]; [`stack`] faces the embedded TCP/IP engine
//! through an lwIP-shaped callback facade, [`stack::TcpStack`], backed in
//! production by [`stack::smol::SmolStack`]; [`listener`] is the per-device
//! passive-endpoint table consulted on inbound SYN; [`endpoint`] is the TCP
//! endpoint bridge mediating between the stack's PCB callbacks and the
//! runtime's [`runtime::Endpoint`] abstraction -- the heart of this crate;
//! and [`driver`] ties all of the above into the single aggregate a host
//! application drives one tick at a time.

pub mod address;
pub mod config;
pub mod device;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod logger;
pub mod runtime;
pub mod stack;

pub use config::DriverConfig;
pub use driver::Driver;
pub use error::{NetworkError, NetworkErrorKind};
