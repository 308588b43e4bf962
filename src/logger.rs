//! Diagnostic breadcrumbs for the driver.
//!
//! Each category is a bitflag a host can narrow at runtime; emission goes
//! through the `log` facade, tagged per-category by target string, so a host
//! application can filter with whatever backend it already uses.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BreadcrumbFlags: u32 {
        const DEVICE   = 0b0000_0001;
        const LISTENER = 0b0000_0010;
        const ENDPOINT = 0b0000_0100;
        const STACK    = 0b0000_1000;
        const ALL      = u32::MAX;
    }
}

static ENABLED: AtomicU32 = AtomicU32::new(BreadcrumbFlags::ALL.bits());

/// Narrows which categories reach the `log` facade. Defaults to all.
pub fn set_breadcrumb_mask(mask: u32) {
    ENABLED.store(mask, Ordering::Relaxed);
}

fn enabled(flag: BreadcrumbFlags) -> bool {
    BreadcrumbFlags::from_bits_truncate(ENABLED.load(Ordering::Relaxed)).intersects(flag)
}

fn target_for(flag: BreadcrumbFlags) -> &'static str {
    if flag.contains(BreadcrumbFlags::ENDPOINT) {
        "net_tun_bridge::endpoint"
    } else if flag.contains(BreadcrumbFlags::STACK) {
        "net_tun_bridge::stack"
    } else if flag.contains(BreadcrumbFlags::LISTENER) {
        "net_tun_bridge::listener"
    } else if flag.contains(BreadcrumbFlags::DEVICE) {
        "net_tun_bridge::device"
    } else {
        "net_tun_bridge"
    }
}

/// Emits a debug-level trace tagged with `flag`, gated by `set_breadcrumb_mask`.
pub fn breadcrumb(flag: BreadcrumbFlags, message: impl AsRef<str>) {
    if !enabled(flag) {
        return;
    }
    log::debug!(target: target_for(flag), "{}", message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    log::warn!(target: "net_tun_bridge", "{}", message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    log::error!(target: "net_tun_bridge", "{}", message.as_ref());
}

pub fn info(message: impl AsRef<str>) {
    log::info!(target: "net_tun_bridge", "{}", message.as_ref());
}
