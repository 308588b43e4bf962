use super::*;
use crate::listener::Protocol;

struct NoopWatcher {
    stopped: bool,
}

impl IoWatcher for NoopWatcher {
    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[test]
fn raw_device_has_no_tun_handle() {
    let device: Device<NoopWatcher> = Device::raw(1500);
    assert!(!device.is_tun());
    assert_eq!(device.mtu(), 1500);
}

#[test]
fn listener_table_is_reachable_and_mutable() {
    let mut device: Device<NoopWatcher> = Device::raw(1500);
    let addr: std::net::IpAddr = "0.0.0.0".parse().unwrap();
    device.listeners_mut().insert(addr, 443, Protocol::Tcp);
    assert!(device.listeners().lookup(addr, 443, Protocol::Tcp).is_some());
}

#[test]
fn dropping_device_clears_its_listeners() {
    let mut device: Device<NoopWatcher> = Device::raw(1500);
    let addr: std::net::IpAddr = "0.0.0.0".parse().unwrap();
    device.listeners_mut().insert(addr, 80, Protocol::Tcp);
    assert_eq!(device.listeners().len(), 1);
    drop(device);
    // Exercises Drop running to completion rather than inspecting freed
    // state (the table and watcher are gone with the device).
}
