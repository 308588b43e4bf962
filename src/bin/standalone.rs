//! Standalone runner: opens a TUN device, terminates inbound TCP against the
//! embedded stack, and echoes bytes back on every accepted flow. Prints the
//! `ip addr add` incantation the operator needs to run after startup, since
//! this driver never assigns the interface's address itself.
//!
//! Drives `net_tun_bridge::driver::Driver` directly against
//! `runtime::tokio_adapter::{TokioEventLoop, RuntimeEndpoint}`.

use net_tun_bridge::config::DriverConfig;
use net_tun_bridge::driver::Driver;
use net_tun_bridge::logger::{self, BreadcrumbFlags};
use net_tun_bridge::runtime::tokio_adapter::{RuntimeEndpoint, TokioEventLoop};
use net_tun_bridge::runtime::{Endpoint, Side};
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const ECHO_PORT: u16 = 7;
const RING_CAPACITY: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = Settings::parse()?;
    eprintln!(
        "[standalone] launching TCP/IP driver (mtu={}, ifname={:?})",
        settings.mtu, settings.ifname
    );

    let wake = Arc::new(Notify::new());
    let event_loop = TokioEventLoop::new(tokio::runtime::Handle::current(), Arc::clone(&wake));

    let config = DriverConfig {
        mtu: settings.mtu,
        debug_level: BreadcrumbFlags::ALL,
        ..DriverConfig::default()
    };

    let mut driver: Driver<RuntimeEndpoint, TokioEventLoop> =
        Driver::open_tun(config, &event_loop, settings.ifname.as_deref())?;

    let interface_name = driver.device_name().unwrap_or("tun?").to_string();
    println!(
        "[standalone] interface {0} ready. Configure it (as root) via:\n  sudo ip link set {0} up\n  sudo ip addr add 10.0.0.1/24 dev {0}\n  sudo ip -6 addr add fd00::1/64 dev {0}",
        interface_name
    );

    driver
        .listen(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), ECHO_PORT)
        .map_err(|_| anyhow::anyhow!("failed to listen on echo port {ECHO_PORT}"))?;
    logger::breadcrumb(
        BreadcrumbFlags::LISTENER,
        format!("echoing on 10.0.0.1:{ECHO_PORT}"),
    );

    println!("[standalone] driver running. Press Ctrl+C to terminate.");

    loop {
        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        let accepted = driver.poll(|| RuntimeEndpoint::new(RING_CAPACITY, RING_CAPACITY));
        for id in accepted {
            println!("[standalone] accepted flow {}", id.0);
        }
        echo_pending(&mut driver);
    }
}

/// Moves every readable byte straight to the write side of its own endpoint,
/// demonstrating the bridge without needing an external peer to dial out to.
fn echo_pending(driver: &mut Driver<RuntimeEndpoint, TokioEventLoop>) {
    for id in driver.endpoint_ids() {
        let Some(endpoint) = driver.endpoint_mut(id) else {
            continue;
        };
        let available = endpoint.buf_size(Side::Read);
        if available == 0 {
            continue;
        }
        let bytes = endpoint.buf_peek_with_size(Side::Read, available).to_vec();
        if let Some(dst) = endpoint.buf_alloc_at_least(Side::Write, bytes.len()) {
            dst[..bytes.len()].copy_from_slice(&bytes);
            if endpoint.buf_supply(Side::Write, bytes.len()).is_ok() {
                endpoint.buf_consume(Side::Read, bytes.len());
            }
        }
    }
}

#[derive(Debug)]
struct Settings {
    mtu: usize,
    ifname: Option<String>,
}

impl Settings {
    fn parse() -> anyhow::Result<Self> {
        let mut mtu = net_tun_bridge::device::DEFAULT_MTU;
        let mut ifname = None;
        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--mtu" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--mtu requires a value"))?;
                    mtu = value.parse().map_err(|_| anyhow::anyhow!("invalid mtu"))?;
                }
                "--ifname" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--ifname requires a value"))?;
                    if value.is_empty() {
                        anyhow::bail!("--ifname requires a non-empty value");
                    }
                    ifname = Some(value);
                }
                _ => anyhow::bail!("unknown argument '{}'. Supported: --mtu <value>, --ifname <name>", arg),
            }
        }
        Ok(Self { mtu, ifname })
    }
}
