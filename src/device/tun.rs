//! The TUN device pump: opens the OS TUN control device, configures it as
//! an L3-only interface, discovers its MTU/address/netmask, and implements
//! `smoltcp`'s `phy::Device` directly over the raw file descriptor so
//! `stack::smol::SmolStack::poll_events` drives the read/write path without
//! an intermediate ring buffer.
//!
//! The open sequence -- open, `TUNSETIFF`, `fcntl` `O_NONBLOCK`, then
//! best-effort `SIOCGIFADDR`/`SIOCGIFNETMASK` discovery that tolerates the
//! interface having no address yet (an external `ip addr add` is expected
//! to follow) -- matches how a userspace TUN driver typically brings the
//! interface up.

use crate::logger::{self, BreadcrumbFlags};
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem::zeroed;
use std::net::Ipv4Addr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;

/// Frames larger than this are dropped outright regardless of `mtu`, a
/// fixed fail-safe ceiling.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

pub const DEFAULT_MTU: usize = 1500;

/// An opened and configured TUN interface.
pub struct TunDevice {
    file: File,
    name: String,
    mtu: usize,
    local_addr: Option<Ipv4Addr>,
    netmask: Option<Ipv4Addr>,
    read_buf: Vec<u8>,
}

impl TunDevice {
    /// Opens `/dev/net/tun`, configures it with `TUNSETIFF` in `IFF_TUN |
    /// IFF_NO_PI` mode (no link header -- this device is L3-only), sets it
    /// non-blocking, then best-effort discovers the address/netmask the
    /// kernel already has assigned.
    #[cfg(target_os = "linux")]
    pub fn open(requested_name: Option<&str>, mtu: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/net/tun")?;
        let fd = file.as_raw_fd();

        let mut ifreq: libc::ifreq = unsafe { zeroed() };
        if let Some(name) = requested_name {
            for (idx, byte) in name.as_bytes().iter().enumerate() {
                if idx >= libc::IFNAMSIZ {
                    break;
                }
                ifreq.ifr_name[idx] = *byte as libc::c_char;
            }
        }
        ifreq.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

        if unsafe { libc::ioctl(fd, libc::TUNSETIFF, &ifreq) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let name = unsafe {
            std::ffi::CStr::from_ptr(ifreq.ifr_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };

        set_nonblocking(fd)?;

        let (local_addr, netmask) = discover_address(&name).unwrap_or((None, None));

        logger::breadcrumb(
            BreadcrumbFlags::DEVICE,
            format!("opened TUN device {name} (mtu={mtu}, addr={local_addr:?}, netmask={netmask:?})"),
        );

        Ok(Self {
            file,
            name,
            mtu: mtu.max(576),
            local_addr,
            netmask,
            read_buf: vec![0u8; MAX_FRAME_SIZE],
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_requested_name: Option<&str>, _mtu: usize) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "TUN device creation is only implemented for Linux; see DESIGN.md",
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn local_addr(&self) -> Option<Ipv4Addr> {
        self.local_addr
    }

    pub fn netmask(&self) -> Option<Ipv4Addr> {
        self.netmask
    }

    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.file.as_raw_fd()
    }

    /// Reads one packet directly off the fd, applying the read-path
    /// fail-safe checks: oversized frames are dropped and the read loop
    /// continues; `EAGAIN`/`EWOULDBLOCK`/`0` end the loop for this wakeup;
    /// other errors are logged and end the loop.
    fn read_one(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.file.read(&mut self.read_buf) {
                Ok(0) => return None,
                Ok(n) => {
                    if n > MAX_FRAME_SIZE {
                        logger::warn(format!("dropping oversized TUN frame ({n} bytes)"));
                        continue;
                    }
                    if n > self.mtu {
                        logger::breadcrumb(
                            BreadcrumbFlags::DEVICE,
                            format!("TUN frame ({n} bytes) exceeds configured mtu ({})", self.mtu),
                        );
                    }
                    return Some(self.read_buf[..n].to_vec());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    logger::error(format!("TUN read failed: {e}"));
                    return None;
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn set_nonblocking(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Best-effort `SIOCGIFADDR`/`SIOCGIFNETMASK` discovery over a scratch UDP
/// socket. Returns `(None, None)` rather than an error when the interface
/// has no address yet -- address assignment is typically done by an
/// external `ip addr add` step.
#[cfg(target_os = "linux")]
fn discover_address(name: &str) -> io::Result<(Option<Ipv4Addr>, Option<Ipv4Addr>)> {
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(io::Error::last_os_error());
    }
    let guard = scopeguard_close(sock);

    let mut ifreq: libc::ifreq = unsafe { zeroed() };
    let cname = CString::new(name).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad ifname"))?;
    let bytes = cname.as_bytes_with_nul();
    for (idx, byte) in bytes.iter().enumerate() {
        if idx >= libc::IFNAMSIZ {
            break;
        }
        ifreq.ifr_name[idx] = *byte as libc::c_char;
    }

    let addr = read_ifreq_addr(guard.fd, &mut ifreq, libc::SIOCGIFADDR);
    let mask = read_ifreq_addr(guard.fd, &mut ifreq, libc::SIOCGIFNETMASK);
    Ok((addr, mask))
}

#[cfg(target_os = "linux")]
fn read_ifreq_addr(sock: std::os::unix::io::RawFd, ifreq: &mut libc::ifreq, request: u64) -> Option<Ipv4Addr> {
    if unsafe { libc::ioctl(sock, request, ifreq as *mut libc::ifreq) } < 0 {
        return None;
    }
    let sockaddr = unsafe { ifreq.ifr_ifru.ifru_addr };
    if sockaddr.sa_family as i32 != libc::AF_INET {
        return None;
    }
    let sockaddr_in: libc::sockaddr_in = unsafe { std::ptr::read(&sockaddr as *const _ as *const libc::sockaddr_in) };
    Some(Ipv4Addr::from(u32::from_be(sockaddr_in.sin_addr.s_addr)))
}

#[cfg(target_os = "linux")]
struct CloseGuard {
    fd: std::os::unix::io::RawFd,
}

#[cfg(target_os = "linux")]
impl Drop for CloseGuard {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(target_os = "linux")]
fn scopeguard_close(fd: std::os::unix::io::RawFd) -> CloseGuard {
    CloseGuard { fd }
}

impl Device for TunDevice {
    type RxToken<'a> = TunRxToken;
    type TxToken<'a> = TunTxToken<'a>;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let packet = self.read_one()?;
        Some((TunRxToken { buffer: packet }, TunTxToken { file: &mut self.file }))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        Some(TunTxToken { file: &mut self.file })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = self.mtu;
        caps.medium = Medium::Ip;
        caps
    }
}

pub struct TunRxToken {
    buffer: Vec<u8>,
}

impl RxToken for TunRxToken {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buffer = self.buffer;
        f(&mut buffer)
    }
}

pub struct TunTxToken<'a> {
    file: &'a mut File,
}

impl<'a> TxToken for TunTxToken<'a> {
    /// Serializes into a contiguous buffer and writes it whole. A short
    /// write is logged as an error; it is not retried because the TCP
    /// layer will retransmit.
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut frame = vec![0u8; len];
        let result = f(&mut frame);
        match self.file.write(&frame) {
            Ok(n) if n == frame.len() => {}
            Ok(n) => logger::error(format!("short TUN write ({n} of {} bytes)", frame.len())),
            Err(e) => logger::error(format!("TUN write failed: {e}")),
        }
        result
    }
}
