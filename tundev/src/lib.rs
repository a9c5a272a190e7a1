//! Control plane for virtual point-to-point tunnel devices.
//!
//! A tunnel device is a virtual network interface that exchanges raw IP
//! packets with user space instead of a physical link. This crate creates
//! and operates such devices behind one interface: a [`Registry`] resolves
//! an open request to a platform [`Driver`], which returns a boxed
//! [`Device`] for packet I/O and address assignment.
//!
//! Two drivers are compiled in: on Linux, `TunDriver` speaks to the
//! kernel's `/dev/net/tun` character device; on Windows, `WintunDriver`
//! manages a Wintun adapter and its packet session.

pub use error::{Error, Result};
pub use registry::{Driver, Registry};

#[cfg(target_os = "linux")]
pub use tun_linux::TunDriver;
#[cfg(windows)]
pub use tun_windows::{WintunDriver, set_adapter_display_name};

mod error;
pub mod identity;
#[cfg(target_os = "linux")]
pub mod ioctl;
mod registry;
#[cfg(target_os = "linux")]
mod tun_linux;
#[cfg(windows)]
mod tun_windows;

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::str::FromStr;

/// An open tunnel device.
///
/// Each `read` returns at most one packet, truncated if the buffer is
/// smaller than the packet; each `write` submits exactly one packet. No
/// buffering or framing is added on either path.
///
/// Concurrency differs per platform: the Linux device carries no lock and
/// supports one concurrent reader plus one concurrent writer, while the
/// Windows device serialises all I/O on a handle behind a single lock, so
/// inbound and outbound traffic on one handle never overlap.
pub trait Device: Send + Sync {
    /// The canonical name of the interface.
    fn name(&self) -> &str;

    /// Receives one packet into `buf`, blocking until one is available.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Sends one packet.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Assigns the interface's single IPv4 prefix and brings it up.
    fn set_ip_addresses(&self, prefixes: &[Prefix]) -> Result<()>;

    /// Escape hatch to the underlying platform handle.
    fn sys(&self) -> Sys;

    /// Releases the underlying kernel / vendor resources.
    ///
    /// Dropping the device has the same effect; `close` exists so callers
    /// can observe teardown errors. Taking the handle by value means the
    /// resources are released exactly once and no other thread can still
    /// be blocked in `read` when they go away.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Raw platform handle behind a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sys {
    /// File descriptor of the tunnel character device.
    #[cfg(unix)]
    Fd(std::os::fd::RawFd),
    /// LUID of the Wintun adapter.
    #[cfg(windows)]
    Luid(u64),
}

/// An IP address together with its network prefix length.
///
/// Unlike a CIDR network, the address keeps its host bits:
/// `192.168.42.2/24` names the interface address `.2` within a `/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        if len > max {
            return Err(Error::PrefixLength { len, max });
        }

        Ok(Self { addr, len })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The number of leading bits that make up the network portion.
    pub fn bits(&self) -> u8 {
        self.len
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = s.split_once('/').ok_or(Error::PrefixSyntax)?;
        let addr = addr.parse::<IpAddr>().map_err(|_| Error::PrefixSyntax)?;
        let len = len.parse::<u8>().map_err(|_| Error::PrefixSyntax)?;

        Self::new(addr, len)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

/// Validates the single-IPv4-prefix rule for address configuration.
///
/// Runs before any system call so that caller misuse has no side effects.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn single_ipv4(prefixes: &[Prefix]) -> Result<(std::net::Ipv4Addr, u8)> {
    let [prefix] = prefixes else {
        return Err(Error::AddressCount(prefixes.len()));
    };

    match prefix.addr() {
        IpAddr::V4(addr) => Ok((addr, prefix.bits())),
        IpAddr::V6(_) => Err(Error::Ipv4Only),
    }
}
