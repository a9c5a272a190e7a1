//! Kernel TUN driver speaking to `/dev/net/tun`.

use std::ffi::CStr;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::ioctl;
use crate::{Device, Driver, Error, Prefix, Result, Sys};

const TUN_FILE: &CStr = c"/dev/net/tun";
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

/// Driver for the kernel's TUN character device.
pub struct TunDriver;

impl Driver for TunDriver {
    fn name(&self) -> &str {
        "tun"
    }

    fn open(&self, name: &str) -> Result<Box<dyn Device>> {
        Ok(Box::new(Tun::open(name)?))
    }
}

/// An open kernel TUN device.
///
/// The device carries no internal locking: one thread may read while
/// another writes, but concurrent readers (or concurrent writers) race
/// each other on the packet stream.
#[derive(Debug)]
pub struct Tun {
    fd: OwnedFd,
    name: String,
}

impl Tun {
    fn open(name: &str) -> Result<Self> {
        let mut req = ioctl::Request::new(name)?;
        req.set_flags((libc::IFF_TUN | libc::IFF_NO_PI) as u16);

        let fd = match unsafe { libc::open(TUN_FILE.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) } {
            -1 => return Err(Error::os("open /dev/net/tun")),
            fd => unsafe { OwnedFd::from_raw_fd(fd) },
        };

        unsafe { ioctl::exec(fd.as_raw_fd(), TUNSETIFF, &mut req) }
            .map_err(|source| Error::Os {
                op: "TUNSETIFF",
                source,
            })?;

        // The kernel rewrites the name field with the name it actually
        // assigned (relevant when `name` was empty).
        let name = req.name().into_owned();
        tracing::debug!(%name, "Created TUN device");

        Ok(Self { fd, name })
    }
}

impl Device for Tun {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match read(self.fd.as_raw_fd(), buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait(self.fd.as_raw_fd(), libc::POLLIN)?;
                }
                res => return res,
            }
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match write(self.fd.as_raw_fd(), buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait(self.fd.as_raw_fd(), libc::POLLOUT)?;
                }
                res => return res,
            }
        }
    }

    fn set_ip_addresses(&self, prefixes: &[Prefix]) -> Result<()> {
        let (addr, prefix_len) = crate::single_ipv4(prefixes)?;

        // The socket never carries data; it only gives the interface
        // ioctls a protocol family to act on.
        let socket =
            match unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_IP) } {
                -1 => return Err(Error::os("socket")),
                fd => unsafe { OwnedFd::from_raw_fd(fd) },
            };
        let sock_fd = socket.as_raw_fd();

        let mut req = ioctl::Request::new(&self.name)?;
        req.set_ipv4_addr(addr);
        unsafe { ioctl::exec(sock_fd, libc::SIOCSIFADDR, &mut req) }.map_err(|source| {
            Error::Os {
                op: "SIOCSIFADDR",
                source,
            }
        })?;

        // Same record, address field reinterpreted as the netmask.
        req.set_ipv4_addr(ioctl::netmask(prefix_len));
        unsafe { ioctl::exec(sock_fd, libc::SIOCSIFNETMASK, &mut req) }.map_err(|source| {
            Error::Os {
                op: "SIOCSIFNETMASK",
                source,
            }
        })?;

        let mut req = ioctl::Request::new(&self.name)?;
        req.set_flags(libc::IFF_UP as u16);
        unsafe { ioctl::exec(sock_fd, libc::SIOCSIFFLAGS, &mut req) }.map_err(|source| {
            Error::Os {
                op: "SIOCSIFFLAGS",
                source,
            }
        })?;

        tracing::debug!(name = %self.name, %addr, %prefix_len, "Assigned interface address");

        Ok(())
    }

    fn sys(&self) -> Sys {
        Sys::Fd(self.fd.as_raw_fd())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let fd = self.fd.into_raw_fd();

        match unsafe { libc::close(fd) } {
            -1 => Err(Error::os("close")),
            _ => Ok(()),
        }
    }
}

/// Blocks until the file descriptor is ready for `events`.
fn wait(fd: RawFd, events: libc::c_short) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    // Safety: `pollfd` points at exactly one entry.
    match unsafe { libc::poll(&mut pollfd, 1, -1) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Read from the given file descriptor in the buffer.
fn read(fd: RawFd, dst: &mut [u8]) -> io::Result<usize> {
    // Safety: Within this module, the file descriptor is always valid.
    match unsafe { libc::read(fd, dst.as_mut_ptr() as _, dst.len()) } {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}

/// Write the buffer to the given file descriptor.
fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // Safety: Within this module, the file descriptor is always valid.
    match unsafe { libc::write(fd, buf.as_ptr() as _, buf.len() as _) } {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}
