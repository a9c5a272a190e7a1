//! Fixed-layout control records for the kernel's interface ioctls.
//!
//! The kernel addresses these requests by interface name and interprets
//! the rest of the record according to the request code. The layout is an
//! explicit byte array with named offsets, so ABI compatibility is visible
//! and testable instead of implied by structure-layout rules.

use std::borrow::Cow;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;

use crate::{Error, Result};

/// Size of the interface name field, including its NUL terminator.
pub const IF_NAMESIZE: usize = libc::IF_NAMESIZE;

/// Total size of every interface request record: the 16-byte name field
/// followed by the kernel's 24-byte request-specific union.
pub const IFREQ_LEN: usize = 40;

const NAME_OFF: usize = 0;
/// Offset of the 16-bit flags word (`TUNSETIFF`, `SIOCSIFFLAGS`).
const FLAGS_OFF: usize = IF_NAMESIZE;
/// Offsets of the embedded IPv4 socket address (`SIOCSIFADDR`,
/// `SIOCSIFNETMASK`): a 2-byte family tag and a 2-byte port precede the
/// four address octets.
const SA_FAMILY_OFF: usize = IF_NAMESIZE;
const SA_ADDR_OFF: usize = IF_NAMESIZE + 4;

/// One interface control request, addressed by interface name.
pub struct Request([u8; IFREQ_LEN]);

impl Request {
    /// Creates a zeroed request for `name`.
    ///
    /// The name is NUL-padded into the fixed-width field; a name that
    /// leaves no room for the terminator is rejected rather than silently
    /// truncated.
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() >= IF_NAMESIZE {
            return Err(Error::NameTooLong {
                max: IF_NAMESIZE - 1,
            });
        }

        let mut buf = [0u8; IFREQ_LEN];
        buf[NAME_OFF..NAME_OFF + bytes.len()].copy_from_slice(bytes);

        Ok(Self(buf))
    }

    /// The interface name, with trailing NUL padding removed.
    ///
    /// The kernel may rewrite this field with the name it actually
    /// assigned.
    pub fn name(&self) -> Cow<'_, str> {
        let field = &self.0[NAME_OFF..NAME_OFF + IF_NAMESIZE];
        let len = field.iter().position(|&b| b == 0).unwrap_or(IF_NAMESIZE);

        String::from_utf8_lossy(&field[..len])
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.0[FLAGS_OFF..FLAGS_OFF + 2].copy_from_slice(&flags.to_ne_bytes());
    }

    pub fn flags(&self) -> u16 {
        u16::from_ne_bytes([self.0[FLAGS_OFF], self.0[FLAGS_OFF + 1]])
    }

    /// Writes an `AF_INET` socket address record into the payload.
    pub fn set_ipv4_addr(&mut self, addr: Ipv4Addr) {
        self.0[SA_FAMILY_OFF..SA_FAMILY_OFF + 2]
            .copy_from_slice(&(libc::AF_INET as u16).to_ne_bytes());
        self.0[SA_ADDR_OFF..SA_ADDR_OFF + 4].copy_from_slice(&addr.octets());
    }

    pub fn ipv4_addr(&self) -> Ipv4Addr {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&self.0[SA_ADDR_OFF..SA_ADDR_OFF + 4]);

        Ipv4Addr::from(octets)
    }

    fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.0.as_mut_ptr().cast()
    }
}

/// Executes an ioctl on the given file descriptor with the provided
/// request.
///
/// # Safety
///
/// The file descriptor must be open, and `code` must be a request that
/// reads and writes at most [`IFREQ_LEN`] bytes.
pub unsafe fn exec(fd: RawFd, code: libc::c_ulong, req: &mut Request) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, code as _, req.as_mut_ptr()) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Left-aligned IPv4 netmask with `prefix_len` leading one-bits.
pub fn netmask(prefix_len: u8) -> Ipv4Addr {
    debug_assert!(prefix_len <= 32);

    let mask = u32::MAX
        .checked_shl(32 - u32::from(prefix_len))
        .unwrap_or(0);

    Ipv4Addr::from(mask)
}
