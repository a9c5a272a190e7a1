//! Wintun vendor driver.
//!
//! Adapters are created through the vendor DLL and exchange packets over a
//! session ring. One mutex serialises every operation on a handle: a write
//! waits for a blocked read and vice versa, so callers that need overlap
//! between inbound and outbound traffic should not share one handle across
//! threads.

use std::io;
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::NetworkManagement::IpHelper::{
    CreateUnicastIpAddressEntry, InitializeUnicastIpAddressEntry, MIB_UNICASTIPADDRESS_ROW,
};
use windows::Win32::NetworkManagement::Ndis::NET_LUID_LH;
use windows::Win32::Networking::WinSock::{AF_INET, AF_INET6};
use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};
use wintun::Adapter;

use crate::{Device, Driver, Error, Prefix, Result, Sys, identity};

/// The vendor-visible tunnel type tag for adapters created here.
const TUNNEL_TYPE: &str = "Wintun";

/// Ring capacity for the packet session.
///
/// Must be a power of two within the vendor's accepted range; 0x40_0000 is
/// 4 MiB of buffered packets in each direction.
const RING_CAPACITY: u32 = 0x40_0000;

/// `ERROR_OBJECT_ALREADY_EXISTS` as an HRESULT.
const OBJECT_EXISTS: windows::core::HRESULT = windows::core::HRESULT(0x8007_1392_u32 as i32);

/// Registry key holding the per-adapter network connection settings.
const NET_CONFIG_KEY: &str =
    r"SYSTEM\CurrentControlSet\Control\Network\{4D36E972-E325-11CE-BFC1-08002BE10318}";

/// Driver for vendor-managed Wintun adapters.
pub struct WintunDriver;

impl Driver for WintunDriver {
    fn name(&self) -> &str {
        "wintun"
    }

    fn open(&self, name: &str) -> Result<Box<dyn Device>> {
        Ok(Box::new(Tun::open(name)?))
    }
}

/// An open Wintun adapter with a running packet session.
pub struct Tun {
    name: String,
    luid: u64,
    /// Serialises all reads, writes and teardown on this handle.
    state: Mutex<Option<TunState>>,
}

/// Dropped session-first, so the adapter outlives its ring.
struct TunState {
    session: wintun::Session,
    adapter: Arc<Adapter>,
}

impl Tun {
    fn open(name: &str) -> Result<Self> {
        if !elevated()? {
            return Err(Error::NotElevated);
        }

        let guid = identity::adapter_guid(name);

        // Safety: we are loading the vendor DLL from the default search
        // path and it contains arbitrary C code.
        let wintun = unsafe { wintun::load() }.map_err(|e| Error::DllLoad(e.to_string()))?;

        let adapter = Adapter::create(&wintun, name, TUNNEL_TYPE, Some(guid.as_u128()))?;
        // Safety: both variants of the LUID union are the same 64-bit
        // value.
        let luid = unsafe { adapter.get_luid().Value };

        // On failure the adapter is dropped, and with it the OS object.
        let session = adapter.start_session(RING_CAPACITY)?;
        tracing::debug!(%name, %guid, "Created Wintun adapter");

        Ok(Self {
            name: name.to_owned(),
            luid,
            state: Mutex::new(Some(TunState { session, adapter })),
        })
    }
}

impl Device for Tun {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or_else(closed)?;

        // Blocks on the session's read-wait event until a packet arrives;
        // the vendor's "no more items" status is retried internally and
        // never surfaces.
        let pkt = match state.session.receive_blocking() {
            Ok(pkt) => pkt,
            Err(wintun::Error::ShuttingDown) => return Err(closed()),
            Err(e) => return Err(io::Error::other(e)),
        };

        let bytes = pkt.bytes();
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);

        // Dropping `pkt` releases its slot back to the ring.
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or_else(closed)?;

        let len = buf
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "packet too large"))?;

        let mut pkt = state
            .session
            .allocate_send_packet(len)
            .map_err(io::Error::other)?;
        pkt.bytes_mut().copy_from_slice(buf);
        // Cannot fail once the ring slot is allocated.
        state.session.send_packet(pkt);

        Ok(buf.len())
    }

    /// Delegates to the OS address facility for the adapter's LUID.
    ///
    /// Unlike the Linux driver this does not re-validate the
    /// single-IPv4-prefix rule; callers should not rely on the asymmetry.
    fn set_ip_addresses(&self, prefixes: &[Prefix]) -> Result<()> {
        for prefix in prefixes {
            set_unicast_entry(self.luid, *prefix)?;
        }

        Ok(())
    }

    fn sys(&self) -> Sys {
        Sys::Luid(self.luid)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Some(state) = self.state.lock().take() else {
            return Ok(());
        };

        state.session.shutdown()?;
        drop(state); // ends the session, then closes the adapter

        tracing::debug!(name = %self.name, "Closed Wintun adapter");

        Ok(())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "device is closed")
}

/// Creates one unicast address row for the adapter.
fn set_unicast_entry(luid: u64, prefix: Prefix) -> Result<()> {
    // Safety: the docs only require `InitializeUnicastIpAddressEntry`
    // before the row is used.
    let mut row = unsafe {
        let mut row: MIB_UNICASTIPADDRESS_ROW = std::mem::zeroed();
        InitializeUnicastIpAddressEntry(&mut row);
        row
    };

    row.InterfaceLuid = NET_LUID_LH { Value: luid };
    row.OnLinkPrefixLength = prefix.bits();
    row.ValidLifetime = 0xffff_ffff; // Infinite

    match prefix.addr() {
        IpAddr::V4(ipv4) => {
            row.Address.si_family = AF_INET;
            row.Address.Ipv4 = SocketAddrV4::new(ipv4, 0).into();
        }
        IpAddr::V6(ipv6) => {
            row.Address.si_family = AF_INET6;
            row.Address.Ipv6 = SocketAddrV6::new(ipv6, 0, 0, 0).into();
        }
    }

    // Safety: Windows does not hold on to the row beyond the call.
    match unsafe { CreateUnicastIpAddressEntry(&row) }.ok() {
        Ok(()) => Ok(()),
        Err(e) if e.code() == OBJECT_EXISTS => Ok(()), // same address assigned twice
        Err(e) => Err(Error::Windows(e)),
    }
}

/// Whether the current process token carries elevation.
fn elevated() -> Result<bool> {
    ProcessToken::open()?.is_elevated()
}

struct ProcessToken {
    inner: HANDLE,
}

impl ProcessToken {
    fn open() -> Result<Self> {
        // Safety: `GetCurrentProcess` returns a pseudo-handle that does
        // not need to be closed.
        let process = unsafe { GetCurrentProcess() };
        let mut inner = HANDLE::default();

        // Safety: `inner` is a freshly created handle for the call to
        // fill.
        unsafe { OpenProcessToken(process, TOKEN_QUERY, &mut inner) }?;

        Ok(Self { inner })
    }

    fn is_elevated(&self) -> Result<bool> {
        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;

        // Safety: the output buffer is sized for the hard-coded
        // information class.
        unsafe {
            GetTokenInformation(
                self.inner,
                TokenElevation,
                Some(&mut elevation as *mut _ as *mut std::ffi::c_void),
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            )
        }?;

        Ok(elevation.TokenIsElevated == 1)
    }
}

impl Drop for ProcessToken {
    fn drop(&mut self) {
        // Safety: `inner` came from `OpenProcessToken` and is closed
        // exactly once.
        let _ = unsafe { CloseHandle(self.inner) };
    }
}

/// Writes the adapter's friendly name under the network connection key.
///
/// Adapter creation leaves the vendor-assigned connection name in place;
/// callers that want the interface listed under their own name in the
/// network control panel can set it here. Not invoked by `open`.
pub fn set_adapter_display_name(guid: &Uuid, name: &str) -> Result<()> {
    use winreg::RegKey;
    use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_QUERY_VALUE, KEY_SET_VALUE};

    let path = format!(r"{NET_CONFIG_KEY}\{{{guid}}}\Connection");
    let key = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey_with_flags(&path, KEY_QUERY_VALUE | KEY_SET_VALUE)
        .map_err(|source| Error::Os {
            op: "open network connection registry key",
            source,
        })?;

    key.set_value("Name", &name).map_err(|source| Error::Os {
        op: "set adapter connection name",
        source,
    })
}
