use std::io;

use thiserror::Error;

/// Unified result type for device and registry operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// `Registry::open` was called without any registered driver.
    #[error("no tunnel driver is registered")]
    NoDriver,
    /// Address configuration requires exactly one prefix.
    #[error("expected exactly 1 address, got {0}")]
    AddressCount(usize),
    /// Address configuration only supports IPv4.
    #[error("only IPv4 addresses are supported")]
    Ipv4Only,
    /// A prefix length exceeded what its address family allows.
    #[error("prefix length {len} exceeds maximum of {max}")]
    PrefixLength { len: u8, max: u8 },
    /// A prefix string was not of the form `<address>/<length>`.
    #[error("invalid prefix, expected <address>/<length>")]
    PrefixSyntax,
    /// An interface name does not fit the platform's fixed-width name field.
    #[error("interface name longer than {max} bytes")]
    NameTooLong { max: usize },
    /// A system or control call failed.
    #[error("{op} failed")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Creating a Wintun adapter requires an elevated process.
    #[cfg(windows)]
    #[error("process is not running with elevated privileges")]
    NotElevated,
    #[cfg(windows)]
    #[error("failed to load wintun.dll: {0}")]
    DllLoad(String),
    #[cfg(windows)]
    #[error(transparent)]
    Wintun(#[from] wintun::Error),
    #[cfg(windows)]
    #[error(transparent)]
    Windows(#[from] windows::core::Error),
}

impl Error {
    /// Wraps the calling thread's last OS error under the given operation.
    #[cfg(target_os = "linux")]
    pub(crate) fn os(op: &'static str) -> Self {
        Self::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }
}
