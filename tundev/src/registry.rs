use std::sync::Arc;

use crate::{Device, Error, Result};

/// A platform driver that can open tunnel devices.
pub trait Driver: Send + Sync {
    /// Short driver identifier, e.g. `"tun"` or `"wintun"`.
    fn name(&self) -> &str;

    /// Creates or attaches the named device.
    fn open(&self, name: &str) -> Result<Box<dyn Device>>;
}

/// The collection of drivers available to a process.
///
/// Built once at startup and then only read; registration order is
/// dispatch priority.
#[derive(Default)]
pub struct Registry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the driver for the compiled platform.
    pub fn with_platform_drivers() -> Self {
        #[cfg_attr(not(any(target_os = "linux", windows)), allow(unused_mut))]
        let mut registry = Self::new();

        #[cfg(target_os = "linux")]
        registry.register(Arc::new(crate::TunDriver));
        #[cfg(windows)]
        registry.register(Arc::new(crate::WintunDriver));

        registry
    }

    /// Appends a driver; earlier registrations are tried first.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.push(driver);
    }

    /// The registered drivers, in dispatch order.
    pub fn drivers(&self) -> &[Arc<dyn Driver>] {
        &self.drivers
    }

    /// Opens `name` with the first driver that succeeds.
    ///
    /// Drivers are tried in registration order; if every driver fails the
    /// last error is returned.
    pub fn open(&self, name: &str) -> Result<Box<dyn Device>> {
        let mut last_error = Error::NoDriver;

        for driver in &self.drivers {
            match driver.open(name) {
                Ok(device) => return Ok(device),
                Err(e) => {
                    tracing::debug!(driver = driver.name(), "Failed to open device: {e}");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{Prefix, Sys};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    struct StubDriver {
        name: &'static str,
        works: bool,
    }

    impl Driver for StubDriver {
        fn name(&self) -> &str {
            self.name
        }

        fn open(&self, name: &str) -> Result<Box<dyn Device>> {
            if !self.works {
                return Err(Error::Os {
                    op: "stub open",
                    source: io::Error::from(io::ErrorKind::NotFound),
                });
            }

            Ok(Box::new(StubDevice {
                name: format!("{}:{name}", self.name),
                inbound: Mutex::new(VecDeque::new()),
            }))
        }
    }

    /// In-memory device; reads pop injected packets, writes loop them back.
    struct StubDevice {
        name: String,
        inbound: Mutex<VecDeque<Vec<u8>>>,
    }

    impl Device for StubDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let pkt = self
                .inbound
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(io::ErrorKind::WouldBlock)?;
            let n = pkt.len().min(buf.len());
            buf[..n].copy_from_slice(&pkt[..n]);

            Ok(n)
        }

        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            self.inbound.lock().unwrap().push_back(buf.to_vec());

            Ok(buf.len())
        }

        fn set_ip_addresses(&self, prefixes: &[Prefix]) -> Result<()> {
            crate::single_ipv4(prefixes)?;

            Ok(())
        }

        fn sys(&self) -> Sys {
            #[cfg(unix)]
            let sys = Sys::Fd(-1);
            #[cfg(windows)]
            let sys = Sys::Luid(0);

            sys
        }

        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn open_on_empty_registry_fails() {
        let registry = Registry::new();

        assert!(matches!(registry.open("tun0"), Err(Error::NoDriver)));
    }

    #[test]
    fn registration_order_is_dispatch_priority() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver {
            name: "first",
            works: true,
        }));
        registry.register(Arc::new(StubDriver {
            name: "second",
            works: true,
        }));

        let device = registry.open("tun0").unwrap();

        assert_eq!(device.name(), "first:tun0");
    }

    #[test]
    fn open_falls_through_to_the_next_driver() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver {
            name: "broken",
            works: false,
        }));
        registry.register(Arc::new(StubDriver {
            name: "working",
            works: true,
        }));

        let device = registry.open("tun0").unwrap();

        assert_eq!(device.name(), "working:tun0");
    }

    #[test]
    fn open_reports_the_last_error_when_all_drivers_fail() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver {
            name: "broken",
            works: false,
        }));

        assert!(matches!(
            registry.open("tun0"),
            Err(Error::Os { op: "stub open", .. })
        ));
    }

    #[test]
    fn drivers_lists_in_registration_order() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver {
            name: "a",
            works: true,
        }));
        registry.register(Arc::new(StubDriver {
            name: "b",
            works: true,
        }));

        let names = registry
            .drivers()
            .iter()
            .map(|d| d.name())
            .collect::<Vec<_>>();

        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn stub_round_trip_truncates_to_the_reader_buffer() {
        let driver = StubDriver {
            name: "stub",
            works: true,
        };
        let device = driver.open("tun0").unwrap();

        device.write(b"hello world").unwrap();

        let mut buf = [0u8; 5];
        let n = device.read(&mut buf).unwrap();

        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn stub_validates_addresses_without_side_effects() {
        let driver = StubDriver {
            name: "stub",
            works: true,
        };
        let device = driver.open("tun0").unwrap();

        let v4 = "10.0.0.1/8".parse::<Prefix>().unwrap();
        let v6 = "fd00::1/64".parse::<Prefix>().unwrap();

        assert!(matches!(
            device.set_ip_addresses(&[v4, v4]),
            Err(Error::AddressCount(2))
        ));
        assert!(matches!(
            device.set_ip_addresses(&[v6]),
            Err(Error::Ipv4Only)
        ));
        assert!(device.set_ip_addresses(&[v4]).is_ok());
    }
}
