#![allow(clippy::unwrap_used)]
#![cfg(target_os = "linux")]

use std::net::UdpSocket;
use std::sync::mpsc;
use std::time::Duration;

use tundev::Registry;

// Opens a TUN device, assigns `192.168.42.2/24` and checks that a UDP
// datagram routed towards the far end of the link comes back out of
// `read` as a raw IP packet.
#[test]
#[ignore = "Needs CAP_NET_ADMIN"]
fn udp_round_trip() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let registry = Registry::with_platform_drivers();
    let tun = registry.open("tun0").unwrap();
    assert_eq!(tun.name(), "tun0");

    tun.set_ip_addresses(&["192.168.42.2/24".parse().unwrap()])
        .unwrap();

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = [0u8; 65536];
        loop {
            let n = tun.read(&mut buf).unwrap();
            tracing::debug!("Read {n} byte packet");

            if buf[..n].windows(5).any(|w| w == b"hello") {
                tx.send(()).unwrap();
                break;
            }
        }
    });

    // Sending from the interface's own address to another address inside
    // the prefix routes the datagram into the TUN device.
    let socket = UdpSocket::bind("192.168.42.2:1234").unwrap();
    socket.send_to(b"hello", "192.168.42.1:1234").unwrap();

    rx.recv_timeout(Duration::from_secs(10)).unwrap();
}
