// tests/link_tests.rs

//! Link manager behaviour against enumerated fake ports: preferred port,
//! vendor-hint fallback, failure bookkeeping and downstream directives.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{fast_config, FakePorts};
use fireguard::link::{LinkError, LinkManager};

fn manager(ports: &FakePorts, preferred: &str) -> LinkManager {
    LinkManager::new(ports.clone(), fast_config(preferred).link)
}

#[test]
fn preferred_port_wins_when_it_opens() {
    let ports = FakePorts::new();
    ports.openable("/dev/preferred").openable("/dev/ttyUSB0").enumerate("/dev/ttyUSB0", "Arduino Uno");
    let link = manager(&ports, "/dev/preferred");

    assert_eq!(link.connect("/dev/preferred").unwrap(), "/dev/preferred");
    assert!(link.is_connected());
    assert_eq!(ports.opens(), vec!["/dev/preferred".to_string()]);
}

#[test]
fn fallback_picks_first_port_matching_a_vendor_hint() {
    let ports = FakePorts::new();
    ports
        .enumerate("/dev/ttyS0", "PCI serial port")
        .enumerate("/dev/ttyUSB3", "USB Serial 1a86:7523")
        .openable("/dev/ttyUSB3");
    let link = manager(&ports, "/dev/missing");

    assert_eq!(link.connect("/dev/missing").unwrap(), "/dev/ttyUSB3");
    let status = link.status();
    assert!(status.connected);
    assert_eq!(status.port.as_deref(), Some("/dev/ttyUSB3"));
    assert_eq!(status.baud_rate, 230_400);
    assert_eq!(status.available_ports.len(), 2);
}

#[test]
fn no_matching_port_is_unavailable() {
    let ports = FakePorts::new();
    ports.enumerate("/dev/ttyS0", "PCI serial port");
    // Matches a hint but is the preferred device that just failed to open.
    ports.enumerate("/dev/missing", "Arduino Mega");
    let link = manager(&ports, "/dev/missing");

    let err = link.connect("/dev/missing").unwrap_err();
    assert!(matches!(err, LinkError::Unavailable { ref preferred, .. } if preferred == "/dev/missing"));
    assert!(!link.is_connected());
    assert!(ports.opens().is_empty());
}

#[test]
fn fallback_skips_the_failed_preferred_device() {
    let ports = FakePorts::new();
    ports
        .enumerate("/dev/missing", "Arduino Mega")
        .enumerate("/dev/ttyUSB1", "CH340 serial converter")
        .openable("/dev/ttyUSB1");
    let link = manager(&ports, "/dev/missing");

    assert_eq!(link.connect("/dev/missing").unwrap(), "/dev/ttyUSB1");
    assert_eq!(link.discover().map(|p| p.device).as_deref(), Some("/dev/missing"));
}

#[test]
fn generation_moves_on_every_connect_and_close() {
    let ports = FakePorts::new();
    ports.openable("/dev/a");
    let link = manager(&ports, "/dev/a");

    let g0 = link.generation();
    link.connect("/dev/a").unwrap();
    let g1 = link.generation();
    assert!(g1 > g0);

    let session = link.open_session().unwrap();
    assert_eq!(session.generation, g1);
    assert_eq!(session.port, "/dev/a");

    link.close();
    assert!(link.generation() > g1);
    assert!(matches!(link.open_session(), Err(LinkError::NotConnected)));
}

#[test]
fn stale_failure_report_does_not_drop_a_newer_link() {
    let ports = FakePorts::new();
    ports.openable("/dev/a");
    let link = manager(&ports, "/dev/a");

    link.connect("/dev/a").unwrap();
    let stale = link.generation();
    link.reconnect().unwrap();

    link.mark_failed(stale);
    assert!(link.is_connected());

    link.mark_failed(link.generation());
    assert!(!link.is_connected());
}

#[test]
fn concurrent_reconnects_leave_one_open_link() {
    let ports = FakePorts::new();
    ports.openable("/dev/a");
    let link = Arc::new(manager(&ports, "/dev/a"));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let link = link.clone();
            thread::spawn(move || link.reconnect().is_ok())
        })
        .collect();
    for w in workers {
        assert!(w.join().unwrap());
    }

    assert!(link.is_connected());
    assert_eq!(ports.opens().len(), 4);
    assert_eq!(link.status().port.as_deref(), Some("/dev/a"));
}

#[test]
fn directives_need_an_open_link() {
    let ports = FakePorts::new();
    ports.openable("/dev/a");
    let link = manager(&ports, "/dev/a");

    assert!(matches!(link.send_directive("RESET"), Err(LinkError::NotConnected)));

    link.connect("/dev/a").unwrap();
    link.send_directive("RESET").unwrap();
    assert_eq!(ports.written(), "RESET\n");
}

#[test]
fn stale_reconnect_keeps_a_link_someone_else_reopened() {
    let ports = FakePorts::new();
    ports.openable("/dev/a");
    let link = manager(&ports, "/dev/a");

    link.connect("/dev/a").unwrap();
    let lost_at = link.generation();
    link.reconnect().unwrap();

    assert_eq!(link.reconnect_if_stale(lost_at).unwrap(), None);
    assert_eq!(ports.opens().len(), 2);

    link.mark_failed(link.generation());
    let lost_at = link.generation();
    assert_eq!(link.reconnect_if_stale(lost_at).unwrap().as_deref(), Some("/dev/a"));
    assert_eq!(ports.opens().len(), 3);
}

#[test]
fn slow_directive_write_does_not_block_status() {
    let ports = FakePorts::new();
    ports.openable("/dev/a").stall_writes(Duration::from_millis(400));
    let link = Arc::new(manager(&ports, "/dev/a"));
    link.connect("/dev/a").unwrap();

    let writer = {
        let link = link.clone();
        thread::spawn(move || link.send_directive("RESET"))
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let status = link.status();
    let _ = link.generation();
    assert!(status.connected);
    assert!(started.elapsed() < Duration::from_millis(200), "status waited {:?}", started.elapsed());

    writer.join().unwrap().unwrap();
    assert_eq!(ports.written(), "RESET\n");
}
