//! Port driver seam.
//!
//! The Link Manager never talks to `serialport` directly. It goes through
//! `PortDriver`, so tests can hand it scripted in-memory links and the
//! binary hands it `SystemPorts`.

use serde::Serialize;
use std::io::{self, Read, Write};
use std::time::Duration;

/// One enumerated device port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub device: String,
    pub description: String,
    pub manufacturer: Option<String>,
}

/// An open, bidirectional byte link.
pub trait SerialLink: Read + Write + Send {
    /// Bytes waiting in the receive buffer.
    fn bytes_available(&self) -> io::Result<u32>;

    /// Second handle onto the same link, used for reading without holding
    /// the manager's lock.
    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>>;
}

pub trait PortDriver: Send + Sync + 'static {
    fn open(&self, path: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<Box<dyn SerialLink>>;

    fn available_ports(&self) -> io::Result<Vec<PortInfo>>;
}

/// `PortDriver` over the host's serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortDriver for SystemPorts {
    fn open(&self, path: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let port = serialport::new(path, baud_rate).timeout(read_timeout).open()?;
        Ok(Box::new(SystemLink(port)))
    }

    fn available_ports(&self) -> io::Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(describe).collect())
    }
}

fn describe(info: serialport::SerialPortInfo) -> PortInfo {
    use serialport::SerialPortType;

    let (description, manufacturer) = match info.port_type {
        SerialPortType::UsbPort(usb) => {
            let description = usb
                .product
                .clone()
                .or_else(|| usb.manufacturer.clone())
                .unwrap_or_else(|| format!("USB Serial {:04x}:{:04x}", usb.vid, usb.pid));
            (description, usb.manufacturer)
        }
        SerialPortType::PciPort => ("PCI serial port".to_owned(), None),
        SerialPortType::BluetoothPort => ("Bluetooth serial port".to_owned(), None),
        SerialPortType::Unknown => ("n/a".to_owned(), None),
    };
    PortInfo { device: info.port_name, description, manufacturer }
}

struct SystemLink(Box<dyn serialport::SerialPort>);

impl Read for SystemLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SystemLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SerialLink for SystemLink {
    fn bytes_available(&self) -> io::Result<u32> {
        Ok(self.0.bytes_to_read()?)
    }

    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(SystemLink(self.0.try_clone()?)))
    }
}
