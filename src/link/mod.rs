//! Serial link: port seam, lifecycle manager and line reader.

pub mod manager;
pub mod port;
pub mod reader;

pub use manager::{LinkError, LinkManager, LinkSession, LinkStatus};
pub use port::{PortDriver, PortInfo, SerialLink, SystemPorts};
pub use reader::{LineReader, SignalReport};
