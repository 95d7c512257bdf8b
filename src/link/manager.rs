//! Link lifecycle: connect with vendor-hint fallback, close, reconnect, status.
//!
//! The manager owns the single open handle. Readers get their own cloned
//! handle tagged with a generation number; every connect or close bumps the
//! generation, which is how the pipeline learns that the link it is
//! reading from was replaced by another thread.

use crate::config::LinkConfig;
use crate::guard_log;
use crate::link::port::{PortDriver, PortInfo, SerialLink};
use log::Level;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("no device available (preferred {preferred} failed, no port matched {hints:?})")]
    Unavailable { preferred: String, hints: Vec<String> },

    #[error("link not connected")]
    NotConnected,

    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The open link as the manager holds it.
struct ConnectionHandle {
    port: String,
    baud_rate: u32,
    link: Box<dyn SerialLink>,
}

#[derive(Default)]
struct LinkState {
    handle: Option<ConnectionHandle>,
    generation: u64,
}

/// Read side of one connection, detached from the manager's lock.
pub struct LinkSession {
    pub generation: u64,
    pub port: String,
    pub link: Box<dyn SerialLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud_rate: u32,
    pub available_ports: Vec<PortInfo>,
}

pub struct LinkManager {
    driver: Box<dyn PortDriver>,
    cfg: LinkConfig,
    state: Mutex<LinkState>,
    /// Serialises connect attempts so two callers never open the port twice.
    connecting: Mutex<()>,
}

impl LinkManager {
    pub fn new(driver: impl PortDriver, cfg: LinkConfig) -> Self {
        Self {
            driver: Box::new(driver),
            cfg,
            state: Mutex::new(LinkState::default()),
            connecting: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.cfg
    }

    /// Open `preferred`, or the first enumerated port whose description
    /// matches a vendor hint. Returns the port that was opened.
    pub fn connect(&self, preferred: &str) -> Result<String, LinkError> {
        let _serial = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        self.connect_locked(preferred)
    }

    /// Close whatever is open, then connect to the configured port again.
    /// Concurrent callers queue behind each other; none of them opens a
    /// second handle.
    pub fn reconnect(&self) -> Result<String, LinkError> {
        let _serial = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        self.close();
        metrics::counter!("fireguard_link_reconnects_total").increment(1);
        self.connect_locked(&self.cfg.preferred_port)
    }

    /// Reconnect on behalf of a reader that lost the link at `observed`.
    /// When another caller has already brought up a newer link, that link
    /// is kept and `Ok(None)` is returned.
    pub fn reconnect_if_stale(&self, observed: u64) -> Result<Option<String>, LinkError> {
        let _serial = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let st = self.state();
            if let Some(handle) = st.handle.as_ref().filter(|_| st.generation != observed) {
                guard_log!(Level::Debug, "link", "{} already reopened (generation {}), keeping it", handle.port, st.generation);
                return Ok(None);
            }
        }
        self.close();
        metrics::counter!("fireguard_link_reconnects_total").increment(1);
        self.connect_locked(&self.cfg.preferred_port).map(Some)
    }

    pub fn close(&self) {
        let mut st = self.state();
        if let Some(handle) = st.handle.take() {
            st.generation += 1;
            guard_log!(Level::Info, "link", "closed {}", handle.port);
        }
    }

    /// Drop the link after a read failure, unless it was already replaced.
    pub fn mark_failed(&self, generation: u64) {
        let mut st = self.state();
        if st.generation == generation && st.handle.is_some() {
            st.handle = None;
            st.generation += 1;
            metrics::counter!("fireguard_link_failures_total").increment(1);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().handle.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Clone the open link for reading.
    pub fn open_session(&self) -> Result<LinkSession, LinkError> {
        let st = self.state();
        let handle = st.handle.as_ref().ok_or(LinkError::NotConnected)?;
        Ok(LinkSession {
            generation: st.generation,
            port: handle.port.clone(),
            link: handle.link.try_clone_link()?,
        })
    }

    /// Write one newline-terminated directive down the link.
    /// The write goes through a cloned handle so a slow port never holds up
    /// `status()` or the pipeline's generation checks.
    pub fn send_directive(&self, directive: &str) -> Result<(), LinkError> {
        let (port, mut link) = {
            let st = self.state();
            let handle = st.handle.as_ref().ok_or(LinkError::NotConnected)?;
            (handle.port.clone(), handle.link.try_clone_link()?)
        };
        link.write_all(directive.as_bytes())?;
        link.write_all(b"\n")?;
        link.flush()?;
        guard_log!(Level::Debug, "link", "sent {:?} to {}", directive, port);
        Ok(())
    }

    pub fn status(&self) -> LinkStatus {
        let available_ports = self.driver.available_ports().unwrap_or_else(|e| {
            guard_log!(Level::Warn, "link", "port enumeration failed: {}", e);
            Vec::new()
        });
        let st = self.state();
        LinkStatus {
            connected: st.handle.is_some(),
            port: st.handle.as_ref().map(|h| h.port.clone()),
            baud_rate: st.handle.as_ref().map_or(self.cfg.baud_rate, |h| h.baud_rate),
            available_ports,
        }
    }

    /// First enumerated port whose description contains one of the vendor hints.
    pub fn discover(&self) -> Option<PortInfo> {
        self.find_hinted(|_| true)
    }

    fn find_hinted(&self, keep: impl Fn(&PortInfo) -> bool) -> Option<PortInfo> {
        let ports = match self.driver.available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                guard_log!(Level::Warn, "link", "port enumeration failed: {}", e);
                return None;
            }
        };
        ports
            .into_iter()
            .filter(|p| keep(p))
            .find(|p| self.cfg.vendor_hints.iter().any(|hint| p.description.contains(hint.as_str())))
    }

    fn connect_locked(&self, preferred: &str) -> Result<String, LinkError> {
        guard_log!(Level::Info, "link", "attempting to connect to {}", preferred);
        let (port, link) = match self.open(preferred) {
            Ok(link) => (preferred.to_owned(), link),
            Err(e) => {
                guard_log!(Level::Warn, "link", "{}; trying auto-detection", e);
                let Some(found) = self.find_hinted(|p| p.device != preferred) else {
                    return Err(LinkError::Unavailable {
                        preferred: preferred.to_owned(),
                        hints: self.cfg.vendor_hints.clone(),
                    });
                };
                guard_log!(Level::Info, "link", "fallback to {} ({})", found.device, found.description);
                let link = self.open(&found.device)?;
                (found.device, link)
            }
        };

        if !self.cfg.settle_delay.is_zero() {
            thread::sleep(self.cfg.settle_delay);
        }

        let mut st = self.state();
        st.handle = Some(ConnectionHandle { port: port.clone(), baud_rate: self.cfg.baud_rate, link });
        st.generation += 1;
        metrics::counter!("fireguard_link_connects_total").increment(1);
        guard_log!(Level::Info, "link", "connected to {} at {} baud", port, self.cfg.baud_rate);
        Ok(port)
    }

    fn open(&self, port: &str) -> Result<Box<dyn SerialLink>, LinkError> {
        self.driver
            .open(port, self.cfg.baud_rate, self.cfg.read_timeout)
            .map_err(|source| LinkError::Open { port: port.to_owned(), source })
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
