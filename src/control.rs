//! Control-plane surface consumed by the request layer.
//!
//! Each method maps onto one front-end action: poll status, reset, inject a
//! staged scene, inspect the link, force a reconnect. The HTTP routing
//! around these lives outside this crate.

use std::sync::Arc;

use chrono::{DateTime, Local};
use log::Level;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::Config;
use crate::detection::{ConnectionStatus, DetectionSnapshot, StateStore};
use crate::guard_log;
use crate::link::{LinkManager, PortDriver, PortInfo};
use crate::pipeline::PipelineSupervisor;

/// Answer to a connection-status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub connected: bool,
    pub port: Option<String>,
    pub available_ports: Vec<PortInfo>,
    pub last_message_time: Option<DateTime<Local>>,
    pub message_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectOutcome {
    pub success: bool,
    pub connection_status: ConnectionStatus,
}

pub struct ControlPlane {
    store: Arc<StateStore>,
    link: Arc<LinkManager>,
    pipeline: PipelineSupervisor,
}

impl ControlPlane {
    pub fn new(store: Arc<StateStore>, link: Arc<LinkManager>, cfg: &Config) -> Self {
        let pipeline = PipelineSupervisor::new(store.clone(), link.clone(), cfg.pipeline.clone());
        Self { store, link, pipeline }
    }

    /// Build the store and link manager from config around `driver`.
    pub fn with_driver(driver: impl PortDriver, cfg: &Config) -> Self {
        let store = Arc::new(StateStore::new());
        let link = Arc::new(LinkManager::new(driver, cfg.link.clone()));
        Self::new(store, link, cfg)
    }

    /// Initial connect; the pipeline only starts when a device answered.
    /// Returns whether the system came up online.
    pub fn start(&self) -> bool {
        match self.link.connect(&self.link.config().preferred_port) {
            Ok(port) => {
                self.store.set_connection_status(ConnectionStatus::Connected);
                self.start_pipeline();
                guard_log!(Level::Info, "control", "serial pipeline running on {}", port);
                true
            }
            Err(e) => {
                self.store.set_connection_status(ConnectionStatus::Disconnected);
                guard_log!(Level::Warn, "control", "{}; running offline, inject a test scene to exercise the UI", e);
                false
            }
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn link(&self) -> &Arc<LinkManager> {
        &self.link
    }

    pub fn pipeline_running(&self) -> bool {
        self.pipeline.is_running()
    }

    pub fn get_status(&self) -> DetectionSnapshot {
        self.store.read_snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetectionSnapshot> {
        self.store.subscribe()
    }

    /// Clear the alert and, when the link is up, tell the scanner too.
    /// The downstream directive is best-effort.
    pub fn reset(&self) {
        self.store.reset();
        if self.link.is_connected() {
            if let Err(e) = self.link.send_directive(&self.link.config().reset_directive) {
                guard_log!(Level::Debug, "control", "reset directive not delivered: {}", e);
            }
        }
    }

    pub fn inject_test_snapshot(&self, snapshot: DetectionSnapshot) {
        self.store.inject_synthetic(snapshot);
    }

    pub fn get_connection_status(&self) -> ConnectionReport {
        let link = self.link.status();
        let connected = link.connected;
        ConnectionReport {
            connected,
            port: link.port,
            available_ports: link.available_ports,
            last_message_time: self.store.last_line_time().filter(|_| connected),
            message_count: self.store.read_snapshot().signal_strength,
        }
    }

    /// Reopen the link and make sure exactly one pipeline is reading it.
    pub fn reconnect(&self) -> ReconnectOutcome {
        guard_log!(Level::Info, "control", "reconnect requested");
        let success = match self.link.reconnect() {
            Ok(_) => {
                self.store.set_connection_status(ConnectionStatus::Connected);
                self.start_pipeline();
                true
            }
            Err(e) => {
                guard_log!(Level::Warn, "control", "reconnect failed: {}", e);
                self.store.set_connection_status(ConnectionStatus::Disconnected);
                false
            }
        };
        ReconnectOutcome { success, connection_status: self.store.read_snapshot().connection_status }
    }

    pub fn shutdown(&self) {
        self.pipeline.shutdown();
        self.link.close();
        self.store.set_connection_status(ConnectionStatus::Disconnected);
    }

    fn start_pipeline(&self) {
        if let Err(e) = self.pipeline.ensure_running() {
            guard_log!(Level::Error, "control", "cannot spawn pipeline thread: {}", e);
        }
    }
}
