//! Ingestion pipeline
//! ==================
//! *Single* background thread that owns the read side of the link:
//!
//!   link session → line reader → classifier → matrix assembler → store
//!
//! Lines are handled strictly in arrival order. A read failure marks the
//! link failed, waits one fixed backoff and reconnects; there is no retry
//! cap. A fault while handling one line is logged and the loop moves on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::{io, time::Duration};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::Level;

use crate::config::PipelineConfig;
use crate::detection::{Applied, ConnectionStatus, StateStore};
use crate::guard_log;
use crate::ingest::{classify, MatrixAssembler, RawLine};
use crate::link::{LineReader, LinkManager};

/// Why a read session ended.
enum SessionEnd {
    Shutdown,
    /// Another thread reconnected; a newer session is waiting.
    Superseded,
    Failed(io::Error),
}

pub struct Pipeline {
    store: Arc<StateStore>,
    link: Arc<LinkManager>,
    cfg: PipelineConfig,
    assembler: MatrixAssembler,
    shutdown: Receiver<()>,
}

impl Pipeline {
    pub fn new(store: Arc<StateStore>, link: Arc<LinkManager>, cfg: PipelineConfig, shutdown: Receiver<()>) -> Self {
        let assembler = MatrixAssembler::new(cfg.max_matrix_rows);
        Self { store, link, cfg, assembler, shutdown }
    }

    /// Classify one line and fold the result into the store.
    /// `None` when the line was absorbed by the matrix assembler.
    pub fn process(&mut self, line: RawLine) -> Option<Applied> {
        let event = classify(&line.text, self.assembler.mode());
        metrics::counter!("fireguard_events_total", "kind" => event.kind()).increment(1);
        if event.is_unknown() {
            guard_log!(Level::Trace, "pipeline", "unclassified: {:?}", line.text);
        }
        let event = self.assembler.accept(event)?;
        Some(self.store.apply_event(event, line.received_at))
    }

    /// Run until shutdown is signalled.
    pub fn run(mut self) {
        guard_log!(Level::Info, "pipeline", "ingestion loop started");
        loop {
            // Read before the attempt so a reconnect racing with it counts as newer.
            let observed = self.link.generation();
            let session = match self.link.open_session() {
                Ok(session) => session,
                Err(e) => {
                    guard_log!(Level::Warn, "pipeline", "no link ({}), retrying in {:?}", e, self.link.config().backoff);
                    self.store.set_connection_status(ConnectionStatus::Disconnected);
                    if self.backoff_then_reconnect(observed) {
                        break;
                    }
                    continue;
                }
            };

            guard_log!(Level::Info, "pipeline", "reading from {} (generation {})", session.port, session.generation);
            self.store.set_connection_status(ConnectionStatus::Connected);
            // Bytes are lost across a reconnect, so a half-read block is worthless.
            self.assembler = MatrixAssembler::new(self.cfg.max_matrix_rows);
            let cfg = self.link.config();
            let mut reader = LineReader::new(session, cfg.idle_poll, self.cfg.signal_report_interval);

            match self.drain(&mut reader) {
                SessionEnd::Shutdown => break,
                SessionEnd::Superseded => {
                    guard_log!(Level::Info, "pipeline", "link replaced, switching session");
                }
                SessionEnd::Failed(e) => {
                    guard_log!(Level::Warn, "pipeline", "error reading {}: {}", reader.port(), e);
                    self.link.mark_failed(reader.generation());
                    self.store.set_connection_status(ConnectionStatus::Disconnected);
                    if self.backoff_then_reconnect(reader.generation()) {
                        break;
                    }
                }
            }
        }
        guard_log!(Level::Info, "pipeline", "ingestion loop stopped");
    }

    fn drain(&mut self, reader: &mut LineReader) -> SessionEnd {
        loop {
            if self.stop_requested() {
                return SessionEnd::Shutdown;
            }
            if self.link.generation() != reader.generation() {
                return SessionEnd::Superseded;
            }

            match reader.poll_line() {
                Ok(Some(line)) => {
                    metrics::counter!("fireguard_lines_total").increment(1);
                    self.store.record_line(line.received_at);
                    self.process_guarded(line);
                }
                Ok(None) => {}
                Err(e) => return SessionEnd::Failed(e),
            }

            if let Some(report) = reader.poll_signal_report() {
                guard_log!(Level::Info, "reader", "serial signal active, messages received: {}", report.messages);
                if let Some(sample) = &report.sample {
                    guard_log!(Level::Info, "reader", "sample line: {}", sample);
                }
                self.store.record_signal_strength(report.messages);
            }
        }
    }

    fn process_guarded(&mut self, line: RawLine) {
        self.isolate(line, Self::process);
    }

    /// Run one line's worth of work so a fault cannot end the loop.
    /// On a fault the half-built block is dropped; returns `false`.
    fn isolate(&mut self, line: RawLine, step: impl FnOnce(&mut Self, RawLine) -> Option<Applied>) -> bool {
        let text = line.text.clone();
        if panic::catch_unwind(AssertUnwindSafe(|| step(self, line))).is_ok() {
            return true;
        }
        guard_log!(Level::Error, "pipeline", "fault while handling {:?}; block state reset", text);
        self.assembler = MatrixAssembler::new(self.cfg.max_matrix_rows);
        false
    }

    /// Sleep one backoff interval, then reopen the link lost at `observed`
    /// unless someone else already did. Returns `true` if shutdown arrived
    /// while waiting.
    fn backoff_then_reconnect(&self, observed: u64) -> bool {
        if self.wait(self.link.config().backoff) {
            return true;
        }
        match self.link.reconnect_if_stale(observed) {
            Ok(Some(port)) => guard_log!(Level::Info, "pipeline", "reconnected to {}", port),
            Ok(None) => {}
            Err(e) => guard_log!(Level::Warn, "pipeline", "reconnection attempt failed: {}", e),
        }
        false
    }

    fn wait(&self, dur: Duration) -> bool {
        !matches!(self.shutdown.recv_timeout(dur), Err(RecvTimeoutError::Timeout))
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }
}

struct Running {
    handle: JoinHandle<()>,
    stop: Sender<()>,
}

/// Starts at most one pipeline thread and stops it on request.
pub struct PipelineSupervisor {
    store: Arc<StateStore>,
    link: Arc<LinkManager>,
    cfg: PipelineConfig,
    running: Mutex<Option<Running>>,
}

impl PipelineSupervisor {
    pub fn new(store: Arc<StateStore>, link: Arc<LinkManager>, cfg: PipelineConfig) -> Self {
        Self { store, link, cfg, running: Mutex::new(None) }
    }

    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawn the pipeline unless one is already alive.
    /// Returns `true` when a new thread was started.
    pub fn ensure_running(&self) -> io::Result<bool> {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Ok(false);
        }

        let (stop, shutdown) = channel::bounded(1);
        let pipeline = Pipeline::new(self.store.clone(), self.link.clone(), self.cfg.clone(), shutdown);
        let handle = thread::Builder::new()
            .name("serial_pipeline".into())
            .spawn(move || pipeline.run())?;
        *slot = Some(Running { handle, stop });
        guard_log!(Level::Info, "pipeline", "pipeline thread started");
        Ok(true)
    }

    /// Signal the thread and wait for it to exit.
    pub fn shutdown(&self) {
        let Some(Running { handle, stop }) = self.slot().take() else {
            return;
        };
        let _ = stop.try_send(());
        drop(stop);
        if handle.join().is_err() {
            guard_log!(Level::Error, "pipeline", "pipeline thread panicked");
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PipelineSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
