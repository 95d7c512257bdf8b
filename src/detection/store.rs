//! Shared detection state.
//!
//! The store is the only structure written from more than one thread: the
//! ingestion pipeline applies events while request handlers read, reset or
//! inject snapshots. Every mutation runs under one mutex and publishes the
//! finished snapshot to watchers before the lock is released, so no reader
//! ever sees half of an update.

use crate::detection::machine::{self, Applied};
use crate::detection::model::{ConnectionStatus, DetectionSnapshot, FireState, TemperatureMatrix};
use crate::guard_log;
use crate::ingest::events::ParsedEvent;
use chrono::{DateTime, Local};
use log::Level;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub struct StateStore {
    current: Mutex<DetectionSnapshot>,
    watchers: watch::Sender<DetectionSnapshot>,
    /// Arrival time of the newest line of any kind. Kept beside the snapshot
    /// so chatter does not bump the version or wake subscribers.
    last_line: Mutex<Option<DateTime<Local>>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let initial = DetectionSnapshot::new(Local::now());
        let (watchers, _) = watch::channel(initial.clone());
        Self { current: Mutex::new(initial), watchers, last_line: Mutex::new(None) }
    }

    /// Consistent copy of the current record.
    pub fn read_snapshot(&self) -> DetectionSnapshot {
        self.lock().clone()
    }

    /// Receive every committed snapshot, starting with the current one.
    pub fn subscribe(&self) -> watch::Receiver<DetectionSnapshot> {
        self.watchers.subscribe()
    }

    /// Fold one event into the canonical state as a single unit.
    pub fn apply_event(&self, event: ParsedEvent, at: DateTime<Local>) -> Applied {
        self.mutate(|snap| {
            let applied = machine::apply(snap, event, at);
            if let Applied::Transition { from, to } = applied {
                guard_log!(Level::Info, "detection", "state {:?} -> {:?} (max_temp={:.2}°C at {:?})",
                    from, to, snap.max_temp, snap.max_temp_position);
            }
            (applied, applied.mutated())
        })
    }

    /// Operator reset: back to `NoAlert` with the reading, position, detection
    /// time and matrix cleared. Distance and link telemetry are kept.
    pub fn reset(&self) {
        self.mutate(|snap| {
            let from = snap.state;
            snap.state = FireState::NoAlert;
            snap.max_temp = 0.0;
            snap.max_temp_position = (0, 0);
            snap.detection_time = None;
            snap.temperature_matrix = TemperatureMatrix::default();
            snap.last_update = Local::now();
            guard_log!(Level::Info, "store", "reset from {:?}", from);
            ((), true)
        })
    }

    /// Replace the detection fields wholesale, bypassing the pipeline.
    /// Connection status and signal strength stay owned by the link.
    pub fn inject_synthetic(&self, snapshot: DetectionSnapshot) {
        self.mutate(|snap| {
            let version = snap.version;
            let connection_status = snap.connection_status;
            let signal_strength = snap.signal_strength;
            *snap = DetectionSnapshot { connection_status, signal_strength, version, ..snapshot };
            guard_log!(Level::Info, "store", "synthetic snapshot injected (state={:?})", snap.state);
            ((), true)
        })
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.mutate(|snap| {
            let changed = snap.connection_status != status;
            snap.connection_status = status;
            ((), changed)
        })
    }

    /// Stamp the arrival of one line off the link, classified or not.
    pub fn record_line(&self, at: DateTime<Local>) {
        *self.last_line.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn last_line_time(&self) -> Option<DateTime<Local>> {
        *self.last_line.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_signal_strength(&self, messages: u64) {
        self.mutate(|snap| {
            snap.signal_strength = messages;
            ((), true)
        })
    }

    /// Run `f` under the lock; when it reports a change, bump the version and
    /// publish before unlocking.
    fn mutate<R>(&self, f: impl FnOnce(&mut DetectionSnapshot) -> (R, bool)) -> R {
        let mut guard = self.lock();
        let (out, changed) = f(&mut guard);
        if changed {
            guard.version += 1;
            self.watchers.send_replace(guard.clone());
        }
        out
    }

    fn lock(&self) -> MutexGuard<'_, DetectionSnapshot> {
        // Mutations are plain field writes that cannot panic half-way, so a
        // poisoned guard still holds a whole snapshot.
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
