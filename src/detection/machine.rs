//! Detection state machine.
//!
//! `NoAlert` → `FireAlert` on a detection or temperature alert,
//! `FireAlert` → `Extinguished` when the scanner reports the alert ended.
//! Nothing here returns to `NoAlert`; only an operator reset does that.

use crate::detection::model::{DetectionSnapshot, FireState};
use crate::ingest::events::{ParsedEvent, Reading};
use chrono::{DateTime, Local};

/// What applying one event did to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Event carried nothing for the detection record.
    Ignored,
    /// Fields changed, state did not.
    Updated,
    Transition { from: FireState, to: FireState },
}

impl Applied {
    pub fn mutated(self) -> bool {
        !matches!(self, Applied::Ignored)
    }
}

/// Pure state transition, separate from the field updates.
pub fn next_state(state: FireState, event: &ParsedEvent) -> FireState {
    match (state, event) {
        (
            FireState::NoAlert | FireState::Extinguished,
            ParsedEvent::FireDetected(_) | ParsedEvent::TempAlert(_) | ParsedEvent::AlertModeEntered,
        ) => FireState::FireAlert,
        (FireState::FireAlert, ParsedEvent::AlertEnded) => FireState::Extinguished,
        (s, _) => s,
    }
}

/// Fold one event into `snap`, stamping it with the line's arrival time.
///
/// `Unknown` and stray matrix markers leave the snapshot untouched,
/// including `last_update`.
pub fn apply(snap: &mut DetectionSnapshot, event: ParsedEvent, at: DateTime<Local>) -> Applied {
    let from = snap.state;
    let to = next_state(from, &event);
    let entering_alert = from != FireState::FireAlert && to == FireState::FireAlert;

    match event {
        ParsedEvent::FireDetected(reading) | ParsedEvent::TempAlert(reading) => {
            record(snap, reading);
        }
        ParsedEvent::AlertModeEntered | ParsedEvent::AlertEnded => {}
        ParsedEvent::DistanceUpdate(cm) => snap.distance = cm,
        ParsedEvent::MatrixCompleted(matrix) => snap.temperature_matrix = matrix,
        ParsedEvent::MatrixStart
        | ParsedEvent::MatrixRow(_)
        | ParsedEvent::MatrixEnd
        | ParsedEvent::Unknown(_) => return Applied::Ignored,
    }

    if entering_alert {
        snap.detection_time = Some(at);
    }
    snap.state = to;
    snap.last_update = at;

    if from == to { Applied::Updated } else { Applied::Transition { from, to } }
}

fn record(snap: &mut DetectionSnapshot, reading: Reading) {
    snap.max_temp = reading.temp;
    snap.max_temp_position = reading.position;
}
