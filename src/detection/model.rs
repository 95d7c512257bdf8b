//! Detection data model shared by the state machine, the store and every
//! reader of a snapshot.
//!
//! Everything here serialises with `serde` into the JSON shape the
//! monitoring front end polls: kebab-case state names, `[row, col]`
//! positions and `null` for unreadable matrix cells.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One matrix cell. `None` is the no-reading sentinel the device prints as `ERR`.
pub type Cell = Option<i32>;

/// Grid coordinates reported by the scanner, `(row, col)`.
pub type GridPos = (usize, usize);

/// Alert lifecycle. `Extinguished` holds until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FireState {
    #[default]
    NoAlert,
    FireAlert,
    Extinguished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

/// A reassembled temperature grid.
///
/// Rows are kept exactly as received. Rows whose width differs from row 0
/// are listed in `malformed_rows` rather than padded or truncated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureMatrix {
    pub rows: Vec<Vec<Cell>>,
    pub malformed_rows: Vec<usize>,
}

impl TemperatureMatrix {
    /// Seal a block of rows, flagging every row whose width disagrees with the first.
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        let malformed_rows = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.len() != width)
            .map(|(i, _)| i)
            .collect();
        Self { rows, malformed_rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Width of the first row, the reference every other row is checked against.
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_well_formed(&self) -> bool {
        self.malformed_rows.is_empty()
    }

    pub fn sentinel_count(&self) -> usize {
        self.rows.iter().flatten().filter(|c| c.is_none()).count()
    }

    /// Hottest readable cell and where it sits. Ties keep the first one seen.
    pub fn hottest(&self) -> Option<(i32, GridPos)> {
        let mut best: Option<(i32, GridPos)> = None;
        for (r, row) in self.rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if let Some(v) = *cell {
                    if best.is_none_or(|(b, _)| v > b) {
                        best = Some((v, (r, c)));
                    }
                }
            }
        }
        best
    }
}

/// The canonical detection record. Every field changes together, one
/// applied event at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub state: FireState,
    /// Degrees Celsius.
    pub max_temp: f64,
    pub max_temp_position: GridPos,
    pub detection_time: Option<DateTime<Local>>,
    pub temperature_matrix: TemperatureMatrix,
    /// Centimetres.
    pub distance: f64,
    pub last_update: DateTime<Local>,
    pub connection_status: ConnectionStatus,
    /// Lines received during the last reporting interval.
    pub signal_strength: u64,
    /// Bumped by the store on every mutation.
    pub version: u64,
}

impl DetectionSnapshot {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            state: FireState::NoAlert,
            max_temp: 0.0,
            max_temp_position: (0, 0),
            detection_time: None,
            temperature_matrix: TemperatureMatrix::default(),
            distance: 0.0,
            last_update: now,
            connection_status: ConnectionStatus::Disconnected,
            signal_strength: 0,
            version: 0,
        }
    }

    /// A staged fire scene for driving the front end without hardware:
    /// a 15x16 grid with a 65 °C hot spot at [7][14] and a warm halo around it.
    pub fn demo(now: DateTime<Local>) -> Self {
        let rows = (0..15usize)
            .map(|i| {
                (0..16usize)
                    .map(|j| {
                        let v = if i == 7 && j == 14 {
                            65
                        } else if (6..9).contains(&i) && (13..16).contains(&j) {
                            50 + (i.abs_diff(7) + j.abs_diff(14)) as i32
                        } else {
                            25 + ((i + j) % 10) as i32
                        };
                        Some(v)
                    })
                    .collect()
            })
            .collect();

        Self {
            state: FireState::FireAlert,
            max_temp: 65.75,
            max_temp_position: (7, 14),
            detection_time: Some(now),
            temperature_matrix: TemperatureMatrix::from_rows(rows),
            distance: 125.5,
            last_update: now,
            ..Self::new(now)
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
