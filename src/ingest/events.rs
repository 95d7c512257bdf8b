//! Event model for the ingestion path.
//!
//! A `RawLine` leaves the reader, the classifier turns it into a
//! `ParsedEvent`, the matrix assembler folds the matrix variants into a
//! single `MatrixCompleted`, and the state machine consumes the rest.
//! Both types live for one pipeline iteration.

use crate::detection::model::{Cell, GridPos, TemperatureMatrix};
use chrono::{DateTime, Local};

/// One decoded line off the link, trailing whitespace already stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub text: String,
    pub received_at: DateTime<Local>,
}

impl RawLine {
    pub fn new(text: impl Into<String>, received_at: DateTime<Local>) -> Self {
        Self { text: text.into(), received_at }
    }

    pub fn now(text: impl Into<String>) -> Self {
        Self::new(text, Local::now())
    }
}

/// Whether the assembler is inside a matrix block. Rows and end markers
/// only mean something while `Reading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblerMode {
    #[default]
    Idle,
    Reading,
}

/// A temperature reading extracted from an alert line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temp: f64,
    pub position: GridPos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    MatrixStart,
    MatrixRow(Vec<Cell>),
    MatrixEnd,
    /// Produced by the assembler, never by the classifier.
    MatrixCompleted(TemperatureMatrix),
    FireDetected(Reading),
    /// The scanner stopped its motor and entered alert mode.
    AlertModeEntered,
    TempAlert(Reading),
    DistanceUpdate(f64),
    AlertEnded,
    Unknown(String),
}

impl ParsedEvent {
    /// Short label used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedEvent::MatrixStart => "matrix_start",
            ParsedEvent::MatrixRow(_) => "matrix_row",
            ParsedEvent::MatrixEnd => "matrix_end",
            ParsedEvent::MatrixCompleted(_) => "matrix_completed",
            ParsedEvent::FireDetected(_) => "fire_detected",
            ParsedEvent::AlertModeEntered => "alert_mode_entered",
            ParsedEvent::TempAlert(_) => "temp_alert",
            ParsedEvent::DistanceUpdate(_) => "distance_update",
            ParsedEvent::AlertEnded => "alert_ended",
            ParsedEvent::Unknown(_) => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ParsedEvent::Unknown(_))
    }
}
