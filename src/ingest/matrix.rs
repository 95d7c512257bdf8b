//! Matrix block reassembly.
//!
//! The scanner prints its temperature grid as a block of lines: a start
//! marker, one `label | values` line per row, then a blank line or `---`.
//! The assembler buffers rows between those markers and hands the sealed
//! matrix off as a single `MatrixCompleted` event.

use crate::detection::model::{Cell, TemperatureMatrix};
use crate::guard_log;
use crate::ingest::events::{AssemblerMode, ParsedEvent};
use log::Level;

#[derive(Debug)]
enum Block {
    Idle,
    Reading(Vec<Vec<Cell>>),
}

#[derive(Debug)]
pub struct MatrixAssembler {
    block: Block,
    max_rows: usize,
    dropped_rows: usize,
}

impl MatrixAssembler {
    pub fn new(max_rows: usize) -> Self {
        Self { block: Block::Idle, max_rows, dropped_rows: 0 }
    }

    pub fn mode(&self) -> AssemblerMode {
        match self.block {
            Block::Idle => AssemblerMode::Idle,
            Block::Reading(_) => AssemblerMode::Reading,
        }
    }

    /// Rows received in the current block so far.
    pub fn buffered_rows(&self) -> usize {
        match &self.block {
            Block::Idle => 0,
            Block::Reading(rows) => rows.len(),
        }
    }

    /// Feed one classified event.
    ///
    /// Matrix events are consumed; the closing marker yields
    /// `MatrixCompleted`. A row or end marker outside a block is a sign of a
    /// desynchronised stream and comes back as `Unknown`. Every other event
    /// passes through untouched.
    pub fn accept(&mut self, event: ParsedEvent) -> Option<ParsedEvent> {
        match event {
            ParsedEvent::MatrixStart => {
                if let Block::Reading(rows) = &self.block {
                    guard_log!(Level::Debug, "matrix", "block restarted, discarding {} buffered row(s)", rows.len());
                }
                self.block = Block::Reading(Vec::new());
                self.dropped_rows = 0;
                None
            }
            ParsedEvent::MatrixRow(row) => match &mut self.block {
                Block::Reading(rows) => {
                    if rows.len() < self.max_rows {
                        rows.push(row);
                    } else {
                        self.dropped_rows += 1;
                    }
                    None
                }
                Block::Idle => Some(ParsedEvent::Unknown(format!("matrix row outside block: {row:?}"))),
            },
            ParsedEvent::MatrixEnd => match std::mem::replace(&mut self.block, Block::Idle) {
                Block::Reading(rows) => {
                    let matrix = TemperatureMatrix::from_rows(rows);
                    guard_log!(
                        Level::Debug,
                        "matrix",
                        "parsed temperature matrix {}x{} ({} malformed row(s), {} dropped over cap)",
                        matrix.height(),
                        matrix.width(),
                        matrix.malformed_rows.len(),
                        self.dropped_rows
                    );
                    Some(ParsedEvent::MatrixCompleted(matrix))
                }
                Block::Idle => Some(ParsedEvent::Unknown("matrix end outside block".into())),
            },
            other => Some(other),
        }
    }
}
