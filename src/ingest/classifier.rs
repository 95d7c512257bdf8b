//! Line classifier.
//!
//! Maps one telemetry line plus the assembler mode to exactly one
//! `ParsedEvent`. Classification is an ordered rule table: the first rule
//! whose predicate matches builds the event, and a rule that matches but
//! cannot extract its numbers yields `Unknown` instead of falling through.
//! Partial readings therefore never reach the state machine.

use crate::detection::model::{Cell, GridPos};
use crate::guard_log;
use crate::ingest::events::{AssemblerMode, ParsedEvent, Reading};
use log::Level;

pub const MATRIX_START_MARKER: &str = "Center Matrix Data";
pub const MATRIX_END_MARKER: &str = "---";
pub const ROW_DELIMITER: char = '|';
pub const FIRE_DETECTED_MARKER: &str = "FIRE DETECTED";
pub const ALERT_MODE_MARKER: &str = "Motor stopped - FIRE ALERT MODE";
/// Both firmware revisions: `Alert! Temp:` and `Alert! Current temp:`.
pub const TEMP_ALERT_MARKERS: [&str; 2] = ["Alert! Temp:", "Alert! Current temp:"];
pub const DISTANCE_MARKER: &str = "Distance to fire";
pub const DISTANCE_UNIT: &str = "cm";
pub const ALERT_ENDED_MARKER: &str = "Fire alert mode ended";

/// Matched case-insensitively; the newer firmware prints `temp:`.
const TEMP_MARKER: &str = "temp:";
const POSITION_MARKER: &str = " at ";

/// One row of the classification table.
pub struct Rule {
    pub name: &'static str,
    matches: fn(&str, AssemblerMode) -> bool,
    build: fn(&str) -> ParsedEvent,
}

/// Precedence is the order of this table.
pub static RULES: [Rule; 9] = [
    Rule {
        name: "matrix_start",
        matches: |l, _| l.contains(MATRIX_START_MARKER),
        build: |_| ParsedEvent::MatrixStart,
    },
    Rule {
        name: "matrix_end",
        matches: |l, m| m == AssemblerMode::Reading && is_block_end(l),
        build: |_| ParsedEvent::MatrixEnd,
    },
    Rule {
        name: "matrix_row",
        matches: |l, m| m == AssemblerMode::Reading && l.contains(ROW_DELIMITER),
        build: |l| ParsedEvent::MatrixRow(parse_row(l)),
    },
    Rule {
        name: "fire_detected",
        matches: |l, _| l.contains(FIRE_DETECTED_MARKER),
        build: |l| demote(l, extract_reading(l).map(ParsedEvent::FireDetected)),
    },
    Rule {
        name: "alert_mode_entered",
        matches: |l, _| l.contains(ALERT_MODE_MARKER),
        build: |_| ParsedEvent::AlertModeEntered,
    },
    Rule {
        name: "temp_alert",
        matches: |l, _| TEMP_ALERT_MARKERS.iter().any(|m| l.contains(m)),
        build: |l| demote(l, extract_reading(l).map(ParsedEvent::TempAlert)),
    },
    Rule {
        name: "distance",
        matches: |l, _| l.contains(DISTANCE_MARKER),
        build: |l| demote(l, extract_distance(l).map(ParsedEvent::DistanceUpdate)),
    },
    Rule {
        name: "alert_ended",
        matches: |l, _| l.contains(ALERT_ENDED_MARKER),
        build: |_| ParsedEvent::AlertEnded,
    },
    Rule {
        name: "unknown",
        matches: |_, _| true,
        build: |l| ParsedEvent::Unknown(l.to_owned()),
    },
];

/// Name of the first rule that claims `line`.
pub fn matching_rule(line: &str, mode: AssemblerMode) -> &'static str {
    RULES
        .iter()
        .find(|r| (r.matches)(line, mode))
        .map_or("unknown", |r| r.name)
}

pub fn classify(line: &str, mode: AssemblerMode) -> ParsedEvent {
    match RULES.iter().find(|r| (r.matches)(line, mode)) {
        Some(rule) => (rule.build)(line),
        None => ParsedEvent::Unknown(line.to_owned()),
    }
}

fn demote(line: &str, parsed: Option<ParsedEvent>) -> ParsedEvent {
    parsed.unwrap_or_else(|| {
        guard_log!(Level::Debug, "classifier", "demoted unparseable line: {:?}", line);
        metrics::counter!("fireguard_demoted_lines_total").increment(1);
        ParsedEvent::Unknown(line.to_owned())
    })
}

fn is_block_end(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t == MATRIX_END_MARKER
}

/// `<label>|<v> <v> ERR <v>` → cells; anything that is not an integer becomes the sentinel.
pub fn parse_row(line: &str) -> Vec<Cell> {
    line.split_once(ROW_DELIMITER)
        .map(|(_, values)| values.split_whitespace().map(|t| t.parse::<i32>().ok()).collect())
        .unwrap_or_default()
}

/// `... Temp: 50.00°C at [5][14]` → 50.0 at (5, 14).
pub fn extract_reading(line: &str) -> Option<Reading> {
    // ASCII lowercasing keeps byte offsets intact, so indices map back onto `line`.
    let start = line.to_ascii_lowercase().find(TEMP_MARKER)? + TEMP_MARKER.len();
    let rest = &line[start..];
    let at = rest.find(POSITION_MARKER)?;

    let temp = parse_finite(strip_degrees(&rest[..at]))?;
    let position = parse_grid(&rest[at + POSITION_MARKER.len()..])?;
    Some(Reading { temp, position })
}

/// `Distance to fire: 120.50 cm` → 120.5.
pub fn extract_distance(line: &str) -> Option<f64> {
    let rest = &line[line.find(DISTANCE_MARKER)?..];
    let value = &rest[rest.find(':')? + 1..];
    let value = &value[..value.find(DISTANCE_UNIT)?];
    parse_finite(value)
}

fn strip_degrees(s: &str) -> &str {
    // A degree sign mangled by a bad decode shows up as U+FFFD.
    s.trim()
        .trim_end_matches(|c: char| c == 'C' || c == '°' || c == '\u{FFFD}')
        .trim_end()
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First `[r][c]` pair in `s`; tolerates words such as `position` before it.
fn parse_grid(s: &str) -> Option<GridPos> {
    let (row, rest) = bracketed(&s[s.find('[')?..])?;
    let (col, _) = bracketed(rest)?;
    Some((row, col))
}

fn bracketed(s: &str) -> Option<(usize, &str)> {
    let inner = s.strip_prefix('[')?;
    let close = inner.find(']')?;
    let value = inner[..close].trim().parse().ok()?;
    Some((value, &inner[close + 1..]))
}
