//! Newline-delimited reader over an open link session.

use crate::guard_log;
use crate::ingest::events::RawLine;
use crate::link::manager::LinkSession;
use crate::link::port::SerialLink;
use log::Level;
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

/// Longest sample line carried in a signal report.
const SAMPLE_CHARS: usize = 100;

/// Longest line kept; anything past it is discarded up to the next newline.
pub const MAX_LINE_BYTES: usize = 4096;

/// Message count over one reporting window.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReport {
    pub messages: u64,
    pub sample: Option<String>,
}

/// Counts lines and hands out a report, then zeroes, once per interval.
#[derive(Debug)]
pub struct SignalCounter {
    interval: Duration,
    window_start: Instant,
    messages: u64,
    sample: Option<String>,
}

impl SignalCounter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self { interval, window_start: now, messages: 0, sample: None }
    }

    pub fn record(&mut self, line: &str) {
        self.messages += 1;
        self.sample = Some(line.chars().take(SAMPLE_CHARS).collect());
    }

    pub fn poll_report(&mut self, now: Instant) -> Option<SignalReport> {
        if now.duration_since(self.window_start) < self.interval {
            return None;
        }
        self.window_start = now;
        Some(SignalReport {
            messages: std::mem::take(&mut self.messages),
            sample: self.sample.take(),
        })
    }
}

pub struct LineReader {
    generation: u64,
    port: String,
    link: BufReader<Box<dyn SerialLink>>,
    /// Bytes of a line cut short by a read timeout.
    pending: Vec<u8>,
    /// Inside an overlong line whose head was already dropped.
    overlong: bool,
    idle_poll: Duration,
    signal: SignalCounter,
}

impl LineReader {
    pub fn new(session: LinkSession, idle_poll: Duration, report_interval: Duration) -> Self {
        Self {
            generation: session.generation,
            port: session.port,
            link: BufReader::new(session.link),
            pending: Vec::new(),
            overlong: false,
            idle_poll,
            signal: SignalCounter::new(report_interval, Instant::now()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// One cooperative step: a complete line if one is ready, `None` after
    /// a bounded idle sleep or a read timeout. Any other I/O error means the
    /// link is gone and is for the caller to handle.
    pub fn poll_line(&mut self) -> io::Result<Option<RawLine>> {
        if self.link.buffer().is_empty() && self.link.get_ref().bytes_available()? == 0 {
            thread::sleep(self.idle_poll);
            return Ok(None);
        }

        let room = (MAX_LINE_BYTES - self.pending.len()) as u64;
        match Read::take(&mut self.link, room).read_until(b'\n', &mut self.pending) {
            Ok(0) => Err(io::Error::new(ErrorKind::UnexpectedEof, "link closed by peer")),
            Ok(_) if !self.pending.ends_with(b"\n") && self.pending.len() >= MAX_LINE_BYTES => {
                if !self.overlong {
                    guard_log!(Level::Warn, "reader", "line exceeds {} bytes without a newline, dropping it", MAX_LINE_BYTES);
                }
                self.pending.clear();
                self.overlong = true;
                Ok(None)
            }
            Ok(_) => {
                if std::mem::take(&mut self.overlong) {
                    // Tail of the dropped line.
                    self.pending.clear();
                    return Ok(None);
                }
                let text = String::from_utf8_lossy(&self.pending).trim_end().to_owned();
                self.pending.clear();
                self.signal.record(&text);
                Ok(Some(RawLine::now(text)))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn poll_signal_report(&mut self) -> Option<SignalReport> {
        self.signal.poll_report(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::sync::{Arc, Mutex};

    /// Scripted chunks; `Err` entries surface as read errors.
    #[derive(Clone, Default)]
    struct Script(Arc<Mutex<VecDeque<io::Result<Vec<u8>>>>>);

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut q = self.0.lock().unwrap();
            match q.pop_front() {
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        q.push_front(Ok(chunk.split_off(n)));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(ErrorKind::TimedOut, "timeout")),
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialLink for Script {
        fn bytes_available(&self) -> io::Result<u32> {
            Ok(self.0.lock().unwrap().len() as u32)
        }
        fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
            Ok(Box::new(self.clone()))
        }
    }

    fn reader(chunks: Vec<io::Result<Vec<u8>>>) -> LineReader {
        let script = Script(Arc::new(Mutex::new(chunks.into())));
        let session = LinkSession { generation: 1, port: "script".into(), link: Box::new(script) };
        LineReader::new(session, Duration::from_millis(1), Duration::from_secs(5))
    }

    fn text(r: io::Result<Option<RawLine>>) -> Option<String> {
        r.unwrap().map(|l| l.text)
    }

    #[test]
    fn lines_are_split_and_trimmed() {
        let mut r = reader(vec![Ok(b"Distance to fire: 1.00 cm\r\nFire alert".to_vec()), Ok(b" mode ended\n".to_vec())]);
        assert_eq!(text(r.poll_line()).as_deref(), Some("Distance to fire: 1.00 cm"));
        assert_eq!(text(r.poll_line()).as_deref(), Some("Fire alert mode ended"));
        assert_eq!(text(r.poll_line()), None);
    }

    #[test]
    fn partial_line_survives_a_timeout() {
        let mut r = reader(vec![
            Ok(b"FIRE DET".to_vec()),
            Err(io::Error::new(ErrorKind::TimedOut, "timeout")),
            Ok(b"ECTED!\n".to_vec()),
        ]);
        assert_eq!(text(r.poll_line()), None);
        assert_eq!(text(r.poll_line()).as_deref(), Some("FIRE DETECTED!"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let mut r = reader(vec![Ok(b"Alert! Temp: 40.00\xB0C at [1][2]\n".to_vec())]);
        assert_eq!(text(r.poll_line()).as_deref(), Some("Alert! Temp: 40.00\u{FFFD}C at [1][2]"));
    }

    #[test]
    fn overlong_line_is_dropped_through_its_newline() {
        let mut r = reader(vec![
            Ok(vec![b'x'; MAX_LINE_BYTES + 900]),
            Ok(vec![b'y'; MAX_LINE_BYTES]),
            Ok(b"tail\nFIRE DETECTED!\n".to_vec()),
        ]);
        let mut lines = Vec::new();
        for _ in 0..6 {
            if let Some(line) = text(r.poll_line()) {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["FIRE DETECTED!".to_string()]);
        assert!(r.pending.is_empty());
    }

    #[test]
    fn hard_errors_propagate() {
        let mut r = reader(vec![Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged"))]);
        assert_eq!(r.poll_line().unwrap_err().kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn signal_counter_reports_and_zeroes() {
        let t0 = Instant::now();
        let mut c = SignalCounter::new(Duration::from_secs(5), t0);
        c.record("a");
        c.record(&"x".repeat(250));
        assert_eq!(c.poll_report(t0 + Duration::from_secs(1)), None);

        let report = c.poll_report(t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(report.messages, 2);
        assert_eq!(report.sample.unwrap().len(), SAMPLE_CHARS);

        let next = c.poll_report(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(next, SignalReport { messages: 0, sample: None });
    }
}
