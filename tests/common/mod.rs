//! Scripted in-memory serial ports for driving the link and pipeline
//! without hardware.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fireguard::config::{Config, LinkConfig, PipelineConfig};
use fireguard::link::{PortDriver, PortInfo, SerialLink};

type Chunks = VecDeque<io::Result<Vec<u8>>>;

#[derive(Default)]
struct Bench {
    /// One script per successful open, consumed in order.
    sessions: HashMap<String, VecDeque<Arc<Mutex<Chunks>>>>,
    /// Devices that accept an open even with no script left (they stay silent).
    openable: Vec<String>,
    ports: Vec<PortInfo>,
    opens: Vec<String>,
    written: Vec<u8>,
    /// How long each write blocks, as a slow UART would.
    write_stall: Duration,
}

#[derive(Clone, Default)]
pub struct FakePorts(Arc<Mutex<Bench>>);

impl FakePorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session for `device`: each string is delivered as one chunk.
    pub fn script(&self, device: &str, chunks: &[&str]) -> &Self {
        let q: Chunks = chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        self.push_session(device, q)
    }

    /// Queue a session that delivers `chunks`, then fails the next read.
    pub fn script_then_fail(&self, device: &str, chunks: &[&str]) -> &Self {
        let mut q: Chunks = chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        q.push_back(Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged")));
        self.push_session(device, q)
    }

    pub fn openable(&self, device: &str) -> &Self {
        self.0.lock().unwrap().openable.push(device.into());
        self
    }

    pub fn enumerate(&self, device: &str, description: &str) -> &Self {
        self.0.lock().unwrap().ports.push(PortInfo {
            device: device.into(),
            description: description.into(),
            manufacturer: None,
        });
        self
    }

    pub fn stall_writes(&self, stall: Duration) -> &Self {
        self.0.lock().unwrap().write_stall = stall;
        self
    }

    pub fn opens(&self) -> Vec<String> {
        self.0.lock().unwrap().opens.clone()
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap().written).into_owned()
    }

    fn push_session(&self, device: &str, chunks: Chunks) -> &Self {
        self.0
            .lock()
            .unwrap()
            .sessions
            .entry(device.into())
            .or_default()
            .push_back(Arc::new(Mutex::new(chunks)));
        self
    }
}

impl PortDriver for FakePorts {
    fn open(&self, path: &str, _baud: u32, _timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let mut bench = self.0.lock().unwrap();
        let feed = match bench.sessions.get_mut(path).and_then(VecDeque::pop_front) {
            Some(feed) => feed,
            None if bench.openable.iter().any(|d| d == path) => Arc::new(Mutex::new(Chunks::new())),
            None => return Err(io::Error::new(ErrorKind::NotFound, format!("{path}: no such device"))),
        };
        bench.opens.push(path.into());
        Ok(Box::new(FakeLink { feed, bench: self.0.clone() }))
    }

    fn available_ports(&self) -> io::Result<Vec<PortInfo>> {
        Ok(self.0.lock().unwrap().ports.clone())
    }
}

#[derive(Clone)]
struct FakeLink {
    feed: Arc<Mutex<Chunks>>,
    bench: Arc<Mutex<Bench>>,
}

impl Read for FakeLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut q = self.feed.lock().unwrap();
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
            None => Err(io::Error::new(ErrorKind::TimedOut, "read timed out")),
        }
    }
}

impl Write for FakeLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stall = self.bench.lock().unwrap().write_stall;
        std::thread::sleep(stall);
        self.bench.lock().unwrap().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for FakeLink {
    fn bytes_available(&self) -> io::Result<u32> {
        Ok(self.feed.lock().unwrap().len() as u32)
    }

    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(self.clone()))
    }
}

/// Config with every delay shrunk so tests run in milliseconds.
pub fn fast_config(preferred: &str) -> Config {
    Config {
        link: LinkConfig {
            preferred_port: preferred.into(),
            settle_delay: Duration::ZERO,
            backoff: Duration::from_millis(20),
            idle_poll: Duration::from_millis(1),
            read_timeout: Duration::from_millis(10),
            ..LinkConfig::default()
        },
        pipeline: PipelineConfig {
            signal_report_interval: Duration::from_millis(50),
            ..PipelineConfig::default()
        },
        ..Config::default()
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
