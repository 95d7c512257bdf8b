// src/config/model.rs

use log::LevelFilter;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Top-level runtime config
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging:  LoggingConfig,
    pub link:     LinkConfig,
    pub pipeline: PipelineConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]                   pub enable: bool,
    #[serde(default)]                   pub file:   Option<String>,
    #[serde(default = "default_level")] pub level:  String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

impl LoggingConfig {
    /// Map the configured level name onto a `log` filter.
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        match self.level.to_uppercase().as_str() {
            "ERROR" => Ok(LevelFilter::Error),
            "WARN"  => Ok(LevelFilter::Warn),
            "INFO"  => Ok(LevelFilter::Info),
            "DEBUG" => Ok(LevelFilter::Debug),
            "TRACE" => Ok(LevelFilter::Trace),
            "OFF"   => Ok(LevelFilter::Off),
            other   => Err(ConfigError::InvalidLevel(other.into())),
        }
    }
}

/// Serial link settings, fully typed.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub preferred_port:  String,
    pub baud_rate:       u32,
    pub read_timeout:    Duration,
    /// Pause after opening before the device is considered ready.
    pub settle_delay:    Duration,
    /// Fixed delay between a link failure and the next connect attempt.
    pub backoff:         Duration,
    /// Sleep between polls while no bytes are waiting.
    pub idle_poll:       Duration,
    /// Substrings matched against port descriptions during fallback discovery.
    pub vendor_hints:    Vec<String>,
    /// Directive sent downstream on an operator reset.
    pub reset_directive: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            preferred_port:  "/dev/cu.usbserial-A101167E".into(),
            baud_rate:       230_400,
            read_timeout:    Duration::from_secs(1),
            settle_delay:    Duration::from_secs(2),
            backoff:         Duration::from_secs(2),
            idle_poll:       Duration::from_millis(10),
            vendor_hints:    vec!["Arduino".into(), "CH340".into(), "USB Serial".into()],
            reset_directive: "RESET".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub signal_report_interval: Duration,
    pub max_matrix_rows:        usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            signal_report_interval: Duration::from_secs(5),
            max_matrix_rows:        64,
        }
    }
}

/// Raw `[link]` table; durations stay strings until conversion.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkStub {
    pub preferred_port:  Option<String>,
    pub baud_rate:       Option<u32>,
    pub read_timeout:    Option<String>,
    pub settle_delay:    Option<String>,
    pub backoff:         Option<String>,
    pub idle_poll:       Option<String>,
    pub vendor_hints:    Option<Vec<String>>,
    pub reset_directive: Option<String>,
}

/// Raw `[pipeline]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineStub {
    pub signal_report_interval: Option<String>,
    pub max_matrix_rows:        Option<usize>,
}

/// The whole file as it appears on disk
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)] pub logging:  LoggingConfig,
    #[serde(default)] pub link:     LinkStub,
    #[serde(default)] pub pipeline: PipelineStub,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn parse_duration(raw: Option<String>, fallback: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(fallback),
        Some(s) => humantime::parse_duration(s.trim())
            .map_err(|e| ConfigError::InvalidDuration(s, e)),
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        raw.logging.level_filter()?;

        let d = LinkConfig::default();
        let l = raw.link;
        let link = LinkConfig {
            preferred_port:  l.preferred_port.unwrap_or(d.preferred_port),
            baud_rate:       l.baud_rate.unwrap_or(d.baud_rate),
            read_timeout:    parse_duration(l.read_timeout, d.read_timeout)?,
            settle_delay:    parse_duration(l.settle_delay, d.settle_delay)?,
            backoff:         parse_duration(l.backoff, d.backoff)?,
            idle_poll:       parse_duration(l.idle_poll, d.idle_poll)?,
            vendor_hints:    l.vendor_hints.unwrap_or(d.vendor_hints),
            reset_directive: l.reset_directive.unwrap_or(d.reset_directive),
        };
        if link.baud_rate == 0 {
            return Err(ConfigError::InvalidValue { field: "link.baud_rate", reason: "must be > 0".into() });
        }

        let d = PipelineConfig::default();
        let p = raw.pipeline;
        let pipeline = PipelineConfig {
            signal_report_interval: parse_duration(p.signal_report_interval, d.signal_report_interval)?,
            max_matrix_rows:        p.max_matrix_rows.unwrap_or(d.max_matrix_rows),
        };
        if pipeline.max_matrix_rows == 0 {
            return Err(ConfigError::InvalidValue { field: "pipeline.max_matrix_rows", reason: "must be > 0".into() });
        }
        if pipeline.signal_report_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.signal_report_interval",
                reason: "must be non-zero".into(),
            });
        }

        Ok(Config { logging: raw.logging, link, pipeline })
    }
}
