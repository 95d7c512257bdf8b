// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the TOML file, deserializes it into `RawConfig`, and converts it
//! into the fully-typed runtime `Config`.

use crate::config::model::{Config, ConfigError, RawConfig};
use crate::guard_log;
use log::Level;
use std::{fs, io::ErrorKind, path::Path};

/// Load and parse the configuration from `path`.
/// A missing file is not an error: the defaults are used and a warning logged.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    guard_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = match fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            guard_log!(Level::Warn, "config", "{:?} not found, using built-in defaults", path);
            return Ok(Config::default());
        }
        Err(e) => return Err(e.into()),
    };
    let cfg = parse(&txt)?;
    guard_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Parse configuration text without touching the filesystem.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Config::try_from(raw)
}
