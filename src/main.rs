// src/main.rs

//! FireGuard console agent.
//!
//! 1. Load configuration & set up structured logging
//! 2. Build the state store and the serial link manager
//! 3. Connect to the scanner and start the ingestion pipeline (or run offline)
//! 4. Log every state change the pipeline commits
//! 5. Wait for Ctrl-C, then stop the pipeline and close the link
//!
// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use std::{
    path::{Path, PathBuf},
    process, thread,
};

// ───── local imports ────────────────────────────────────────────────────────
use fireguard::config::{self, Config};
use fireguard::control::ControlPlane;
use fireguard::link::SystemPorts;

// ───── helpers ──────────────────────────────────────────────────────────────

/// Directory that contains the running executable.
fn exe_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

/// First CLI argument, or `fireguard.toml` next to the executable.
fn config_path(exe_dir: &Path) -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| exe_dir.join("fireguard.toml"))
}

/// Configure global logging as requested in `[logging]`.
fn setup_logging(exe_dir: &Path, cfg: &Config) -> anyhow::Result<()> {
    let level = cfg.logging.level_filter()?;

    let log_path = cfg
        .logging
        .enable
        .then(|| exe_dir.join(cfg.logging.file.as_deref().unwrap_or("fireguard.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(&path).with_context(|| format!("opening {}", path.display()))?);
    }

    dispatch.apply().context("installing logger")?;
    Ok(())
}

// ───── agent logic ──────────────────────────────────────────────────────────

async fn run(control: &ControlPlane) {
    let mut updates = control.subscribe();
    let mut last_state = updates.borrow().state;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = updates.borrow_and_update().clone();
                if snap.state != last_state {
                    log::warn!(
                        "fire state now {:?} (max {:.2}°C at {:?}, distance {:.1} cm)",
                        snap.state, snap.max_temp, snap.max_temp_position, snap.distance
                    );
                    last_state = snap.state;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::warn!("Shutdown initiated");
                break;
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    // 1 ─ Context
    let exe_dir = exe_dir()?;
    let cfg_path = config_path(&exe_dir);
    let cfg = config::load(&cfg_path).with_context(|| format!("loading {}", cfg_path.display()))?;

    // 2 ─ Logging
    setup_logging(&exe_dir, &cfg)?;
    log::info!("FireGuard agent bootstrap initiated");

    // 3 ─ Store, link, pipeline
    let control = ControlPlane::with_driver(SystemPorts, &cfg);
    if !control.start() {
        log::info!("Running in offline mode; reconnect once the scanner is plugged in.");
    }

    // 4 ─ Wait for shutdown
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("tokio runtime creation failed")?;
    rt.block_on(run(&control));

    control.shutdown();
    log::info!("Agent stopped cleanly");
    Ok(())
}
