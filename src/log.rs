//! Logging setup.
//!
//! Everything logs through `tracing`. The subscriber writes to
//! `~/.crewflow/crewflow.log`, truncated on startup, so terminal output
//! stays reserved for results.
//!
//! Debug mode can be enabled with `--debug` or `CREWFLOW_DEBUG=1`.
//! `RUST_LOG` overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging with the default level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging, raising the level to debug when asked.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let Some(dir) = dirs::home_dir().map(|h| h.join(".crewflow")) else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join("crewflow.log");
    let Ok(file) = File::create(&path) else {
        return;
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed {
        LOG_PATH.set(path).ok();
    }
}

fn env_debug() -> bool {
    std::env::var("CREWFLOW_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "crewflow=debug"
    } else {
        "crewflow=info"
    }
}

/// Whether debug logging is on.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Where log lines are written, once logging is initialized.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}
