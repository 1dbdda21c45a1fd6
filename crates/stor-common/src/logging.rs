//! Process-wide logging initialisation.
//!
//! The engine logs through `tracing`. [`init`] installs a global
//! subscriber exactly once; later calls are no-ops, and an already-installed
//! subscriber (e.g. from a test harness) is left in place.
//!
//! When the `STORAGE_ENGINE_LOG_DIR` environment variable names a writable
//! directory, log lines are appended to `storage.log` inside it; otherwise
//! they go to stderr. The filter honours `RUST_LOG` and defaults to `info`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log directory.
pub const LOG_DIR_ENV: &str = "STORAGE_ENGINE_LOG_DIR";

/// Name of the log file created inside the log directory.
pub const LOG_FILE_NAME: &str = "storage.log";

static INIT: Once = Once::new();

/// Initialises the process-wide tracing subscriber.
///
/// Idempotent and safe to call from multiple threads; only the first call
/// has any effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false);

        match log_file() {
            Some(file) => {
                // try_init so an outer subscriber (tests, embedding apps)
                // wins without panicking.
                let _ = builder.with_writer(Mutex::new(file)).try_init();
            }
            None => {
                let _ = builder.with_writer(std::io::stderr).try_init();
            }
        }
    });
}

/// Opens the log file when `STORAGE_ENGINE_LOG_DIR` is set and usable.
fn log_file() -> Option<std::fs::File> {
    let dir = std::env::var_os(LOG_DIR_ENV)?;
    let dir = Path::new(&dir);
    if !dir.is_dir() {
        return None;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .ok()
}
