//! Session logger: routes `tracing` output to a single file in the OS data
//! directory.
//!
//! The file is **truncated at each launch**, so it only ever contains output
//! from the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\Lumina\lumina.log`
//!   Linux:    `~/.local/share/Lumina/lumina.log`
//!   macOS:    `~/Library/Application Support/Lumina/lumina.log`
//!
//! The level filter comes from `LUMINA_LOG` (e.g. `debug`, `lumina=trace`),
//! defaulting to `info`.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env("LUMINA_LOG").unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialise the GUI session logger. Call once, before any logging.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that records the panic before the default handler
///   runs.
pub fn init() {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            // Not fatal: run without a log file.
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        return;
    }
    let _ = LOG_PATH.set(path.clone());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), log = %path.display(), "Lumina session started");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC: {}", info);
        prev(info);
    }));
}

/// Headless mode: human-readable lines on stderr, `warn` by default.
pub fn init_cli(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(if verbose { "debug" } else { "warn" }))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn log_file_path() -> PathBuf {
    data_dir().join("Lumina").join("lumina.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_lives_in_app_folder() {
        let path = log_file_path();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("lumina.log"));
        assert!(path.parent().is_some_and(|p| p.ends_with("Lumina")));
    }
}
