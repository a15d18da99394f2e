//! Tracing subscriber setup
//!
//! Logs go to stdout and to `~/.helpmate/logs/helpmate-<role>.log`, both
//! stamped with local time. `RUST_LOG` overrides the default `info` filter.

use crate::config::{helpmate_dir, NodeRole};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

/// Format timestamps using the system's local time via chrono
struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

pub fn log_file_path(role: NodeRole) -> PathBuf {
    helpmate_dir()
        .join("logs")
        .join(format!("helpmate-{}.log", role.as_str()))
}

/// Install the global subscriber; falls back to stdout only if the log file cannot be opened
pub fn init(role: NodeRole) {
    let path = log_file_path(role);
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok();

    let installed = if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);
        tracing_subscriber::registry()
            .with(env_filter())
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_timer(LocalTimer)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!("Logging to {:?}", path);
    }
}
