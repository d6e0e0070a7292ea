//! Centralized filesystem paths for traceract.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | Linux | Android (app-private HOME) |
//! |---------|-------|----------------------------|
//! | Data | `~/.local/share/traceract/` | `$HOME/.local/share/traceract/` |
//! | Config | `~/.config/traceract/` | `$HOME/.config/traceract/` |
//!
//! # Environment Overrides
//!
//! - `TRACERACT_DATA_DIR` overrides [`data_dir`]
//! - `TRACERACT_CONFIG_DIR` overrides [`config_dir`]

use std::path::{Path, PathBuf};

/// Durable engine state root.
///
/// Holds the history slots, offline queue, sync state and logs. Resolves to
/// `dirs::data_dir()/traceract/` unless `TRACERACT_DATA_DIR` is set.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve(
        std::env::var_os("TRACERACT_DATA_DIR"),
        dirs::data_dir(),
        "/tmp/traceract-data",
    )
}

/// Config directory (`config.toml`).
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve(
        std::env::var_os("TRACERACT_CONFIG_DIR"),
        dirs::config_dir(),
        "/tmp/traceract-config",
    )
}

fn resolve(
    override_dir: Option<std::ffi::OsString>,
    platform_dir: Option<PathBuf>,
    fallback: &str,
) -> PathBuf {
    if let Some(dir) = override_dir {
        return PathBuf::from(dir);
    }
    platform_dir
        .map(|d| d.join("traceract"))
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Locations of the three durable keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// Primary history slot.
    pub history: PathBuf,
    /// Backup history slot.
    pub history_backup: PathBuf,
    /// Offline upload queue.
    pub queue: PathBuf,
    /// Process-wide sync state.
    pub sync_state: PathBuf,
}

impl StorePaths {
    /// Lay out all durable files inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            history: dir.join("history.json"),
            history_backup: dir.join("history.backup.json"),
            queue: dir.join("queue.json"),
            sync_state: dir.join("sync-state.json"),
        }
    }

    /// Default layout under [`data_dir`].
    #[must_use]
    pub fn default_layout() -> Self {
        Self::in_dir(&data_dir())
    }
}
