//! Configuration types for the capture-store-sync engine.

use crate::error::{Result, TrackerError};
use crate::store::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Capture cadences (seconds) the scheduler recognizes.
pub const RECOGNIZED_INTERVALS_SECS: [u64; 7] = [60, 120, 300, 600, 900, 1800, 3600];

/// Returns `true` if `secs` is one of [`RECOGNIZED_INTERVALS_SECS`].
#[must_use]
pub fn is_recognized_interval(secs: u64) -> bool {
    RECOGNIZED_INTERVALS_SECS.contains(&secs)
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Capture cadence and guards.
    pub capture: CaptureConfig,
    /// Near-duplicate rejection.
    pub dedup: DedupConfig,
    /// Bounded local history.
    pub history: HistoryConfig,
    /// Delivery to the remote sink.
    pub sync: SyncConfig,
    /// Staleness detection.
    pub watchdog: WatchdogConfig,
    /// Restart behaviour after process teardown.
    pub lifecycle: LifecycleConfig,
}

/// Capture scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Default cadence in seconds, used until the user picks one.
    pub interval_secs: u64,
    /// Minimum quiet window between accepted captures.
    ///
    /// Protects against overlapping timers during rapid start/stop or
    /// interval changes. Valid range: 10-30 seconds.
    pub min_capture_gap_secs: u64,
    /// Per-request position timeout. Long enough for a cold GPS fix in the
    /// background. Valid range: 15-60 seconds.
    pub position_timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            min_capture_gap_secs: 20,
            position_timeout_secs: 30,
        }
    }
}

impl CaptureConfig {
    /// Minimum gap as a [`Duration`].
    #[must_use]
    pub fn min_capture_gap(&self) -> Duration {
        Duration::from_secs(self.min_capture_gap_secs)
    }

    /// Position timeout as a [`Duration`].
    #[must_use]
    pub fn position_timeout(&self) -> Duration {
        Duration::from_secs(self.position_timeout_secs)
    }
}

/// Near-duplicate filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Coordinate tolerance in degrees (1e-5 is roughly one meter).
    pub coordinate_epsilon_deg: f64,
    /// Time window in seconds within which same-place points are duplicates.
    pub window_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            coordinate_epsilon_deg: 1e-5,
            window_secs: 45,
        }
    }
}

/// History store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of points kept, most recent first.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Endpoint receiving one JSON POST per point. Empty means not configured.
    pub endpoint_url: String,
    /// Device name sent with every point unless the capture carries a label.
    pub device_name: String,
    /// Per-request delivery timeout in seconds.
    pub request_timeout_secs: u64,
    /// Period of the background flush timer in seconds.
    pub flush_interval_secs: u64,
    /// UTC offset (minutes) used to render wire date and time. Default is IST.
    pub utc_offset_minutes: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            device_name: "Unknown Device".to_owned(),
            request_timeout_secs: 10,
            flush_interval_secs: 300,
            utc_offset_minutes: 330,
        }
    }
}

impl SyncConfig {
    /// Returns `true` when an endpoint URL is set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.endpoint_url.trim().is_empty()
    }
}

/// Staleness watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Hours without a successful delivery before an alert is raised.
    pub stale_threshold_hours: u64,
    /// Seconds between watchdog checks.
    pub check_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_threshold_hours: 7,
            check_interval_secs: 3600,
        }
    }
}

/// Lifecycle supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Delay before the host restarts the process after teardown.
    pub restart_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 1000,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| TrackerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TrackerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`<config_dir>/config.toml`).
    pub fn default_config_path() -> PathBuf {
        crate::tracker_dirs::config_file()
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !is_recognized_interval(self.capture.interval_secs) {
            return Err(TrackerError::Config(format!(
                "capture.interval_secs must be one of {RECOGNIZED_INTERVALS_SECS:?}, got {}",
                self.capture.interval_secs
            )));
        }
        if !(10..=30).contains(&self.capture.min_capture_gap_secs) {
            return Err(TrackerError::Config(format!(
                "capture.min_capture_gap_secs must be within 10..=30, got {}",
                self.capture.min_capture_gap_secs
            )));
        }
        if !(15..=60).contains(&self.capture.position_timeout_secs) {
            return Err(TrackerError::Config(format!(
                "capture.position_timeout_secs must be within 15..=60, got {}",
                self.capture.position_timeout_secs
            )));
        }
        if !(self.dedup.coordinate_epsilon_deg.is_finite()
            && self.dedup.coordinate_epsilon_deg >= 0.0)
        {
            return Err(TrackerError::Config(
                "dedup.coordinate_epsilon_deg must be a non-negative number".to_owned(),
            ));
        }
        if !(30..=60).contains(&self.dedup.window_secs) {
            return Err(TrackerError::Config(format!(
                "dedup.window_secs must be within 30..=60, got {}",
                self.dedup.window_secs
            )));
        }
        if self.history.capacity == 0 {
            return Err(TrackerError::Config(
                "history.capacity must be at least 1".to_owned(),
            ));
        }
        if self.sync.request_timeout_secs == 0 || self.sync.flush_interval_secs == 0 {
            return Err(TrackerError::Config(
                "sync timeouts and intervals must be non-zero".to_owned(),
            ));
        }
        if self.sync.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(TrackerError::Config(format!(
                "sync.utc_offset_minutes out of range: {}",
                self.sync.utc_offset_minutes
            )));
        }
        if self.watchdog.stale_threshold_hours == 0 || self.watchdog.check_interval_secs == 0 {
            return Err(TrackerError::Config(
                "watchdog threshold and interval must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}
