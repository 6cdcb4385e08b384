//! Tunables of the monitor, stored as a [ron] file. Every field is optional
//! in the file; missing fields take the defaults below, so an empty `()`
//! file is a valid configuration:
//!
//! ```text
//! (
//!     baud_rate: 115200,
//!     duplicate_threshold_secs: 5,
//!     warning_threshold_secs: 120,
//! )
//! ```

use crate::error::QubeError;

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Runtime configuration for the serial link, the status board and the
/// activity log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Baud rate of the receiver's serial link.
    pub baud_rate: u32,
    /// How long one blocking read on the port may take, in milliseconds.
    pub read_timeout_ms: u64,
    /// Reopen the port this often no matter what; 0 disables it.
    pub reconnect_interval_secs: u64,
    /// Silence after which a health warning is logged.
    pub heartbeat_warning_secs: u64,
    /// Silence after which the port is reopened.
    pub heartbeat_reconnect_secs: u64,
    /// How often a health check write is sent to the port.
    pub connection_test_secs: u64,
    /// How often the link health is evaluated.
    pub health_check_secs: u64,
    /// Same-status repeats younger than this are dropped as duplicates.
    pub duplicate_threshold_secs: u64,
    /// An open request older than this is shown as a warning.
    pub warning_threshold_secs: u64,
    /// An open request older than this is shown as critical.
    pub critical_threshold_secs: u64,
    /// Activity log entries kept in memory.
    pub max_log_entries: usize,
    /// Activity log entries shown on screen.
    pub log_display_entries: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            read_timeout_ms: 1000,
            reconnect_interval_secs: 180,
            heartbeat_warning_secs: 40,
            heartbeat_reconnect_secs: 90,
            connection_test_secs: 60,
            health_check_secs: 10,
            duplicate_threshold_secs: 5,
            warning_threshold_secs: 120,
            critical_threshold_secs: 300,
            max_log_entries: 1000,
            log_display_entries: 200,
        }
    }
}

impl MonitorConfig {
    /// Reads a configuration from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, QubeError> {
        let text = fs::read_to_string(path)?;
        Ok(ron::from_str(&text)?)
    }

    /// Writes this configuration to a RON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), QubeError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    /// How long one read on the port may block.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// `None` when the periodic reconnect is disabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        (self.reconnect_interval_secs > 0).then(|| Duration::from_secs(self.reconnect_interval_secs))
    }

    /// Silence before a health warning.
    pub fn heartbeat_warning(&self) -> Duration {
        Duration::from_secs(self.heartbeat_warning_secs)
    }

    /// Silence before the port is reopened.
    pub fn heartbeat_reconnect(&self) -> Duration {
        Duration::from_secs(self.heartbeat_reconnect_secs)
    }

    /// Time between two connection tests.
    pub fn connection_test(&self) -> Duration {
        Duration::from_secs(self.connection_test_secs)
    }

    /// Time between two health checks.
    pub fn health_check(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }

    /// Window in which a repeated status is a duplicate.
    pub fn duplicate_threshold(&self) -> Duration {
        Duration::from_secs(self.duplicate_threshold_secs)
    }
}
