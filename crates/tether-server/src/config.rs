//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_common::transport::DEFAULT_MAX_FRAME_SIZE;

/// Default idle window before a connection is reaped (2 minutes).
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(120);

/// Default interval between idle-connection scans (5 seconds).
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Server settings.
///
/// # Fields
///
/// - `keep_alive` - Idle time since the last written response after which a
///   connection with nothing in flight is closed (default: 2 minutes, zero
///   disables reaping)
/// - `scan_interval` - How often connections are checked (default: 5 seconds)
/// - `max_frame_size` - Largest frame body read or written (default: 10 MiB)
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tether_server::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_keep_alive(Duration::from_secs(30))
///     .with_scan_interval(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub keep_alive: Duration,
    pub scan_interval: Duration,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Whether idle connections are closed at all.
    pub fn reaping_enabled(&self) -> bool {
        !self.keep_alive.is_zero()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Reaping is enabled with a zero scan interval
    /// - The frame size is zero or does not fit the 4-byte length prefix
    pub fn validate(&self) -> Result<(), String> {
        if self.reaping_enabled() && self.scan_interval.is_zero() {
            return Err("scan interval must be greater than zero".to_string());
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(format!(
                "max frame size must be between 1 and {} bytes (got {})",
                u32::MAX,
                self.max_frame_size
            ));
        }
        Ok(())
    }
}
