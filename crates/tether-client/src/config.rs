//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_common::transport::DEFAULT_MAX_FRAME_SIZE;

/// Default connect timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-call timeout (5 seconds).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of connect attempts before the connector gives up.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Settings shared by a connector and the sessions it creates.
///
/// # Fields
///
/// - `connect_timeout` - Maximum time for one TCP connect (default: 5 seconds)
/// - `call_timeout` - Time a call waits for its response after the request
///   was written (default: 5 seconds)
/// - `max_connect_attempts` - Attempts allowed without a success in between
///   (default: 10)
/// - `max_frame_size` - Largest frame body sent or accepted (default: 10 MiB)
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tether_client::ClientConfig;
///
/// let config = ClientConfig::new()
///     .with_call_timeout(Duration::from_secs(1))
///     .with_max_connect_attempts(3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub max_connect_attempts: u32,
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found:
    /// - a zero connect or call timeout
    /// - zero connect attempts
    /// - a frame size that is zero or does not fit the 4-byte length prefix
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect timeout must be greater than zero".to_string());
        }
        if self.call_timeout.is_zero() {
            return Err("call timeout must be greater than zero".to_string());
        }
        if self.max_connect_attempts == 0 {
            return Err("max connect attempts must be at least 1".to_string());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout.as_secs(), 5);
        assert_eq!(config.call_timeout.as_secs(), 5);
        assert_eq!(config.max_connect_attempts, 10);
        assert_eq!(config.max_frame_size, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = ClientConfig::new()
            .with_connect_timeout(Duration::from_millis(250))
            .with_call_timeout(Duration::from_secs(1))
            .with_max_connect_attempts(3)
            .with_max_frame_size(4096);

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.call_timeout, Duration::from_secs(1));
        assert_eq!(config.max_connect_attempts, 3);
        assert_eq!(config.max_frame_size, 4096);
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let err = ClientConfig::new()
            .with_call_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.contains("call timeout"));
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        assert!(ClientConfig::new()
            .with_max_connect_attempts(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_frame_size_bounds() {
        assert!(ClientConfig::new().with_max_frame_size(0).validate().is_err());
        assert!(ClientConfig::new().with_max_frame_size(1).validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"max_connect_attempts": 2}"#).unwrap();
        assert_eq!(config.max_connect_attempts, 2);
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
    }
}
