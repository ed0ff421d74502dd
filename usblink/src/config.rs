//! Session configuration.

use std::time::Duration;

/// Baud rate used when `connect` is called without one.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Timeout applied to every `write`.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Read poll interval of the I/O relay.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Size of the relay read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Poll interval of the native hot-plug watcher.
pub const DEFAULT_HOTPLUG_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Baud rate used when `connect` is called without one.
    pub default_baud: u32,
    /// Bounded time for a single `write`.
    pub write_timeout: Duration,
    /// Read timeout of the relay loop; bounds how long a stop takes.
    pub read_timeout: Duration,
    /// Maximum chunk size delivered in one `Data` event.
    pub read_buffer_size: usize,
    /// Poll interval for hosts that detect hot-plug by polling.
    pub hotplug_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_baud: DEFAULT_BAUD_RATE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            hotplug_interval: DEFAULT_HOTPLUG_INTERVAL,
        }
    }
}

impl SessionConfig {
    /// Set the default baud rate.
    #[must_use]
    pub fn with_default_baud(mut self, baud: u32) -> Self {
        self.default_baud = baud;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the relay read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the relay buffer size (clamped to at least 1 byte).
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the hot-plug poll interval.
    #[must_use]
    pub fn with_hotplug_interval(mut self, interval: Duration) -> Self {
        self.hotplug_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.default_baud, 115200);
        assert_eq!(config.write_timeout, Duration::from_secs(1));
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::default()
            .with_default_baud(9600)
            .with_write_timeout(Duration::from_millis(250))
            .with_read_buffer_size(0);

        assert_eq!(config.default_baud, 9600);
        assert_eq!(config.write_timeout, Duration::from_millis(250));
        assert_eq!(config.read_buffer_size, 1);
    }
}
