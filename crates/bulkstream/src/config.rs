//! Session configuration

use std::time::Duration;

use bulkstream_core::env::env_get_opt;
use bulkstream_core::error::ConfigError;

/// Configuration for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Seconds without read activity before the session is cancelled
    /// (default: 10, 0 disables the watchdog)
    pub timeout_secs: u64,

    /// Counter report and watchdog period (default: 1s)
    pub tick_interval: Duration,

    /// Shutdown steps to wait for cancelled transfers (default: 3)
    pub cancel_passes: u32,

    /// Max ready descriptors per step (default: 512)
    pub max_events: usize,

    /// Wait passed to the backend's event handling (default: 0, non-blocking)
    pub hardware_poll_timeout: Duration,

    /// Name of the thread-mode reactor thread
    pub thread_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            tick_interval: Duration::from_secs(1),
            cancel_passes: 3,
            max_events: 512,
            hardware_poll_timeout: Duration::ZERO,
            thread_name: "bulkstream-reactor".into(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `BULKSTREAM_TIMEOUT_SECS`, `BULKSTREAM_TICK_MS`,
    /// `BULKSTREAM_CANCEL_PASSES` and `BULKSTREAM_MAX_EVENTS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_get_opt("BULKSTREAM_TIMEOUT_SECS") {
            cfg.timeout_secs = secs;
        }
        if let Some(ms) = env_get_opt::<u64>("BULKSTREAM_TICK_MS") {
            cfg.tick_interval = Duration::from_millis(ms);
        }
        if let Some(passes) = env_get_opt("BULKSTREAM_CANCEL_PASSES") {
            cfg.cancel_passes = passes;
        }
        if let Some(n) = env_get_opt("BULKSTREAM_MAX_EVENTS") {
            cfg.max_events = n;
        }
        cfg
    }

    /// Set the inactivity timeout in seconds (0 = off)
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn tick_interval(mut self, d: Duration) -> Self {
        self.tick_interval = d;
        self
    }

    pub fn cancel_passes(mut self, n: u32) -> Self {
        self.cancel_passes = n;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn hardware_poll_timeout(mut self, d: Duration) -> Self {
        self.hardware_poll_timeout = d;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval must be non-zero"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be at least 1"));
        }
        if self.cancel_passes > i32::MAX as u32 {
            return Err(ConfigError::Invalid("cancel_passes is too large"));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty"));
        }
        Ok(())
    }
}
