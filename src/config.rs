//! Poller configuration.

use std::time::Duration;

use crate::driver::cache::POLL_BLOCK_SIZE;

/// Maximum number of kernel events drained per wait call.
pub const DEFAULT_EVENTS: usize = 1024;

/// Tuning knobs for a [`Driver`].
///
/// The process-wide driver behind [`listen_conn_state`] always uses
/// `Config::default()`.
///
/// ```
/// use std::time::Duration;
/// use connstate::Config;
///
/// let config = Config::default()
///     .poll_timeout(Some(Duration::from_millis(20)))
///     .thread_name("pool-liveness");
/// assert_eq!(config.events, 1024);
/// assert_eq!(config.poll_timeout, Some(Duration::from_millis(20)));
/// ```
///
/// The fields are public, so struct-update syntax works as well.
///
/// [`Driver`]: driver/struct.Driver.html
/// [`listen_conn_state`]: fn.listen_conn_state.html
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the event buffer handed to the kernel.
    pub events: usize,
    /// Upper bound on one wait call. Every wait that returns, with or without
    /// events, counts as a completed pass for record reclamation, so `None`
    /// delays reuse of released records until the next peer close.
    pub poll_timeout: Option<Duration>,
    /// Approximate size in bytes of one descriptor-record arena block.
    pub block_bytes: usize,
    /// Name of the background poller thread.
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            events: DEFAULT_EVENTS,
            poll_timeout: Some(Duration::from_millis(100)),
            block_bytes: POLL_BLOCK_SIZE,
            thread_name: "connstate-poller".to_string(),
        }
    }
}

impl Config {
    /// Sets the capacity of the event buffer. Zero is raised to one.
    pub fn events(mut self, events: usize) -> Self {
        self.events = events.max(1);
        self
    }

    /// Sets the upper bound on one wait call.
    pub fn poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the approximate size of one arena block, in bytes.
    pub fn block_bytes(mut self, bytes: usize) -> Self {
        self.block_bytes = bytes;
        self
    }

    /// Sets the name of the background poller thread.
    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.thread_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_override_defaults() {
        let config = Config::default()
            .events(0)
            .poll_timeout(None)
            .block_bytes(512)
            .thread_name("liveness");

        assert_eq!(config.events, 1);
        assert_eq!(config.poll_timeout, None);
        assert_eq!(config.block_bytes, 512);
        assert_eq!(config.thread_name, "liveness");
    }

    #[test]
    fn default_matches_setters_on_default() {
        let config = Config::default()
            .events(DEFAULT_EVENTS)
            .poll_timeout(Some(Duration::from_millis(100)))
            .block_bytes(POLL_BLOCK_SIZE)
            .thread_name("connstate-poller");
        assert_eq!(config, Config::default());
    }
}
