//! Reader registry configuration.

use std::time::Duration;

/// Settings applied to every device reader call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Upper bound for a single device read. `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
}

impl ReaderConfig {
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}
