//! Configuration types for the terminal adapter.
//!
//! Read from the `protocols.cli.settings` section:
//!
//! ```toml
//! [protocols.cli]
//! admin = true
//!
//! [protocols.cli.settings]
//! user = "admin"
//! exit_on_eof = true
//! poll_ms = 100
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Terminal adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Id of the user every console line is attributed to.
    pub user: String,

    /// Ask the bot to stop when stdin is closed.
    pub exit_on_eof: bool,

    /// How long one `process()` call waits for a line, in milliseconds.
    pub poll_ms: u64,

    /// Lines buffered between the reader thread and the main loop.
    pub buffer: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            user: "admin".to_string(),
            exit_on_eof: true,
            poll_ms: 100,
            buffer: 64,
        }
    }
}

impl CliConfig {
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_keep_defaults() {
        let config: CliConfig = serde_json::from_value(serde_json::json!({ "user": "ops" })).unwrap();
        assert_eq!(config.user, "ops");
        assert!(config.exit_on_eof);
        assert_eq!(config.poll(), Duration::from_millis(100));
    }
}
