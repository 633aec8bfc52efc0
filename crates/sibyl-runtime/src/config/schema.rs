//! Configuration schema definitions.
//!
//! ```toml
//! [bot]
//! nick = "SibylBot"
//! cmd_prefix = "!"
//! only_direct = true
//!
//! [logging]
//! level = "debug"
//!
//! [permissions]
//! rules = ["allow * *", "deny user:mallory@example.org *"]
//!
//! [aliases]
//! hi = "echo hello $1"
//!
//! [protocols.cli]
//! admin = true
//!
//! [plugins.dice]
//! max_sides = 100
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sibyl_framework::DispatchSettings;

use crate::outbox::OutboxLimits;
use crate::scheduler::SchedulerSettings;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SibylConfig {
    pub bot: BotConfig,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub outbox: OutboxConfig,
    pub permissions: PermissionsConfig,
    /// Alias name → command line template.
    pub aliases: BTreeMap<String, String>,
    /// Trigger name → fixed reply.
    pub triggers: BTreeMap<String, String>,
    /// Old command name → new command name.
    pub renames: BTreeMap<String, String>,
    pub state: StateConfig,
    /// Protocol name → protocol section.
    pub protocols: BTreeMap<String, ProtocolConfig>,
    /// Plugin name → arbitrary plugin section.
    pub plugins: BTreeMap<String, serde_json::Value>,
}

// =============================================================================
// [bot]
// =============================================================================

/// Identity and dispatch behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub nick: String,
    pub cmd_prefix: Option<String>,
    pub only_direct: bool,
    pub enable_ctrl: bool,
    pub verbose_errors: bool,
    /// Keep per-user history for `redo` and `last`.
    pub history: bool,
    pub alias_depth: usize,
    pub unknown_reply: String,
    pub error_reply: String,
    pub denied_reply: String,
    pub ctrl_disabled_reply: String,
    /// Commands switched off at startup.
    pub disabled: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        let d = DispatchSettings::default();
        Self {
            nick: "SibylBot".to_string(),
            cmd_prefix: d.cmd_prefix,
            only_direct: d.only_direct,
            enable_ctrl: d.enable_ctrl,
            verbose_errors: d.verbose_errors,
            history: d.history,
            alias_depth: d.alias_depth,
            unknown_reply: d.unknown_reply,
            error_reply: d.error_reply,
            denied_reply: d.denied_reply,
            ctrl_disabled_reply: d.ctrl_disabled_reply,
            disabled: Vec::new(),
        }
    }
}

impl BotConfig {
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            cmd_prefix: self.cmd_prefix.clone().filter(|p| !p.is_empty()),
            only_direct: self.only_direct,
            enable_ctrl: self.enable_ctrl,
            verbose_errors: self.verbose_errors,
            history: self.history,
            alias_depth: self.alias_depth,
            unknown_reply: self.unknown_reply.clone(),
            error_reply: self.error_reply.clone(),
            denied_reply: self.denied_reply.clone(),
            ctrl_disabled_reply: self.ctrl_disabled_reply.clone(),
        }
    }
}

// =============================================================================
// [logging]
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation policy of the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Required when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file and line of each event.
    pub file_location: bool,
    /// Per-module levels, e.g. `sibyl_runtime = "debug"`.
    pub filters: BTreeMap<String, LogLevel>,
}

// =============================================================================
// [scheduler] / [outbox]
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval of the idle tick, which runs idle hooks and flushes requeued
    /// messages.
    pub tick_ms: u64,
    /// How long one main loop iteration waits when nothing happens.
    pub poll_ms: u64,
    /// Wall-clock budget of one idle hook run.
    pub idle_budget_ms: u64,
    /// Over-budget runs tolerated before an idle hook is disabled.
    pub max_overruns: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            poll_ms: 100,
            idle_budget_ms: 1000,
            max_overruns: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            budget: Duration::from_millis(self.idle_budget_ms),
            max_overruns: self.max_overruns,
        }
    }
}

/// Ceilings of the deferred send queue; `0` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub max_total: usize,
    pub max_per_protocol: usize,
    pub max_per_room: usize,
    pub max_per_user: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_total: 100,
            max_per_protocol: 50,
            max_per_room: 20,
            max_per_user: 10,
        }
    }
}

impl OutboxConfig {
    pub fn limits(&self) -> OutboxLimits {
        OutboxLimits {
            max_total: self.max_total,
            max_per_protocol: self.max_per_protocol,
            max_per_room: self.max_per_room,
            max_per_user: self.max_per_user,
        }
    }
}

// =============================================================================
// [permissions] / [state]
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Ordered `"<allow|deny> <subject> <command>"` lines.
    pub rules: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            rules: vec!["allow * *".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding `aliases.json`.
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./sibyl_data"),
        }
    }
}

// =============================================================================
// [protocols.<name>]
// =============================================================================

/// A room joined after every successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub enabled: bool,
    /// Users of an admin protocol bypass permission rules.
    pub admin: bool,
    /// Fixed wait before reconnecting.
    pub reconnect_wait_secs: u64,
    /// Upper bound of one `process()` call; exceeding it counts as a ping
    /// timeout.
    pub process_timeout_ms: u64,
    pub rooms: Vec<RoomConfig>,
    /// Adapter-specific settings, deserialized into the adapter's config type.
    pub settings: serde_json::Value,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin: false,
            reconnect_wait_secs: 30,
            process_timeout_ms: 5000,
            rooms: Vec::new(),
            settings: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl ProtocolConfig {
    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_secs(self.reconnect_wait_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }
}
