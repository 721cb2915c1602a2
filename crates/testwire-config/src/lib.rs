//! Layered configuration for the testwire engines.
//!
//! Values are resolved by `ortho_config` from, in increasing precedence, the
//! built-in defaults, a configuration file (`--config-path` or
//! `TESTWIRE_CONFIG_PATH`), `TESTWIRE_*` environment variables and command
//! line flags.

mod defaults;
mod logging;

use std::time::Duration;

pub use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_PORT, DEFAULT_PROTOCOL_VERSION, DEFAULT_SHUTDOWN_GRACE_MS,
    default_log_filter, default_log_filter_string, default_log_format, default_port,
    default_protocol_version, default_shutdown_grace_ms,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration shared by the runner and execution engines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TESTWIRE")]
pub struct Config {
    /// Loopback port the runner listens on and the execution side dials.
    #[serde(default = "default_port")]
    #[ortho_config(default = default_port())]
    pub port: u16,
    /// Wire protocol revision both sides must speak.
    #[serde(default = "default_protocol_version")]
    #[ortho_config(default = default_protocol_version())]
    pub protocol_version: u32,
    /// Cancel every other executing operation once a run reports failures.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub stop_on_fail: bool,
    /// Relay user-facing diagnostics to the runner as `MSG` frames.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub diagnostic_messages: bool,
    /// Relay engine-internal diagnostics to the runner as `MSG` frames.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub internal_diagnostic_messages: bool,
    /// How long teardown waits for operation workers, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    #[ortho_config(default = default_shutdown_grace_ms())]
    pub shutdown_grace_ms: u64,
    /// `tracing` filter directive.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            protocol_version: default_protocol_version(),
            stop_on_fail: false,
            diagnostic_messages: false,
            internal_diagnostic_messages: false,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loopback port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Configured protocol version number. Engines validate it on construction.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Whether failed runs cancel their sibling operations.
    #[must_use]
    pub const fn stop_on_fail(&self) -> bool {
        self.stop_on_fail
    }

    /// Whether user-facing diagnostics are relayed to the runner.
    #[must_use]
    pub const fn diagnostic_messages(&self) -> bool {
        self.diagnostic_messages
    }

    /// Whether internal diagnostics are relayed to the runner.
    #[must_use]
    pub const fn internal_diagnostic_messages(&self) -> bool {
        self.internal_diagnostic_messages
    }

    /// Grace period granted to operation workers during teardown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Log filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
