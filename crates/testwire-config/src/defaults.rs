use crate::logging::LogFormat;

/// Port used when none is configured. Zero lets the runner bind an ephemeral
/// port; the execution side must always be told a real one.
pub const DEFAULT_PORT: u16 = 0;

/// Wire protocol revision spoken by default.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;

/// How long teardown waits for operation workers, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Default log filter expression used by the engines.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default port.
#[must_use]
pub const fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Default protocol version number.
#[must_use]
pub const fn default_protocol_version() -> u32 {
    DEFAULT_PROTOCOL_VERSION
}

/// Default shutdown grace period in milliseconds.
#[must_use]
pub const fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
