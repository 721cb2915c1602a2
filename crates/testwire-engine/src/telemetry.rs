//! Log output for processes embedding an engine.
//!
//! Engines only emit `tracing` events. A host that wants them on stderr calls
//! [`initialise`] once it has resolved its [`Config`]; [`crate::bootstrap_with`]
//! does this for it.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use testwire_config::{Config, LogFormat};

/// Format of the subscriber this process installed, set by the first
/// successful [`initialise`].
static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Proof that engine logs are being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Output format in effect. Set by whichever caller installed the
    /// subscriber, which may not match a later caller's configuration.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}

/// Why log output could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `log_filter` is not a valid `tracing` directive list.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Something other than this module already owns the global subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Sends engine logs to stderr in the configured format.
///
/// Only the first successful call installs anything. Later calls hand back a
/// handle describing the subscriber already in place, so a host that builds
/// several engines need not track whether logging is set up.
///
/// # Examples
///
/// ```rust
/// use testwire_config::Config;
/// use testwire_engine::telemetry;
///
/// # fn main() -> Result<(), testwire_engine::telemetry::TelemetryError> {
/// let config = Config::default();
/// let handle = telemetry::initialise(&config)?;
/// assert_eq!(telemetry::initialise(&config)?, handle);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// [`TelemetryError::Filter`] when `log_filter` does not parse, and
/// [`TelemetryError::Subscriber`] when another subscriber got there first.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install_subscriber(config).map(|()| config.log_format()))
        .map(|format| TelemetryHandle { format: *format })
}

fn parse_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives).map_err(|error| TelemetryError::Filter(error.to_string()))
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("info")]
    #[case("testwire_engine::execution=debug,warn")]
    fn directive_lists_parse(#[case] directives: &str) {
        assert!(parse_filter(directives).is_ok());
    }

    #[rstest]
    #[case("testwire=verbose")]
    #[case("info,testwire=loud")]
    fn malformed_filters_are_rejected(#[case] directives: &str) {
        let config = Config {
            log_filter: directives.to_owned(),
            ..Config::default()
        };
        let error = install_subscriber(&config).expect_err("malformed filter");
        assert!(matches!(error, TelemetryError::Filter(_)));
    }
}
