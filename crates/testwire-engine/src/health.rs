//! Structured health reporting for host and engine lifecycle events.

use std::sync::Arc;

use testwire_config::Config;

use crate::bootstrap::BootstrapError;
use crate::errors::EngineError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after an engine has been built from the host configuration.
    fn engine_ready(&self, display_name: &str);

    /// Invoked when building an engine fails.
    fn engine_failed(&self, error: &EngineError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn engine_ready(&self, display_name: &str) {
        (**self).engine_ready(display_name);
    }

    fn engine_failed(&self, error: &EngineError) {
        (**self).engine_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting engine host bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            port = config.port(),
            protocol_version = config.protocol_version(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "engine host bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "engine host bootstrap failed"
        );
    }

    fn engine_ready(&self, display_name: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "engine_ready",
            engine = display_name,
            "engine ready"
        );
    }

    fn engine_failed(&self, error: &EngineError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "engine_failed",
            error = %error,
            "engine could not be built"
        );
    }
}
