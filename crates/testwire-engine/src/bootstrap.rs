//! Host bootstrap: configuration, telemetry, and engine construction.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use testwire_config::{Config, OrthoConfig};
use testwire_protocol::{ProtocolVersion, VersionError};

use crate::errors::EngineError;
use crate::execution::{ExecutionEngine, ExecutionSettings};
use crate::framework::TestFramework;
use crate::health::HealthReporter;
use crate::runner::{RunnerEngine, RunnerListener, RunnerSettings};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the host configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's aggregated error when any layer is invalid.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader(pub Config);

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.0.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The configured protocol version is not spoken by this build.
    #[error("unusable protocol configuration: {source}")]
    Protocol {
        /// Underlying version error.
        #[source]
        source: VersionError,
    },
}

/// Result of a successful bootstrap: resolved configuration plus factories
/// for engines built from it.
pub struct Host {
    config: Config,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Host {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Builds an execution engine that dials the configured runner port.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine ID is unusable.
    pub fn execution_engine<F: TestFramework>(
        &self,
        id: &str,
        framework: F,
    ) -> Result<ExecutionEngine<F>, EngineError> {
        let built = ExecutionSettings::from_config(&self.config)
            .and_then(|settings| ExecutionEngine::new(id, framework, settings));
        self.report(built, |engine| engine.display_name())
    }

    /// Builds a runner engine that listens on the configured port.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine ID is unusable.
    pub fn runner_engine<L: RunnerListener>(
        &self,
        id: &str,
        listener: L,
    ) -> Result<RunnerEngine<L>, EngineError> {
        let built = RunnerSettings::from_config(&self.config)
            .and_then(|settings| RunnerEngine::new(id, listener, settings));
        self.report(built, |engine| engine.display_name())
    }

    fn report<E>(
        &self,
        built: Result<E, EngineError>,
        display_name: impl FnOnce(&E) -> &str,
    ) -> Result<E, EngineError> {
        match &built {
            Ok(engine) => self.reporter.engine_ready(display_name(engine)),
            Err(error) => self.reporter.engine_failed(error),
        }
        built
    }
}

/// Bootstraps an engine host using the supplied collaborators.
///
/// # Errors
///
/// Returns a [`BootstrapError`] when configuration, telemetry or the
/// protocol version is unusable. Every failure is also reported to
/// `reporter`.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Host, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    if let Err(source) = ProtocolVersion::try_from(config.protocol_version()) {
        let error = BootstrapError::Protocol { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    reporter.bootstrap_succeeded(&config);
    Ok(Host {
        config,
        telemetry,
        reporter,
    })
}
