//! BDD world for the host bootstrap scenarios.

use std::cell::RefCell;
use std::sync::Arc;

use testwire_config::Config;

use crate::bootstrap::{BootstrapError, ConfigLoader, Host, StaticConfigLoader, bootstrap_with};
use crate::errors::EngineError;
use crate::execution::ExecutionEngine;

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::framework::{ScriptedFramework, suite};
use super::reporter::RecordingHealthReporter;

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    host: Option<Host>,
    bootstrap_error: Option<BootstrapError>,
    engine: Option<Result<ExecutionEngine<ScriptedFramework>, EngineError>>,
}

impl TestWorld {
    /// Builds a world whose loader reads a configuration file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::new(7400)),
            reporter: Arc::new(RecordingHealthReporter::default()),
            host: None,
            bootstrap_error: None,
            engine: None,
        }
    }

    /// Installs a loader reading a file that selects `port`.
    pub fn use_file_loader(&mut self, port: u16) {
        self.loader = Box::new(TestConfigLoader::new(port));
        self.reset_results();
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
        self.reset_results();
    }

    /// Installs a loader that returns `config` unchanged.
    pub fn use_static_loader(&mut self, config: Config) {
        self.loader = Box::new(StaticConfigLoader(config));
        self.reset_results();
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.host.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        match bootstrap_with(&*self.loader, self.reporter.clone()) {
            Ok(host) => self.host = Some(host),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Builds an execution engine through the bootstrapped host.
    pub fn build_execution_engine(&mut self, id: &str) {
        let Some(host) = self.host.as_ref() else {
            return;
        };
        self.engine = Some(host.execution_engine(id, ScriptedFramework::new(suite())));
    }

    pub fn host(&self) -> Option<&Host> {
        self.host.as_ref()
    }

    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    pub fn engine(&self) -> Option<&Result<ExecutionEngine<ScriptedFramework>, EngineError>> {
        self.engine.as_ref()
    }

    fn reset_results(&mut self) {
        self.host = None;
        self.bootstrap_error = None;
        self.engine = None;
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture used by the bootstrap scenarios.
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
