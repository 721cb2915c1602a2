//! Test double for [`HealthReporter`] that records structured events for
//! assertions.

use std::sync::Mutex;

use testwire_config::Config;

use crate::bootstrap::BootstrapError;
use crate::errors::EngineError;
use crate::health::HealthReporter;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed with the resolved port.
    BootstrapSucceeded { port: u16 },
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// An engine was built.
    EngineReady(String),
    /// Building an engine failed.
    EngineFailed(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded {
            port: config.port(),
        });
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn engine_ready(&self, display_name: &str) {
        self.record(HealthEvent::EngineReady(display_name.to_owned()));
    }

    fn engine_failed(&self, error: &EngineError) {
        self.record(HealthEvent::EngineFailed(error.to_string()));
    }
}
