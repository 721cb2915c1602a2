use std::time::Duration;

use testwire_config::Config;
use testwire_protocol::ProtocolVersion;

use crate::diagnostics::RelayFlags;
use crate::errors::EngineError;

/// Tunables for an execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    /// Loopback port of the runner.
    pub port: u16,
    /// Cancel sibling operations once a run reports failures.
    pub stop_on_fail: bool,
    /// Diagnostics relayed to the runner.
    pub relay: RelayFlags,
    /// How long teardown waits for operation workers.
    pub shutdown_grace: Duration,
    /// Protocol version spoken on the connection.
    pub version: ProtocolVersion,
}

impl ExecutionSettings {
    /// Settings for dialling `port` with every other value at its default.
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            stop_on_fail: false,
            relay: RelayFlags::NONE,
            shutdown_grace: Duration::from_millis(testwire_config::DEFAULT_SHUTDOWN_GRACE_MS),
            version: ProtocolVersion::CURRENT,
        }
    }

    /// Derives settings from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Version`] when the configured protocol version
    /// is not supported.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        Ok(Self {
            port: config.port(),
            stop_on_fail: config.stop_on_fail(),
            relay: RelayFlags {
                diagnostics: config.diagnostic_messages(),
                internal: config.internal_diagnostic_messages(),
            },
            shutdown_grace: config.shutdown_grace(),
            version: ProtocolVersion::try_from(config.protocol_version())?,
        })
    }

    /// Enables or disables stop-on-fail.
    #[must_use]
    pub const fn with_stop_on_fail(mut self, stop_on_fail: bool) -> Self {
        self.stop_on_fail = stop_on_fail;
        self
    }

    /// Chooses which diagnostics are relayed.
    #[must_use]
    pub const fn with_relay(mut self, relay: RelayFlags) -> Self {
        self.relay = relay;
        self
    }

    /// Sets the teardown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
