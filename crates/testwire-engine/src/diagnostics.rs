//! Diagnostic sinks and the relay that turns diagnostics into protocol traffic.

use std::sync::Arc;

use testwire_protocol::EngineEvent;
use tracing::{debug, info};

const DIAGNOSTICS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::diagnostics");

/// Receives diagnostics raised by an engine.
///
/// `diagnostic` carries messages meant for the person running the tests;
/// `internal_diagnostic` carries engine bookkeeping such as state transitions
/// and rejected frames.
pub trait DiagnosticEmitter: Send + Sync {
    /// Records a user-facing diagnostic.
    fn diagnostic(&self, message: &str);

    /// Records a diagnostic about engine internals.
    fn internal_diagnostic(&self, message: &str);
}

impl<T> DiagnosticEmitter for Arc<T>
where
    T: DiagnosticEmitter + ?Sized,
{
    fn diagnostic(&self, message: &str) {
        (**self).diagnostic(message);
    }

    fn internal_diagnostic(&self, message: &str) {
        (**self).internal_diagnostic(message);
    }
}

/// Forwards an engine event to the peer as protocol traffic.
pub trait EventRelay: Send + Sync {
    /// Sends `event` if a connection is available. Failures are swallowed.
    fn relay(&self, event: &EngineEvent);
}

/// Emitter that writes diagnostics to `tracing`.
#[derive(Debug, Clone)]
pub struct TracingDiagnostics {
    source: String,
}

impl TracingDiagnostics {
    /// Builds an emitter that tags every event with `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl DiagnosticEmitter for TracingDiagnostics {
    fn diagnostic(&self, message: &str) {
        info!(target: DIAGNOSTICS_TARGET, source = %self.source, "{message}");
    }

    fn internal_diagnostic(&self, message: &str) {
        debug!(
            target: DIAGNOSTICS_TARGET,
            source = %self.source,
            internal = true,
            "{message}"
        );
    }
}

/// Which diagnostic families are relayed to the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayFlags {
    /// Relay user-facing diagnostics.
    pub diagnostics: bool,
    /// Relay internal diagnostics.
    pub internal: bool,
}

impl RelayFlags {
    /// Relays nothing.
    pub const NONE: Self = Self {
        diagnostics: false,
        internal: false,
    };

    /// Relays both families.
    pub const ALL: Self = Self {
        diagnostics: true,
        internal: true,
    };
}

/// Emitter that records locally and optionally relays to the peer.
pub struct RelayingDiagnostics {
    local: Arc<dyn DiagnosticEmitter>,
    relay: Arc<dyn EventRelay>,
    flags: RelayFlags,
}

impl RelayingDiagnostics {
    /// Composes a local sink with a relay.
    #[must_use]
    pub fn new(
        local: Arc<dyn DiagnosticEmitter>,
        relay: Arc<dyn EventRelay>,
        flags: RelayFlags,
    ) -> Self {
        Self {
            local,
            relay,
            flags,
        }
    }
}

impl DiagnosticEmitter for RelayingDiagnostics {
    fn diagnostic(&self, message: &str) {
        self.local.diagnostic(message);
        if self.flags.diagnostics {
            self.relay.relay(&EngineEvent::Diagnostic {
                message: message.to_owned(),
            });
        }
    }

    fn internal_diagnostic(&self, message: &str) {
        self.local.internal_diagnostic(message);
        if self.flags.internal {
            self.relay.relay(&EngineEvent::InternalDiagnostic {
                message: message.to_owned(),
            });
        }
    }
}
