//! Connection engines for the testwire runner/execution protocol.
//!
//! A test *runner* and an *execution* process talk over one loopback TCP
//! connection using the line framing in [`testwire_protocol`]. Both sides are
//! built on the same [`Engine`]: a monotonic lifecycle state machine, a table
//! of command handlers, and an ordered teardown sequence.
//!
//! The [`ExecutionEngine`] connects to the runner, answers `INFO`, and runs
//! `FIND` and `RUN` requests against a [`TestFramework`] on worker threads,
//! streaming every result back as a `MSG`. Cancellation is cooperative and
//! scoped to one operation ID; with stop-on-fail enabled, a failing run
//! cancels every other executing operation.
//!
//! The [`RunnerEngine`] is the peer: it listens, negotiates, issues requests,
//! and forwards streamed events to a [`RunnerListener`].
//!
//! Hosts typically call [`bootstrap_with`] first, which resolves
//! [`testwire_config::Config`], installs structured telemetry, and reports
//! lifecycle events through a [`HealthReporter`].

mod bootstrap;
mod diagnostics;
mod engine;
mod errors;
mod execution;
mod framework;
mod health;
mod latch;
mod operations;
mod runner;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Host, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use diagnostics::{
    DiagnosticEmitter, EventRelay, RelayFlags, RelayingDiagnostics, TracingDiagnostics,
};
pub use engine::{CommandHandler, Engine, EngineState, StateLock};
pub use errors::{CommandError, EngineError};
pub use execution::{CONNECT_TIMEOUT, EXECUTION_KIND, ExecutionEngine, ExecutionSettings};
pub use framework::{FrameworkError, TestFramework};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use latch::Latch;
pub use operations::{OperationContext, OperationKind, OperationSnapshot, OperationTracker};
pub use runner::{RUNNER_KIND, RunnerEngine, RunnerListener, RunnerSettings};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
