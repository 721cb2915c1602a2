//! Engine living in the process that hosts the tests.
//!
//! The execution engine dials the runner, answers `INFO`, runs `FIND` and
//! `RUN` requests on worker threads, and streams their results back as `MSG`
//! frames. Cancellation is cooperative: every outbound event checks whether
//! its operation has been cancelled, and producers stop once told to.

mod handlers;
mod outbound;
mod settings;
mod worker;

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::{Arc, Weak};
use std::time::Duration;

use testwire_protocol::{CloseReason, Command, FramedTransport};
use tracing::{debug, info};

use crate::diagnostics::{DiagnosticEmitter, EventRelay, RelayingDiagnostics, TracingDiagnostics};
use crate::engine::{Engine, EngineState};
use crate::errors::EngineError;
use crate::framework::TestFramework;
use crate::latch::Latch;
use crate::operations::{OperationSnapshot, OperationTracker};

use outbound::Outbound;
use worker::{OperationRuntime, WorkerSet};

pub use settings::ExecutionSettings;

pub(crate) const EXECUTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::execution");

/// Engine kind used in display names.
pub const EXECUTION_KIND: &str = "ExecutionEngine";

/// How long `start` waits for the runner to accept the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct ExecutionCore<F> {
    engine: Engine<Self>,
    runtime: Arc<OperationRuntime<F>>,
    workers: Arc<WorkerSet>,
    quit: Arc<Latch>,
    settings: ExecutionSettings,
}

/// Execution side of a testwire connection.
///
/// Dropping a live engine disposes it.
pub struct ExecutionEngine<F: TestFramework> {
    core: Arc<ExecutionCore<F>>,
}

impl<F: TestFramework> ExecutionEngine<F> {
    /// Builds an engine that logs diagnostics through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns an error when `id` cannot be used as an engine ID.
    pub fn new(
        id: impl Into<String>,
        framework: F,
        settings: ExecutionSettings,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        let local = Arc::new(TracingDiagnostics::new(format!("{EXECUTION_KIND}({id})")));
        Self::with_diagnostics(id, framework, settings, local)
    }

    /// Builds an engine that reports diagnostics to `local`.
    ///
    /// Diagnostics are also relayed to the runner as configured in
    /// [`ExecutionSettings::relay`].
    ///
    /// # Errors
    ///
    /// Returns an error when `id` cannot be used as an engine ID.
    pub fn with_diagnostics(
        id: impl Into<String>,
        framework: F,
        settings: ExecutionSettings,
        local: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        let outbound = Arc::new(Outbound::new(id.clone()));
        let relay: Arc<dyn EventRelay> = outbound.clone();
        let diagnostics: Arc<dyn DiagnosticEmitter> =
            Arc::new(RelayingDiagnostics::new(local, relay, settings.relay));

        let mut engine = Engine::new(EXECUTION_KIND, id, Arc::clone(&diagnostics))?;
        engine.register_handler(Command::Info, handlers::on_info::<F>)?;
        engine.register_handler(Command::Find, handlers::on_find::<F>)?;
        engine.register_handler(Command::Run, handlers::on_run::<F>)?;
        engine.register_handler(Command::Cancel, handlers::on_cancel::<F>)?;
        engine.register_handler(Command::Quit, handlers::on_quit::<F>)?;
        engine.register_cleanup("close transport", close_transport::<F>);
        engine.register_cleanup("cancel operations", cancel_operations::<F>);
        engine.register_cleanup("await workers", await_workers::<F>);

        let runtime = Arc::new(OperationRuntime {
            framework,
            tracker: Arc::new(OperationTracker::default()),
            outbound,
            diagnostics,
            stop_on_fail: settings.stop_on_fail,
        });
        let core = ExecutionCore {
            engine,
            runtime,
            workers: Arc::new(WorkerSet::default()),
            quit: Arc::new(Latch::default()),
            settings,
        };
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Stable engine ID.
    #[must_use]
    pub fn id(&self) -> &str {
        self.core.engine.id()
    }

    /// Display name, `ExecutionEngine({id})`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.core.engine.display_name()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.core.engine.state()
    }

    /// Connects to the runner and starts reading frames.
    ///
    /// Returns the local port of the connection.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::InvalidState`] unless the engine is
    /// `Initialized`, and with a connection or transport error when the runner
    /// cannot be reached.
    pub fn start(&self) -> Result<u16, EngineError> {
        let core = &self.core;
        let mut state = core.engine.lock_state();
        state.require(EngineState::Initialized, "start")?;
        if core.settings.port == 0 {
            return Err(EngineError::invalid_argument(
                "the runner port must be set before starting",
            ));
        }
        state.transition(EngineState::Connecting)?;

        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, core.settings.port));
        let stream = TcpStream::connect_timeout(&address, CONNECT_TIMEOUT)
            .map_err(|source| EngineError::Connect { address, source })?;
        let transport = Arc::new(FramedTransport::new(stream)?);
        let local_port = transport.local_addr()?.port();
        core.runtime.outbound.attach(Arc::clone(&transport))?;
        state.transition(EngineState::Negotiating)?;
        drop(state);

        let frames = Arc::downgrade(core);
        let closed = Arc::downgrade(core);
        transport.start(
            "testwire-reader",
            move |frame: &[u8]| {
                if let Some(core) = Weak::upgrade(&frames) {
                    core.engine.dispatch(&core, frame);
                }
            },
            move |reason| {
                if let Some(core) = Weak::upgrade(&closed) {
                    core.connection_closed(reason);
                }
            },
        )?;
        info!(
            target: EXECUTION_TARGET,
            engine = %core.engine.display_name(),
            runner = %address,
            local_port,
            protocol = %core.settings.version,
            "connected to runner"
        );
        Ok(local_port)
    }

    /// Sends `payload` as a `MSG` for `operation_id`.
    ///
    /// The frame is written either way. Returns `false` when cancellation of
    /// the operation has been requested; the caller should stop producing
    /// results for it.
    pub fn send_message(&self, operation_id: &str, payload: &[u8]) -> bool {
        self.core.runtime.send_message(operation_id, payload)
    }

    /// Routes one frame through the handler table as if it had been read
    /// from the connection.
    pub fn dispatch(&self, frame: &[u8]) {
        self.core.engine.dispatch(&self.core, frame);
    }

    /// Signal fired by `QUIT` or when the runner goes away.
    #[must_use]
    pub fn quit_signal(&self) -> Arc<Latch> {
        Arc::clone(&self.core.quit)
    }

    /// Blocks until quit is requested or `timeout` elapses. Returns whether
    /// quit was requested.
    #[must_use]
    pub fn wait_for_quit(&self, timeout: Duration) -> bool {
        self.core.quit.wait_timeout(timeout)
    }

    /// Copies the executing and cancellation-requested sets.
    #[must_use]
    pub fn operations(&self) -> OperationSnapshot {
        self.core.runtime.tracker.snapshot()
    }

    /// Tears the engine down: closes the connection, cancels outstanding
    /// operations and waits for their workers up to the grace period.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyDisposed`] on the second call.
    pub fn dispose(&self) -> Result<(), EngineError> {
        self.core.engine.dispose(&self.core)
    }
}

impl<F: TestFramework> Drop for ExecutionEngine<F> {
    fn drop(&mut self) {
        if self.core.engine.state().is_disposed() {
            return;
        }
        if let Err(error) = self.dispose() {
            debug!(target: EXECUTION_TARGET, %error, "dispose on drop failed");
        }
    }
}

impl<F: TestFramework> ExecutionCore<F> {
    fn connection_closed(&self, reason: CloseReason) {
        if reason == CloseReason::Local {
            return;
        }
        self.engine.diagnostics().diagnostic(&format!(
            "{}: runner connection closed ({reason:?}); requesting quit",
            self.engine.display_name()
        ));
        self.quit.trigger();
    }
}

fn close_transport<F: TestFramework>(core: &ExecutionCore<F>) -> Result<(), EngineError> {
    let diagnostics = core.engine.diagnostics();
    let name = core.engine.display_name();
    diagnostics.internal_diagnostic(&format!("{name}: closing connection"));
    core.runtime.outbound.close()?;
    diagnostics.internal_diagnostic(&format!("{name}: connection closed"));
    Ok(())
}

fn cancel_operations<F: TestFramework>(core: &ExecutionCore<F>) -> Result<(), EngineError> {
    let outstanding = core.runtime.tracker.request_cancel_all();
    if outstanding > 0 {
        core.engine.diagnostics().internal_diagnostic(&format!(
            "{}: cancelling {outstanding} outstanding operation(s)",
            core.engine.display_name()
        ));
    }
    Ok(())
}

fn await_workers<F: TestFramework>(core: &ExecutionCore<F>) -> Result<(), EngineError> {
    let grace = core.settings.shutdown_grace;
    match core.workers.await_idle(grace) {
        0 => Ok(()),
        _ => Err(EngineError::Timeout {
            operation: "operation workers",
            timeout: grace,
        }),
    }
}
