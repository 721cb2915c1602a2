//! Engine living in the runner process.
//!
//! The runner listens on loopback, waits for the execution engine to connect,
//! negotiates with `INFO`, and then issues `FIND`, `RUN`, `CANCEL` and `QUIT`.
//! Every `MSG` the execution side streams back is handed to a
//! [`RunnerListener`].

mod acceptor;
mod handlers;

use std::collections::BTreeSet;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use testwire_config::Config;
use testwire_protocol::framing::{self, Command};
use testwire_protocol::{
    CloseReason, FramedTransport, InfoPayload, ProtocolVersion, TestFilter, TransportError,
};
use tracing::{debug, info};

use crate::diagnostics::{DiagnosticEmitter, TracingDiagnostics};
use crate::engine::{Engine, EngineState};
use crate::errors::EngineError;
use crate::latch::Latch;

use acceptor::{Acceptor, AcceptorHandle};

pub(crate) const RUNNER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runner");

/// Engine kind used in display names.
pub const RUNNER_KIND: &str = "RunnerEngine";

/// Receives everything the execution side reports.
///
/// Callbacks run on the connection's reader thread, in arrival order.
pub trait RunnerListener: Send + Sync + 'static {
    /// Negotiation finished.
    fn on_info(&self, _info: &InfoPayload) {}

    /// One `MSG` arrived for `operation_id`.
    fn on_message(&self, operation_id: &str, payload: &[u8]);

    /// A terminal event ended an operation this runner issued.
    fn on_operation_complete(&self, _operation_id: &str) {}

    /// The execution side closed the connection.
    fn on_disconnected(&self) {}
}

/// Tunables for a runner engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Loopback port to listen on; 0 picks a free port.
    pub port: u16,
    /// Protocol version spoken on the connection.
    pub version: ProtocolVersion,
}

impl RunnerSettings {
    /// Settings for listening on `port`.
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            port,
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
            version: ProtocolVersion::try_from(config.protocol_version())?,
        })
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::new(0)
    }
}

pub(crate) struct RunnerCore<L> {
    engine: Engine<Self>,
    listener: L,
    settings: RunnerSettings,
    transport: OnceCell<Arc<FramedTransport>>,
    info: OnceCell<InfoPayload>,
    connected: Latch,
    pending: Mutex<BTreeSet<String>>,
    acceptor: Mutex<Option<AcceptorHandle>>,
}

/// Runner side of a testwire connection.
///
/// Dropping a live engine disposes it.
pub struct RunnerEngine<L: RunnerListener> {
    core: Arc<RunnerCore<L>>,
}

impl<L: RunnerListener> RunnerEngine<L> {
    /// Builds a runner that logs diagnostics through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns an error when `id` cannot be used as an engine ID.
    pub fn new(
        id: impl Into<String>,
        listener: L,
        settings: RunnerSettings,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        let diagnostics = Arc::new(TracingDiagnostics::new(format!("{RUNNER_KIND}({id})")));
        Self::with_diagnostics(id, listener, settings, diagnostics)
    }

    /// Builds a runner that reports diagnostics to `diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns an error when `id` cannot be used as an engine ID.
    pub fn with_diagnostics(
        id: impl Into<String>,
        listener: L,
        settings: RunnerSettings,
        diagnostics: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, EngineError> {
        let mut engine = Engine::new(RUNNER_KIND, id, diagnostics)?;
        engine.register_handler(Command::Info, handlers::on_info::<L>)?;
        engine.register_handler(Command::Msg, handlers::on_msg::<L>)?;
        engine.register_cleanup("stop accepting", stop_accepting::<L>);
        engine.register_cleanup("close transport", close_transport::<L>);

        let core = RunnerCore {
            engine,
            listener,
            settings,
            transport: OnceCell::new(),
            info: OnceCell::new(),
            connected: Latch::default(),
            pending: Mutex::new(BTreeSet::new()),
            acceptor: Mutex::new(None),
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

    /// Display name, `RunnerEngine({id})`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.core.engine.display_name()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.core.engine.state()
    }

    /// The listener receiving execution events.
    #[must_use]
    pub fn listener(&self) -> &L {
        &self.core.listener
    }

    /// Binds the loopback listener and starts waiting for the execution side.
    ///
    /// Returns the bound port, which the execution engine must dial.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::InvalidState`] unless the engine is
    /// `Initialized`, and with [`EngineError::Bind`] when the port is taken.
    pub fn start(&self) -> Result<u16, EngineError> {
        let core = &self.core;
        let mut state = core.engine.lock_state();
        state.require(EngineState::Initialized, "start")?;
        let acceptor = Acceptor::bind(core.settings.port)?;
        let port = acceptor.local_addr().port();
        state.transition(EngineState::Connecting)?;

        let weak = Arc::downgrade(core);
        let handle = acceptor.start(move |stream| {
            if let Some(core) = Weak::upgrade(&weak) {
                core.accepted(stream);
            }
        })?;
        *core.acceptor() = Some(handle);
        drop(state);
        Ok(port)
    }

    /// Blocks until negotiation completes or `timeout` elapses. Returns
    /// whether the engine is connected.
    #[must_use]
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.core.connected.wait_timeout(timeout)
    }

    /// What the execution side reported during negotiation.
    #[must_use]
    pub fn info(&self) -> Option<&InfoPayload> {
        self.core.info.get()
    }

    /// Operations issued by this runner that have not ended yet.
    #[must_use]
    pub fn pending_operations(&self) -> BTreeSet<String> {
        self.core.pending().clone()
    }

    /// Asks the execution side to discover tests.
    ///
    /// # Errors
    ///
    /// Fails unless the engine is `Connected`, when `operation_id` is already
    /// pending or unusable, or when the frame cannot be written.
    pub fn find(&self, operation_id: &str, filter: &TestFilter) -> Result<(), EngineError> {
        self.issue(Command::Find, operation_id, filter)
    }

    /// Asks the execution side to run tests.
    ///
    /// # Errors
    ///
    /// Fails unless the engine is `Connected`, when `operation_id` is already
    /// pending or unusable, or when the frame cannot be written.
    pub fn run(&self, operation_id: &str, filter: &TestFilter) -> Result<(), EngineError> {
        self.issue(Command::Run, operation_id, filter)
    }

    /// Requests cancellation of an operation.
    ///
    /// # Errors
    ///
    /// Fails unless the engine is `Connected` or when the frame cannot be
    /// written.
    pub fn cancel(&self, operation_id: &str) -> Result<(), EngineError> {
        self.core.require_connected("cancel")?;
        let frame = framing::encode_operation(Command::Cancel, operation_id, None)?;
        self.core.send(&frame)
    }

    /// Tells the execution side to shut down.
    ///
    /// # Errors
    ///
    /// Fails unless the engine is `Connected` or when the frame cannot be
    /// written.
    pub fn quit(&self) -> Result<(), EngineError> {
        self.core.require_connected("quit")?;
        let frame = framing::encode(Command::Quit, &[])?;
        self.core.send(&frame)
    }

    /// Stops listening and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyDisposed`] on the second call.
    pub fn dispose(&self) -> Result<(), EngineError> {
        self.core.engine.dispose(&self.core)
    }

    fn issue(
        &self,
        command: Command,
        operation_id: &str,
        filter: &TestFilter,
    ) -> Result<(), EngineError> {
        let core = &self.core;
        core.require_connected(command.as_str())?;
        let spec = if filter.is_empty() {
            None
        } else {
            Some(
                filter
                    .to_spec()
                    .map_err(|source| EngineError::Serialize { source })?,
            )
        };
        let frame = framing::encode_operation(command, operation_id, spec.as_deref())?;
        if !core.pending().insert(operation_id.to_owned()) {
            return Err(EngineError::invalid_argument(format!(
                "operation {operation_id} is already pending"
            )));
        }
        if let Err(error) = core.send(&frame) {
            core.pending().remove(operation_id);
            return Err(error);
        }
        debug!(
            target: RUNNER_TARGET,
            engine = %core.engine.display_name(),
            %command,
            operation = operation_id,
            "request sent"
        );
        Ok(())
    }
}

impl<L: RunnerListener> Drop for RunnerEngine<L> {
    fn drop(&mut self) {
        if self.core.engine.state().is_disposed() {
            return;
        }
        if let Err(error) = self.dispose() {
            debug!(target: RUNNER_TARGET, %error, "dispose on drop failed");
        }
    }
}

impl<L: RunnerListener> RunnerCore<L> {
    fn accepted(self: &Arc<Self>, stream: TcpStream) {
        if let Err(error) = self.negotiate(stream) {
            self.engine.diagnostics().diagnostic(&format!(
                "{}: could not set up the execution connection: {error}",
                self.engine.display_name()
            ));
        }
    }

    fn negotiate(self: &Arc<Self>, stream: TcpStream) -> Result<(), EngineError> {
        let transport = Arc::new(FramedTransport::new(stream)?);
        let mut state = self.engine.lock_state();
        state.require(EngineState::Connecting, "accept")?;
        self.transport
            .set(Arc::clone(&transport))
            .map_err(|_| EngineError::invalid_argument("transport already attached"))?;
        state.transition(EngineState::Negotiating)?;

        let frames = Arc::downgrade(self);
        let closed = Arc::downgrade(self);
        transport.start(
            "testwire-runner-reader",
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
        transport.send(&framing::encode(Command::Info, &[])?)?;
        drop(state);
        info!(
            target: RUNNER_TARGET,
            engine = %self.engine.display_name(),
            protocol = %self.settings.version,
            "negotiating with execution engine"
        );
        Ok(())
    }

    fn connection_closed(&self, reason: CloseReason) {
        if reason == CloseReason::Local {
            return;
        }
        self.engine.diagnostics().diagnostic(&format!(
            "{}: execution engine disconnected ({reason:?})",
            self.engine.display_name()
        ));
        self.listener.on_disconnected();
    }

    /// Checks the state without holding the lock across the write that
    /// follows; the reader thread needs the lock to dispatch.
    fn require_connected(&self, operation: &'static str) -> Result<(), EngineError> {
        self.engine
            .lock_state()
            .require(EngineState::Connected, operation)
    }

    fn send(&self, frame: &[u8]) -> Result<(), EngineError> {
        let transport = self
            .transport
            .get()
            .ok_or(TransportError::Closed)?;
        transport.send(frame)?;
        Ok(())
    }

    fn pending(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acceptor(&self) -> MutexGuard<'_, Option<AcceptorHandle>> {
        self.acceptor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stop_accepting<L: RunnerListener>(core: &RunnerCore<L>) -> Result<(), EngineError> {
    let handle = core.acceptor().take();
    handle.map_or(Ok(()), AcceptorHandle::join)
}

fn close_transport<L: RunnerListener>(core: &RunnerCore<L>) -> Result<(), EngineError> {
    core.transport
        .get()
        .map_or(Ok(()), |transport| transport.close().map_err(EngineError::from))
}
