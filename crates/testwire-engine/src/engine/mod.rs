//! Connection engine shared by the runner and execution sides.
//!
//! An [`Engine`] owns the lifecycle state machine, the table mapping each
//! [`Command`] to its handler, and the ordered list of cleanup actions run on
//! disposal. The engine is generic over the context `H` its handlers receive,
//! so a concrete engine embeds an `Engine<Self>` and passes itself to
//! [`Engine::dispatch`].

mod state;

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use testwire_protocol::framing::{self, Command};
use tracing::warn;

use crate::diagnostics::DiagnosticEmitter;
use crate::errors::{CommandError, EngineError};

pub use state::EngineState;

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Handler bound to a command. Receives the engine context and the frame data
/// that followed the command token.
pub type CommandHandler<H> = fn(&H, Option<&[u8]>) -> Result<(), CommandError>;

type CleanupAction<H> = Box<dyn FnOnce(&H) -> Result<(), EngineError> + Send>;

struct Cleanup<H> {
    label: &'static str,
    action: CleanupAction<H>,
}

/// State machine, handler registry and teardown sequence for one connection.
pub struct Engine<H> {
    id: String,
    display_name: String,
    state: Mutex<EngineState>,
    handlers: HashMap<Command, CommandHandler<H>>,
    cleanups: Mutex<Vec<Cleanup<H>>>,
    diagnostics: Arc<dyn DiagnosticEmitter>,
}

impl<H> fmt::Debug for Engine<H> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("display_name", &self.display_name)
            .field("state", &self.state())
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<H> Engine<H> {
    /// Creates an engine of the given kind and moves it to `Initialized`.
    ///
    /// The display name is `"{kind}({id})"`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] when `id` is empty or contains
    /// a framing byte; the ID is used as an operation ID for relayed
    /// diagnostics and must survive framing.
    pub fn new(
        kind: &str,
        id: impl Into<String>,
        diagnostics: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        framing::validate_operation_id(&id)
            .map_err(|error| EngineError::invalid_argument(format!("engine ID: {error}")))?;
        let engine = Self {
            display_name: format!("{kind}({id})"),
            id,
            state: Mutex::new(EngineState::Unknown),
            handlers: HashMap::new(),
            cleanups: Mutex::new(Vec::new()),
            diagnostics,
        };
        engine.lock_state().transition(EngineState::Initialized)?;
        Ok(engine)
    }

    /// Stable identifier of the engine.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name used in diagnostics.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Sink receiving this engine's diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> &dyn DiagnosticEmitter {
        self.diagnostics.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.guard()
    }

    /// Binds `handler` to `command`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateHandler`] when the command already has
    /// a handler.
    pub fn register_handler(
        &mut self,
        command: Command,
        handler: CommandHandler<H>,
    ) -> Result<(), EngineError> {
        match self.handlers.entry(command) {
            Entry::Occupied(_) => Err(EngineError::DuplicateHandler { command }),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Appends a cleanup action to the disposal sequence.
    ///
    /// Actions run in registration order. A failing action is reported and
    /// the remaining actions still run.
    pub fn register_cleanup<A>(&self, label: &'static str, action: A)
    where
        A: FnOnce(&H) -> Result<(), EngineError> + Send + 'static,
    {
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Cleanup {
                label,
                action: Box::new(action),
            });
    }

    /// Locks the state for a check-then-act sequence.
    pub fn lock_state(&self) -> StateLock<'_> {
        StateLock {
            guard: self.guard(),
            display_name: &self.display_name,
            diagnostics: self.diagnostics.as_ref(),
        }
    }

    /// Routes one frame to its handler.
    ///
    /// Unknown tokens and commands without a handler produce one internal
    /// diagnostic. Handler errors and panics are caught and reported as an
    /// internal diagnostic carrying the raw frame; dispatch always returns.
    pub fn dispatch(&self, context: &H, frame: &[u8]) {
        let (token, data) = framing::split(frame);
        let Some(command) = Command::from_token(token) else {
            self.diagnostics.internal_diagnostic(&format!(
                "{}: ignoring unknown command {:?}",
                self.display_name,
                String::from_utf8_lossy(token)
            ));
            return;
        };
        let Some(handler) = self.handlers.get(&command).copied() else {
            self.diagnostics.internal_diagnostic(&format!(
                "{}: no handler registered for {command}",
                self.display_name
            ));
            return;
        };

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(context, data))) {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error.to_string(),
            Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
        };
        self.diagnostics.internal_diagnostic(&format!(
            "{}: {command} failed: {failure}; frame: {:?}",
            self.display_name,
            String::from_utf8_lossy(frame)
        ));
    }

    /// Tears the engine down.
    ///
    /// Moves to `Disconnecting`, runs every cleanup action in order, then
    /// moves to `Disconnected`. Cleanup failures are reported, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyDisposed`] when disposal already began.
    pub fn dispose(&self, context: &H) -> Result<(), EngineError> {
        {
            let mut state = self.lock_state();
            let current = state.current();
            if current.is_disposed() {
                return Err(EngineError::AlreadyDisposed { state: current });
            }
            state.transition(EngineState::Disconnecting)?;
        }

        let cleanups = mem::take(&mut *self.cleanups.lock().unwrap_or_else(PoisonError::into_inner));
        for Cleanup { label, action } in cleanups {
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| action(context))) {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            warn!(
                target: ENGINE_TARGET,
                engine = %self.display_name,
                cleanup = label,
                error = %failure,
                "cleanup action failed"
            );
            self.diagnostics.internal_diagnostic(&format!(
                "{}: cleanup {label} failed: {failure}",
                self.display_name
            ));
        }

        self.lock_state().transition(EngineState::Disconnected)
    }

    fn guard(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive view of an engine's state held across a check-then-act sequence.
pub struct StateLock<'a> {
    guard: MutexGuard<'a, EngineState>,
    display_name: &'a str,
    diagnostics: &'a dyn DiagnosticEmitter,
}

impl StateLock<'_> {
    /// State observed under the lock.
    #[must_use]
    pub fn current(&self) -> EngineState {
        *self.guard
    }

    /// Fails unless the engine is in `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] naming `operation`.
    pub fn require(&self, expected: EngineState, operation: &'static str) -> Result<(), EngineError> {
        let actual = self.current();
        if actual == expected {
            Ok(())
        } else {
            Err(EngineError::invalid_state(operation, expected, actual))
        }
    }

    /// Moves to `next`, announcing the change as an internal diagnostic
    /// before it takes effect.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless `next` lies strictly
    /// ahead of the current state.
    pub fn transition(&mut self, next: EngineState) -> Result<(), EngineError> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        self.diagnostics
            .internal_diagnostic(&format!("{}: {current} => {next}", self.display_name));
        *self.guard = next;
        Ok(())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
