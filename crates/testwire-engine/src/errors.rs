//! Error types shared by the engines.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use testwire_protocol::{Command, FramingError, TransportError, VersionError};
use thiserror::Error;

use crate::engine::EngineState;

/// Usage and lifecycle errors returned from public engine entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine is not in the state an operation requires.
    #[error("cannot {operation} while {actual}; expected {expected}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the operation requires.
        expected: EngineState,
        /// State the engine was in.
        actual: EngineState,
    },
    /// `dispose` ran on an engine that is already disconnecting or gone.
    #[error("engine already disposed ({state})")]
    AlreadyDisposed {
        /// State observed when disposal was attempted.
        state: EngineState,
    },
    /// A state change tried to move backwards or stand still.
    #[error("invalid state transition {from} => {to}")]
    InvalidTransition {
        /// Current state.
        from: EngineState,
        /// Requested state.
        to: EngineState,
    },
    /// A second handler was registered for the same command.
    #[error("a handler for {command} is already registered")]
    DuplicateHandler {
        /// Command that already had a handler.
        command: Command,
    },
    /// A caller supplied an unusable argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },
    /// The configured protocol version is not supported.
    #[error(transparent)]
    Version(#[from] VersionError),
    /// Connecting to the runner failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Address that was dialled.
        address: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Binding the runner listener failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Configuring or querying a socket failed.
    #[error("socket setup failed: {source}")]
    Socket {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning a background thread failed.
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        /// Purpose of the thread.
        role: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A background thread panicked.
    #[error("{role} thread panicked")]
    ThreadPanicked {
        /// Purpose of the thread.
        role: &'static str,
    },
    /// The framed transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A frame could not be built.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// A payload could not be serialised.
    #[error("failed to serialise payload: {source}")]
    Serialize {
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// Waiting for something took longer than allowed.
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// How long the caller waited.
        timeout: Duration,
    },
}

impl EngineError {
    /// Builds an [`EngineError::InvalidState`].
    #[must_use]
    pub const fn invalid_state(
        operation: &'static str,
        expected: EngineState,
        actual: EngineState,
    ) -> Self {
        Self::InvalidState {
            operation,
            expected,
            actual,
        }
    }

    /// Builds an [`EngineError::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Failures raised by command handlers.
///
/// Dispatch never propagates these to the peer; they are reported as internal
/// diagnostics alongside the frame that caused them.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The handler's lifecycle precondition failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The frame data was malformed.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// A filter specification was not valid JSON.
    #[error("invalid filter for operation {operation_id}: {source}")]
    InvalidFilter {
        /// Operation the filter belonged to.
        operation_id: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A JSON payload could not be decoded or encoded.
    #[error("invalid {command} payload: {source}")]
    Payload {
        /// Command carrying the payload.
        command: Command,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A command that needs data arrived without any.
    #[error("{command} requires data")]
    MissingData {
        /// Command that lacked data.
        command: Command,
    },
    /// Writing the response failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The worker for an operation could not be started.
    #[error("failed to start worker for operation {operation_id}: {source}")]
    Spawn {
        /// Operation whose worker failed to start.
        operation_id: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
