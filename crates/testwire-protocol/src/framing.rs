//! Byte-level framing for protocol messages.
//!
//! A frame is a command token, optionally followed by a single separator byte
//! and an opaque data payload, terminated by the end-of-message byte:
//!
//! ```text
//! FIND op-17 {"classes":["Calculator"]}\n
//! ```
//!
//! Only the first separator is significant. Everything after it belongs to the
//! data payload, so payloads such as `operationID SEP json` may contain further
//! separator bytes without confusing the framing layer.

use std::fmt;
use std::str;

use thiserror::Error;

/// Separator between the command token and its data.
pub const SEP: u8 = b' ';

/// Terminator marking the end of a frame.
pub const END: u8 = b'\n';

/// Commands understood by either side of the connection.
///
/// The runner issues `CANCEL`, `FIND`, `INFO`, `QUIT` and `RUN`; the execution
/// side issues `INFO` and `MSG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    /// Requests cooperative cancellation of an executing operation.
    Cancel,
    /// Starts a discovery operation.
    Find,
    /// Negotiates the session (request and response share the token).
    Info,
    /// Carries an event payload for an operation.
    Msg,
    /// Asks the execution side to shut down.
    Quit,
    /// Starts an execution operation.
    Run,
}

impl Command {
    /// Every command in the vocabulary.
    pub const ALL: [Self; 6] = [
        Self::Cancel,
        Self::Find,
        Self::Info,
        Self::Msg,
        Self::Quit,
        Self::Run,
    ];

    /// Returns the wire token for the command.
    #[must_use]
    pub const fn token(self) -> &'static [u8] {
        match self {
            Self::Cancel => b"CANCEL",
            Self::Find => b"FIND",
            Self::Info => b"INFO",
            Self::Msg => b"MSG",
            Self::Quit => b"QUIT",
            Self::Run => b"RUN",
        }
    }

    /// Resolves a wire token using exact, case-sensitive comparison.
    #[must_use]
    pub fn from_token(token: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.token() == token)
    }

    /// Returns the token as text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancel => "CANCEL",
            Self::Find => "FIND",
            Self::Info => "INFO",
            Self::Msg => "MSG",
            Self::Quit => "QUIT",
            Self::Run => "RUN",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Errors raised while building or interpreting frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A command that needs an operation ID arrived without one.
    #[error("{command} requires a non-empty operation ID")]
    MissingOperationId {
        /// Command whose data lacked the operation ID.
        command: Command,
    },
    /// Operation IDs must not contain framing bytes.
    #[error("operation ID {operation_id:?} contains a framing byte")]
    InvalidOperationId {
        /// Offending operation ID.
        operation_id: String,
    },
    /// Frame data was expected to be UTF-8.
    #[error("{command} operation ID is not valid UTF-8")]
    InvalidUtf8 {
        /// Command whose data failed to decode.
        command: Command,
    },
    /// A payload field contained the end-of-message byte.
    #[error("{command} payload contains the end-of-message byte")]
    EmbeddedTerminator {
        /// Command whose payload was rejected.
        command: Command,
    },
}

/// Splits a frame into its command token and optional data.
///
/// A single trailing [`END`] byte is ignored. When the frame contains no
/// [`SEP`] the data is `None`; a frame that ends with [`SEP`] yields
/// `Some(b"")`, keeping "no data" distinct from "empty data".
///
/// # Examples
///
/// ```
/// use testwire_protocol::framing::split;
///
/// assert_eq!(split(b"RUN op1 {}"), (&b"RUN"[..], Some(&b"op1 {}"[..])));
/// assert_eq!(split(b"QUIT\n"), (&b"QUIT"[..], None));
/// ```
#[must_use]
pub fn split(frame: &[u8]) -> (&[u8], Option<&[u8]>) {
    let frame = frame.strip_suffix(&[END]).unwrap_or(frame);
    match frame.iter().position(|byte| *byte == SEP) {
        Some(index) => {
            let (token, rest) = frame.split_at(index);
            (token, rest.get(1..))
        }
        None => (frame, None),
    }
}

/// Extracts the leading operation ID from command data.
///
/// Returns the ID and whatever follows the next separator (for example a
/// filter specification or an event payload).
///
/// # Errors
///
/// Returns [`FramingError::MissingOperationId`] when the data is absent or the
/// ID is empty, and [`FramingError::InvalidUtf8`] when the ID is not UTF-8.
pub fn split_operation(
    command: Command,
    data: Option<&[u8]>,
) -> Result<(String, Option<&[u8]>), FramingError> {
    let Some(data) = data else {
        return Err(FramingError::MissingOperationId { command });
    };
    let (id, rest) = split(data);
    if id.is_empty() {
        return Err(FramingError::MissingOperationId { command });
    }
    let id = str::from_utf8(id).map_err(|_| FramingError::InvalidUtf8 { command })?;
    Ok((id.to_owned(), rest))
}

/// Checks that an operation ID can travel as a single frame field.
///
/// # Errors
///
/// Returns [`FramingError::InvalidOperationId`] when the ID is empty or
/// contains [`SEP`] or [`END`].
pub fn validate_operation_id(operation_id: &str) -> Result<(), FramingError> {
    let has_framing_byte = operation_id.bytes().any(|byte| byte == SEP || byte == END);
    if operation_id.is_empty() || has_framing_byte {
        return Err(FramingError::InvalidOperationId {
            operation_id: operation_id.to_owned(),
        });
    }
    Ok(())
}

/// Encodes a frame as `TOKEN [SEP field]* END`.
///
/// # Errors
///
/// Returns [`FramingError::EmbeddedTerminator`] when any field contains
/// [`END`].
pub fn encode(command: Command, fields: &[&[u8]]) -> Result<Vec<u8>, FramingError> {
    if fields.iter().any(|field| field.contains(&END)) {
        return Err(FramingError::EmbeddedTerminator { command });
    }
    let capacity = command.token().len()
        + fields.iter().map(|field| field.len() + 1).sum::<usize>()
        + 1;
    let mut frame = Vec::with_capacity(capacity);
    frame.extend_from_slice(command.token());
    for field in fields {
        frame.push(SEP);
        frame.extend_from_slice(field);
    }
    frame.push(END);
    Ok(frame)
}

/// Encodes a frame whose first field is an operation ID.
///
/// # Errors
///
/// Returns an error when the operation ID is not a valid frame field or the
/// payload contains [`END`].
pub fn encode_operation(
    command: Command,
    operation_id: &str,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>, FramingError> {
    validate_operation_id(operation_id)?;
    match payload {
        Some(payload) => encode(command, &[operation_id.as_bytes(), payload]),
        None => encode(command, &[operation_id.as_bytes()]),
    }
}
