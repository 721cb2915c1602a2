//! Wire protocol shared by test runners and test execution hosts.
//!
//! A runner and an execution host talk over one TCP connection. Each message
//! is a frame of the form `TOKEN [SEP data] END`; the [`framing`] module owns
//! the byte-level rules, [`payloads`] defines the JSON bodies carried by
//! `INFO` and `MSG`, [`filter`] describes test selection, and [`transport`]
//! moves whole frames across a socket.

pub mod filter;
pub mod framing;
pub mod payloads;
pub mod transport;
pub mod version;

pub use filter::TestFilter;
pub use framing::{Command, END, FramingError, SEP, encode, encode_operation, split, split_operation};
pub use payloads::{
    DiscoveryEvent, EngineEvent, ErrorEntry, ErrorPayload, ExecutionEvent, InfoPayload,
    RunSummary, TestCase, is_terminal_payload, payload_type,
};
pub use transport::{CloseReason, FramedTransport, MAX_FRAME_BYTES, TransportError};
pub use version::{ProtocolVersion, VersionError};
