use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use testwire_protocol::framing::{self, Command};
use testwire_protocol::{EngineEvent, FramedTransport, TransportError};
use tracing::debug;

use crate::diagnostics::EventRelay;
use crate::errors::{CommandError, EngineError};

use super::EXECUTION_TARGET;

/// Write side of the execution engine's connection.
///
/// The transport is attached once, when `start` connects. Until then every
/// send reports [`TransportError::Closed`].
pub(crate) struct Outbound {
    engine_id: String,
    transport: OnceCell<Arc<FramedTransport>>,
}

impl Outbound {
    pub(crate) const fn new(engine_id: String) -> Self {
        Self {
            engine_id,
            transport: OnceCell::new(),
        }
    }

    pub(crate) fn attach(&self, transport: Arc<FramedTransport>) -> Result<(), EngineError> {
        self.transport
            .set(transport)
            .map_err(|_| EngineError::invalid_argument("transport already attached"))
    }

    pub(crate) fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.transport
            .get()
            .ok_or(TransportError::Closed)?
            .send(frame)
    }

    /// Writes `MSG id payload` as one frame.
    pub(crate) fn send_message(&self, operation_id: &str, payload: &[u8]) -> Result<(), CommandError> {
        let frame = framing::encode_operation(Command::Msg, operation_id, Some(payload))?;
        self.send_frame(&frame)?;
        Ok(())
    }

    pub(crate) fn send_event<T: Serialize>(
        &self,
        operation_id: &str,
        event: &T,
    ) -> Result<(), CommandError> {
        let payload = serde_json::to_vec(event).map_err(|source| CommandError::Payload {
            command: Command::Msg,
            source,
        })?;
        self.send_message(operation_id, &payload)
    }

    pub(crate) fn close(&self) -> Result<(), TransportError> {
        self.transport.get().map_or(Ok(()), |transport| transport.close())
    }
}

impl EventRelay for Outbound {
    fn relay(&self, event: &EngineEvent) {
        let Some(transport) = self.transport.get() else {
            return;
        };
        if transport.is_closed() {
            return;
        }
        if let Err(error) = self.send_event(&self.engine_id, event) {
            debug!(
                target: EXECUTION_TARGET,
                engine = %self.engine_id,
                %error,
                "diagnostic relay failed"
            );
        }
    }
}
