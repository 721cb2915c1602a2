//! Command handlers bound by the runner engine.

use testwire_protocol::framing::{self, Command};
use testwire_protocol::{InfoPayload, is_terminal_payload};

use crate::engine::EngineState;
use crate::errors::CommandError;

use super::{RunnerCore, RunnerListener};

pub(super) fn on_info<L: RunnerListener>(
    core: &RunnerCore<L>,
    data: Option<&[u8]>,
) -> Result<(), CommandError> {
    let mut state = core.engine.lock_state();
    state.require(EngineState::Negotiating, Command::Info.as_str())?;
    let body = data.ok_or(CommandError::MissingData {
        command: Command::Info,
    })?;
    let info: InfoPayload = serde_json::from_slice(body).map_err(|source| CommandError::Payload {
        command: Command::Info,
        source,
    })?;
    state.transition(EngineState::Connected)?;
    drop(state);

    core.listener.on_info(core.info.get_or_init(|| info));
    core.connected.trigger();
    Ok(())
}

pub(super) fn on_msg<L: RunnerListener>(
    core: &RunnerCore<L>,
    data: Option<&[u8]>,
) -> Result<(), CommandError> {
    core.engine
        .lock_state()
        .require(EngineState::Connected, Command::Msg.as_str())?;
    let (operation_id, payload) = framing::split_operation(Command::Msg, data)?;
    let payload = payload.ok_or(CommandError::MissingData {
        command: Command::Msg,
    })?;

    core.listener.on_message(&operation_id, payload);
    if is_terminal_payload(payload) && core.pending().remove(&operation_id) {
        core.listener.on_operation_complete(&operation_id);
    }
    Ok(())
}
