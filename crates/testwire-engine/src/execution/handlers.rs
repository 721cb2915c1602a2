//! Command handlers bound by the execution engine.

use std::sync::Arc;

use testwire_protocol::framing::{self, Command};
use testwire_protocol::{ErrorPayload, InfoPayload, TestFilter};

use crate::engine::EngineState;
use crate::errors::CommandError;
use crate::framework::TestFramework;
use crate::operations::{OperationContext, OperationKind};

use super::ExecutionCore;

pub(super) fn on_info<F: TestFramework>(
    core: &ExecutionCore<F>,
    _data: Option<&[u8]>,
) -> Result<(), CommandError> {
    let mut state = core.engine.lock_state();
    state.require(EngineState::Negotiating, Command::Info.as_str())?;
    state.transition(EngineState::Connected)?;

    let framework = &core.runtime.framework;
    let info = InfoPayload {
        assembly_unique_id: framework.assembly_unique_id(),
        test_framework: framework.display_name(),
    };
    let body = serde_json::to_vec(&info).map_err(|source| CommandError::Payload {
        command: Command::Info,
        source,
    })?;
    let frame = framing::encode(Command::Info, &[&body])?;
    core.runtime.outbound.send_frame(&frame)?;
    Ok(())
}

pub(super) fn on_find<F: TestFramework>(
    core: &ExecutionCore<F>,
    data: Option<&[u8]>,
) -> Result<(), CommandError> {
    launch(core, Command::Find, OperationKind::Find, data)
}

pub(super) fn on_run<F: TestFramework>(
    core: &ExecutionCore<F>,
    data: Option<&[u8]>,
) -> Result<(), CommandError> {
    launch(core, Command::Run, OperationKind::Run, data)
}

pub(super) fn on_cancel<F: TestFramework>(
    core: &ExecutionCore<F>,
    data: Option<&[u8]>,
) -> Result<(), CommandError> {
    let state = core.engine.lock_state();
    state.require(EngineState::Connected, Command::Cancel.as_str())?;
    let (operation_id, _) = framing::split_operation(Command::Cancel, data)?;

    let diagnostics = core.engine.diagnostics();
    if core.runtime.tracker.request_cancel(&operation_id) {
        diagnostics.internal_diagnostic(&format!(
            "{}: cancellation requested for {operation_id}",
            core.engine.display_name()
        ));
    } else {
        diagnostics.diagnostic(&format!(
            "{}: ignoring CANCEL for {operation_id}; no such operation is executing",
            core.engine.display_name()
        ));
    }
    Ok(())
}

pub(super) fn on_quit<F: TestFramework>(
    core: &ExecutionCore<F>,
    _data: Option<&[u8]>,
) -> Result<(), CommandError> {
    if core.quit.trigger() {
        core.engine
            .diagnostics()
            .internal_diagnostic(&format!("{}: quit requested", core.engine.display_name()));
    }
    Ok(())
}

/// Accepts a `FIND` or `RUN` request and hands it to a worker thread.
///
/// The state lock is held until the worker is registered so that disposal
/// cannot slip in between the state check and the launch.
fn launch<F: TestFramework>(
    core: &ExecutionCore<F>,
    command: Command,
    kind: OperationKind,
    data: Option<&[u8]>,
) -> Result<(), CommandError> {
    let state = core.engine.lock_state();
    state.require(EngineState::Connected, command.as_str())?;
    let (operation_id, spec) = framing::split_operation(command, data)?;

    let runtime = &core.runtime;
    let display_name = core.engine.display_name();
    let duplicate = || {
        core.engine.diagnostics().diagnostic(&format!(
            "{display_name}: ignoring {command} for {operation_id}; the operation is already executing"
        ));
    };
    if runtime.tracker.is_executing(&operation_id) {
        duplicate();
        return Ok(());
    }

    let filter = match TestFilter::parse(spec) {
        Ok(filter) => filter,
        Err(source) => {
            runtime.send_error(
                &operation_id,
                ErrorPayload::from_error("invalid-filter", &source),
            );
            return Err(CommandError::InvalidFilter {
                operation_id,
                source,
            });
        }
    };

    if !runtime.tracker.try_begin(&operation_id, kind) {
        duplicate();
        return Ok(());
    }

    let context = OperationContext::new(operation_id.clone(), kind, Arc::clone(&runtime.tracker));
    let worker_runtime = Arc::clone(runtime);
    let spawned = core.workers.spawn(format!("testwire-{kind}"), move || {
        worker_runtime.execute(&context, &filter);
    });
    if let Err(source) = spawned {
        runtime.tracker.complete(&operation_id);
        return Err(CommandError::Spawn {
            operation_id,
            source,
        });
    }
    drop(state);
    Ok(())
}
