use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use testwire_protocol::{
    DiscoveryEvent, EngineEvent, ErrorPayload, ExecutionEvent, TestFilter,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::diagnostics::DiagnosticEmitter;
use crate::engine::panic_message;
use crate::errors::CommandError;
use crate::framework::{FrameworkError, TestFramework};
use crate::operations::{OperationContext, OperationKind, OperationTracker};

use super::EXECUTION_TARGET;
use super::outbound::Outbound;

/// State shared between the execution engine and its operation workers.
pub(crate) struct OperationRuntime<F> {
    pub(crate) framework: F,
    pub(crate) tracker: Arc<OperationTracker>,
    pub(crate) outbound: Arc<Outbound>,
    pub(crate) diagnostics: Arc<dyn DiagnosticEmitter>,
    pub(crate) stop_on_fail: bool,
}

#[derive(Debug, Error)]
enum OperationError {
    #[error(transparent)]
    Framework(#[from] FrameworkError),
    #[error("failed to serialise event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl OperationError {
    const fn error_type(&self) -> &'static str {
        match self {
            Self::Framework(_) => "framework",
            Self::Serialize(_) => "serialization",
            Self::Command(_) => "transport",
        }
    }
}

impl<F: TestFramework> OperationRuntime<F> {
    /// Writes one event for an operation.
    ///
    /// The frame goes out even after cancellation; results already produced
    /// still reach the runner. Returns `false` once cancellation was
    /// requested for `operation_id`, telling the producer to stop.
    pub(crate) fn send_message(&self, operation_id: &str, payload: &[u8]) -> bool {
        if let Err(error) = self.outbound.send_message(operation_id, payload) {
            self.diagnostics
                .internal_diagnostic(&format!("failed to send MSG for {operation_id}: {error}"));
        }
        !self.tracker.is_cancel_requested(operation_id)
    }

    /// Reports a failed operation to the runner. Always sent, even after
    /// cancellation, so the runner sees the operation end.
    pub(crate) fn send_error(&self, operation_id: &str, payload: ErrorPayload) {
        if let Err(error) = self
            .outbound
            .send_event(operation_id, &EngineEvent::Error(payload))
        {
            self.diagnostics.internal_diagnostic(&format!(
                "failed to report error for {operation_id}: {error}"
            ));
        }
    }

    /// Body of an operation worker. The operation leaves the tracker however
    /// the work ends.
    pub(crate) fn execute(&self, context: &OperationContext, filter: &TestFilter) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match context.kind() {
            OperationKind::Find => self.discover(context, filter),
            OperationKind::Run => self.run(context, filter),
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(ErrorPayload::from_error(error.error_type(), &error)),
            Err(payload) => Some(ErrorPayload::message(
                "panic",
                panic_message(payload.as_ref()),
            )),
        };
        if let Some(payload) = failure {
            self.send_error(context.id(), payload);
        }
        self.tracker.complete(context.id());
        debug!(
            target: EXECUTION_TARGET,
            operation = context.id(),
            kind = %context.kind(),
            "operation finished"
        );
    }

    fn discover(&self, context: &OperationContext, filter: &TestFilter) -> Result<(), OperationError> {
        let mut reported: u32 = 0;
        let mut encode_failure = None;
        self.framework.find(&mut |case| {
            if !filter.matches(&case) {
                return context.should_continue();
            }
            match serde_json::to_vec(&DiscoveryEvent::TestCaseDiscovered(case)) {
                Ok(payload) => {
                    reported = reported.saturating_add(1);
                    self.send_message(context.id(), &payload)
                }
                Err(error) => {
                    encode_failure = Some(error);
                    false
                }
            }
        })?;
        if let Some(error) = encode_failure {
            return Err(error.into());
        }
        self.outbound.send_event(
            context.id(),
            &DiscoveryEvent::DiscoveryComplete {
                test_cases: reported,
            },
        )?;
        Ok(())
    }

    fn run(&self, context: &OperationContext, filter: &TestFilter) -> Result<(), OperationError> {
        let mut encode_failure = None;
        let summary = self.framework.run(filter, &mut |event| {
            match serde_json::to_vec(&event) {
                Ok(payload) => self.send_message(context.id(), &payload),
                Err(error) => {
                    encode_failure = Some(error);
                    false
                }
            }
        })?;
        if let Some(error) = encode_failure {
            return Err(error.into());
        }
        if self.stop_on_fail && summary.failed > 0 {
            let cancelled = self.tracker.cancel_others(context.id());
            if !cancelled.is_empty() {
                self.diagnostics.diagnostic(&format!(
                    "run {} reported {} failure(s); cancelling {}",
                    context.id(),
                    summary.failed,
                    cancelled.join(", ")
                ));
            }
        }
        self.outbound
            .send_event(context.id(), &ExecutionEvent::RunComplete(summary))?;
        Ok(())
    }
}

/// Worker threads spawned for operations, tracked until teardown.
#[derive(Debug, Default)]
pub(crate) struct WorkerSet {
    active: Mutex<usize>,
    idle: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

struct ActiveWorker(Arc<WorkerSet>);

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        let mut active = self.0.active();
        *active = active.saturating_sub(1);
        self.0.idle.notify_all();
    }
}

impl WorkerSet {
    pub(crate) fn spawn<W>(self: &Arc<Self>, name: String, work: W) -> io::Result<()>
    where
        W: FnOnce() + Send + 'static,
    {
        *self.active() += 1;
        let guard = ActiveWorker(Arc::clone(self));
        let handle = thread::Builder::new().name(name).spawn(move || {
            let _active = guard;
            work();
        })?;
        let mut handles = self.handles();
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
        Ok(())
    }

    /// Waits up to `grace` for every worker to finish and reaps them.
    ///
    /// Returns how many workers were still running when the grace period ran
    /// out; those threads are left detached.
    pub(crate) fn await_idle(&self, grace: Duration) -> usize {
        let active = self.active();
        let (active, _) = self
            .idle
            .wait_timeout_while(active, grace, |active| *active > 0)
            .unwrap_or_else(PoisonError::into_inner);
        let outstanding = *active;
        drop(active);

        for handle in self.handles().drain(..) {
            if !handle.is_finished() {
                continue;
            }
            if handle.join().is_err() {
                warn!(target: EXECUTION_TARGET, "operation worker panicked outside its guard");
            }
        }
        outstanding
    }

    fn active(&self) -> MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
