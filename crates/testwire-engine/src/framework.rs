//! Boundary to the test framework hosted by the execution side.

use std::error::Error as StdError;

use testwire_protocol::{ExecutionEvent, RunSummary, TestCase, TestFilter};
use thiserror::Error;

/// Discovers and runs tests on behalf of the execution engine.
///
/// Both entry points stream results through a callback. The callback returns
/// `false` once the operation has been cancelled; implementations should stop
/// producing results soon after, although results already in flight may still
/// be delivered.
pub trait TestFramework: Send + Sync + 'static {
    /// Name reported to the runner in the `INFO` response.
    fn display_name(&self) -> String;

    /// Identifier of the test assembly reported in the `INFO` response.
    fn assembly_unique_id(&self) -> String;

    /// Enumerates every test case. The engine applies the operation's filter.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError`] when enumeration fails.
    fn find(&self, on_case: &mut dyn FnMut(TestCase) -> bool) -> Result<(), FrameworkError>;

    /// Runs the cases selected by `filter`, streaming execution events.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError`] when the run cannot complete.
    fn run(
        &self,
        filter: &TestFilter,
        on_event: &mut dyn FnMut(ExecutionEvent) -> bool,
    ) -> Result<RunSummary, FrameworkError>;
}

/// Failure reported by a [`TestFramework`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FrameworkError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl FrameworkError {
    /// Builds an error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
