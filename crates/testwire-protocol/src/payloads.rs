//! JSON payloads carried by `INFO` and `MSG` frames.
//!
//! Every `MSG` payload is a JSON object with a `type` discriminator. The
//! execution side produces three families of payloads: discovery events,
//! execution events and engine events (diagnostics and operation errors).
//! Runners that only need routing information can call [`payload_type`]
//! instead of decoding the full event.

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};

/// Response body of the execution side's `INFO` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoPayload {
    /// Identifier of the test assembly hosted by the execution side.
    pub assembly_unique_id: String,
    /// Display name of the test framework running the tests.
    pub test_framework: String,
}

/// A test case reported during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable identifier used to select the case in later requests.
    pub unique_id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Class that declares the test, when the framework has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Method implementing the test, when the framework has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
}

impl TestCase {
    /// Creates a test case without class or method metadata.
    #[must_use]
    pub fn new(unique_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            display_name: display_name.into(),
            class_name: None,
            method_name: None,
        }
    }

    /// Attaches the declaring class and method.
    #[must_use]
    pub fn with_method(mut self, class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self.method_name = Some(method_name.into());
        self
    }

    /// Returns `Class.method` when both parts are known.
    #[must_use]
    pub fn qualified_method(&self) -> Option<String> {
        match (&self.class_name, &self.method_name) {
            (Some(class), Some(method)) => Some(format!("{class}.{method}")),
            _ => None,
        }
    }
}

/// Totals reported once an execution operation finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of test cases that ran.
    pub total: u32,
    /// Number of failed test cases.
    pub failed: u32,
    /// Number of skipped test cases.
    pub skipped: u32,
    /// Number of selected cases that never ran (for example after cancellation).
    pub not_run: u32,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

/// Events emitted while discovering tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DiscoveryEvent {
    /// A test case passed the operation's filter.
    TestCaseDiscovered(TestCase),
    /// Discovery finished; always the last event of a `FIND` operation.
    DiscoveryComplete {
        /// Number of cases reported.
        test_cases: u32,
    },
}

/// Events emitted while running tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutionEvent {
    /// A test case is about to run.
    TestStarting {
        /// Case identifier.
        unique_id: String,
        /// Human-readable name.
        display_name: String,
    },
    /// A test case passed.
    TestPassed {
        /// Case identifier.
        unique_id: String,
        /// Duration in milliseconds.
        elapsed_ms: u64,
    },
    /// A test case failed.
    TestFailed {
        /// Case identifier.
        unique_id: String,
        /// Duration in milliseconds.
        elapsed_ms: u64,
        /// Failure messages, outermost first.
        messages: Vec<String>,
    },
    /// A test case was skipped.
    TestSkipped {
        /// Case identifier.
        unique_id: String,
        /// Reason given by the test.
        reason: String,
    },
    /// A selected test case was not run.
    TestNotRun {
        /// Case identifier.
        unique_id: String,
    },
    /// Free-form output captured from a running test.
    TestOutput {
        /// Case identifier.
        unique_id: String,
        /// Captured text.
        output: String,
    },
    /// Execution finished; always the last event of a `RUN` operation.
    RunComplete(RunSummary),
}

/// Events produced by the engine itself rather than the test framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// A diagnostic message meant for the user.
    Diagnostic {
        /// Message text.
        message: String,
    },
    /// A diagnostic message about engine internals.
    InternalDiagnostic {
        /// Message text.
        message: String,
    },
    /// An operation failed; always the last event of that operation.
    Error(ErrorPayload),
}

/// Failure report built from an error and its chain of sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Errors from outermost to innermost.
    pub errors: Vec<ErrorEntry>,
}

/// One link in an error chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Classification of the error.
    pub error_type: String,
    /// Display text of the error.
    pub message: String,
    /// Index of the entry this error was raised from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_index: Option<usize>,
}

impl ErrorPayload {
    /// Builds a payload from an error, walking its `source` chain.
    ///
    /// The outermost entry carries `error_type`; every source is recorded as
    /// `"source"` with `parent_index` pointing at the error that wrapped it.
    #[must_use]
    pub fn from_error(error_type: &str, error: &(dyn StdError + 'static)) -> Self {
        let mut errors = vec![ErrorEntry {
            error_type: error_type.to_owned(),
            message: error.to_string(),
            parent_index: None,
        }];
        let mut current = error.source();
        while let Some(source) = current {
            let parent_index = errors.len() - 1;
            errors.push(ErrorEntry {
                error_type: String::from("source"),
                message: source.to_string(),
                parent_index: Some(parent_index),
            });
            current = source.source();
        }
        Self { errors }
    }

    /// Builds a payload holding a single message.
    #[must_use]
    pub fn message(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorEntry {
                error_type: error_type.to_owned(),
                message: message.into(),
                parent_index: None,
            }],
        }
    }
}

/// Payload types that end an operation.
pub const TERMINAL_PAYLOAD_TYPES: [&str; 3] = ["discovery-complete", "run-complete", "error"];

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Reads the `type` discriminator of a `MSG` payload without decoding it.
#[must_use]
pub fn payload_type(payload: &[u8]) -> Option<String> {
    serde_json::from_slice::<Envelope>(payload)
        .ok()
        .map(|envelope| envelope.kind)
}

/// Returns `true` when the payload is the last one of its operation.
#[must_use]
pub fn is_terminal_payload(payload: &[u8]) -> bool {
    payload_type(payload).is_some_and(|kind| TERMINAL_PAYLOAD_TYPES.contains(&kind.as_str()))
}
