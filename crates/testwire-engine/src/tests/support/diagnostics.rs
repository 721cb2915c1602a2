//! Diagnostic sink that records every message for assertions.

use std::sync::Mutex;

use crate::diagnostics::DiagnosticEmitter;

/// One recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Raised through [`DiagnosticEmitter::diagnostic`].
    User(String),
    /// Raised through [`DiagnosticEmitter::internal_diagnostic`].
    Internal(String),
}

/// Records diagnostics in arrival order.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl RecordingDiagnostics {
    /// Copies every recorded diagnostic.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().expect("diagnostics mutex poisoned").clone()
    }

    /// User-facing messages only.
    pub fn user(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Diagnostic::User(message) => Some(message),
                Diagnostic::Internal(_) => None,
            })
            .collect()
    }

    /// Internal messages only.
    pub fn internal(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Diagnostic::Internal(message) => Some(message),
                Diagnostic::User(_) => None,
            })
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.entries.lock().expect("diagnostics mutex poisoned").clear();
    }

    fn record(&self, entry: Diagnostic) {
        self.entries
            .lock()
            .expect("diagnostics mutex poisoned")
            .push(entry);
    }
}

impl DiagnosticEmitter for RecordingDiagnostics {
    fn diagnostic(&self, message: &str) {
        self.record(Diagnostic::User(message.to_owned()));
    }

    fn internal_diagnostic(&self, message: &str) {
        self.record(Diagnostic::Internal(message.to_owned()));
    }
}
