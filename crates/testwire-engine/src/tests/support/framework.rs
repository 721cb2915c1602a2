//! Scripted [`TestFramework`] whose cases, failures and pauses are chosen by
//! the test.

use std::collections::HashSet;
use std::sync::Arc;

use testwire_protocol::{ExecutionEvent, RunSummary, TestCase, TestFilter};

use crate::framework::{FrameworkError, TestFramework};
use crate::latch::Latch;

/// Three cases spread over two classes.
pub fn suite() -> Vec<TestCase> {
    vec![
        TestCase::new("suite.alpha", "alpha").with_method("Suite", "alpha"),
        TestCase::new("suite.beta", "beta").with_method("Suite", "beta"),
        TestCase::new("other.gamma", "gamma").with_method("Other", "gamma"),
    ]
}

/// Framework double driven entirely by its script.
///
/// Cases listed with [`ScriptedFramework::gated`] block before they are
/// reported or run until the gate fires, keeping their
/// operation executing for as long as the test needs.
pub struct ScriptedFramework {
    cases: Vec<TestCase>,
    failing: HashSet<String>,
    gated: HashSet<String>,
    gate: Arc<Latch>,
    broken: Option<String>,
}

impl ScriptedFramework {
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self {
            cases,
            failing: HashSet::new(),
            gated: HashSet::new(),
            gate: Arc::new(Latch::default()),
            broken: None,
        }
    }

    /// Makes `unique_id` fail when run.
    #[must_use]
    pub fn failing(mut self, unique_id: &str) -> Self {
        self.failing.insert(unique_id.to_owned());
        self
    }

    /// Makes `unique_id` wait for the gate.
    #[must_use]
    pub fn gated(mut self, unique_id: &str) -> Self {
        self.gated.insert(unique_id.to_owned());
        self
    }

    /// Makes every `run` fail with `message`.
    #[must_use]
    pub fn broken(mut self, message: &str) -> Self {
        self.broken = Some(message.to_owned());
        self
    }

    /// Shared gate; fire it to let gated cases proceed.
    pub fn gate(&self) -> Arc<Latch> {
        Arc::clone(&self.gate)
    }

    fn pause_for(&self, case: &TestCase) {
        if self.gated.contains(&case.unique_id) {
            self.gate.wait();
        }
    }

    fn outcome(&self, case: &TestCase) -> ExecutionEvent {
        if self.failing.contains(&case.unique_id) {
            ExecutionEvent::TestFailed {
                unique_id: case.unique_id.clone(),
                elapsed_ms: 1,
                messages: vec![String::from("assertion failed")],
            }
        } else {
            ExecutionEvent::TestPassed {
                unique_id: case.unique_id.clone(),
                elapsed_ms: 1,
            }
        }
    }
}

impl TestFramework for ScriptedFramework {
    fn display_name(&self) -> String {
        String::from("scripted 1.0")
    }

    fn assembly_unique_id(&self) -> String {
        String::from("scripted-assembly")
    }

    fn find(&self, on_case: &mut dyn FnMut(TestCase) -> bool) -> Result<(), FrameworkError> {
        for case in &self.cases {
            self.pause_for(case);
            if !on_case(case.clone()) {
                break;
            }
        }
        Ok(())
    }

    fn run(
        &self,
        filter: &TestFilter,
        on_event: &mut dyn FnMut(ExecutionEvent) -> bool,
    ) -> Result<RunSummary, FrameworkError> {
        if let Some(message) = &self.broken {
            return Err(FrameworkError::new(message.clone()));
        }
        let selected: Vec<&TestCase> = self.cases.iter().filter(|case| filter.matches(case)).collect();
        let mut summary = RunSummary::default();
        for case in &selected {
            self.pause_for(case);
            let starting = ExecutionEvent::TestStarting {
                unique_id: case.unique_id.clone(),
                display_name: case.display_name.clone(),
            };
            if !on_event(starting) {
                break;
            }
            summary.total += 1;
            if self.failing.contains(&case.unique_id) {
                summary.failed += 1;
            }
            if !on_event(self.outcome(case)) {
                break;
            }
        }
        let selected = u32::try_from(selected.len()).unwrap_or(u32::MAX);
        summary.not_run = selected - summary.total;
        Ok(summary)
    }
}
