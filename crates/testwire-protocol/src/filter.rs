//! Test selection carried in `FIND` and `RUN` requests.

use serde::{Deserialize, Serialize};

use crate::payloads::TestCase;

/// Selection criteria for discovery and execution.
///
/// Every list is optional. An empty filter selects every test case; otherwise
/// a case is selected when it matches an entry in any non-empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFilter {
    /// Unique IDs of individual test cases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_cases: Vec<String>,
    /// Fully qualified class names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    /// Methods written as `Class.method`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

impl TestFilter {
    /// Parses the optional filter specification following an operation ID.
    ///
    /// Absent or blank data yields the empty filter.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the specification is malformed.
    pub fn parse(spec: Option<&[u8]>) -> Result<Self, serde_json::Error> {
        match spec {
            Some(bytes) if !bytes.trim_ascii().is_empty() => serde_json::from_slice(bytes),
            _ => Ok(Self::default()),
        }
    }

    /// Serialises the filter as a single-line JSON specification.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if serialisation fails.
    pub fn to_spec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Returns `true` when the filter selects everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty() && self.classes.is_empty() && self.methods.is_empty()
    }

    /// Decides whether the filter selects `case`.
    #[must_use]
    pub fn matches(&self, case: &TestCase) -> bool {
        if self.is_empty() {
            return true;
        }
        if self.test_cases.contains(&case.unique_id) {
            return true;
        }
        let class_selected = case
            .class_name
            .as_ref()
            .is_some_and(|class| self.classes.contains(class));
        let method_selected = case
            .qualified_method()
            .is_some_and(|method| self.methods.contains(&method));
        class_selected || method_selected
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn calculator_case() -> TestCase {
        TestCase::new("case-1", "Adds numbers").with_method("Calculator", "adds")
    }

    #[rstest]
    #[case(None)]
    #[case(Some(&b""[..]))]
    #[case(Some(&b"  "[..]))]
    fn absent_spec_selects_everything(#[case] spec: Option<&[u8]>, calculator_case: TestCase) {
        let filter = TestFilter::parse(spec).expect("parse");
        assert!(filter.is_empty());
        assert!(filter.matches(&calculator_case));
    }

    #[rstest]
    fn matches_on_any_list(calculator_case: TestCase) {
        let by_id = TestFilter::parse(Some(br#"{"test_cases":["case-1"]}"#)).expect("parse");
        let by_class = TestFilter::parse(Some(br#"{"classes":["Calculator"]}"#)).expect("parse");
        let by_method =
            TestFilter::parse(Some(br#"{"methods":["Calculator.adds"]}"#)).expect("parse");
        assert!(by_id.matches(&calculator_case));
        assert!(by_class.matches(&calculator_case));
        assert!(by_method.matches(&calculator_case));
    }

    #[rstest]
    fn rejects_cases_outside_the_selection(calculator_case: TestCase) {
        let filter = TestFilter::parse(Some(br#"{"classes":["Parser"]}"#)).expect("parse");
        assert!(!filter.matches(&calculator_case));
    }

    #[test]
    fn malformed_spec_is_an_error() {
        assert!(TestFilter::parse(Some(b"{classes:")).is_err());
    }

    #[test]
    fn spec_round_trips_through_json() {
        let filter = TestFilter {
            classes: vec![String::from("Calculator")],
            ..TestFilter::default()
        };
        let spec = filter.to_spec().expect("serialise");
        assert_eq!(spec, br#"{"classes":["Calculator"]}"#);
    }
}
