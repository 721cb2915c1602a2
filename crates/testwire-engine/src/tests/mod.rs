//! Test suites for the testwire engines.

pub(crate) mod support;
