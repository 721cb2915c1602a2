//! Test doubles and harnesses shared by the engine suites.

mod config_loader;
mod diagnostics;
mod framework;
mod peers;
mod reporter;
mod world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use diagnostics::{Diagnostic, RecordingDiagnostics};
pub use framework::{ScriptedFramework, suite};
pub use peers::{FakeRunner, RecordingListener, wait_until};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{TestWorld, world};
