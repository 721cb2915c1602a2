//! Configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::fs;
use std::sync::Arc;

use ortho_config::OrthoError;
use tempfile::TempDir;
use testwire_config::{Config, OrthoConfig};

use crate::bootstrap::ConfigLoader;

/// Loader that resolves a configuration file written to a temporary
/// directory.
pub struct TestConfigLoader {
    dir: TempDir,
}

impl TestConfigLoader {
    /// Writes a file selecting `port` and a stop-on-fail run.
    #[must_use]
    pub fn new(port: u16) -> Self {
        let dir = TempDir::new().expect("failed to create temporary configuration directory");
        let contents = format!("port = {port}\nstop_on_fail = true\nlog_format = \"compact\"\n");
        fs::write(dir.path().join("testwire.toml"), contents)
            .expect("failed to write configuration file");
        Self { dir }
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let path = self.dir.path().join("testwire.toml");
        Config::load_from_iter([
            OsString::from("testwire"),
            OsString::from("--config-path"),
            path.into_os_string(),
        ])
    }
}

/// Loader that intentionally fails by passing an out-of-range port.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter([
            OsString::from("testwire"),
            OsString::from("--port"),
            OsString::from("70000"),
        ])
    }
}
