use std::time::Duration;

use crate::config::DeviceConfig;
use crate::subprocess::ProcessCommand;

/// Builds the `adb` invocations used by the registry and the stream reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adb {
    path: String,
    query_timeout: Duration,
}

impl Adb {
    pub fn new(path: impl Into<String>, query_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            query_timeout,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.adb_path.clone(), config.query_timeout)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> ProcessCommand {
        self.query().arg("version")
    }

    pub fn devices(&self) -> ProcessCommand {
        self.query().arg("devices")
    }

    /// `adb -s <id> shell getprop <property>`
    pub fn getprop(&self, device_id: &str, property: &str) -> ProcessCommand {
        self.query()
            .args(["-s", device_id, "shell", "getprop", property])
    }

    /// `adb -s <id> logcat -s <TAG>:* ...`; runs until terminated
    pub fn logcat(&self, device_id: &str, tags: &[String]) -> ProcessCommand {
        ProcessCommand::new(&self.path)
            .args(["-s", device_id, "logcat", "-s"])
            .args(tags.iter().map(|tag| format!("{tag}:*")))
            .suppress_stderr()
    }

    fn query(&self) -> ProcessCommand {
        ProcessCommand::new(&self.path).timeout(self.query_timeout)
    }
}
