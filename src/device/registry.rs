use std::sync::Arc;

use super::{Adb, Device};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::subprocess::{ProcessError, ProcessRunner};

const MODEL_PROPERTY: &str = "ro.product.model";
const OS_VERSION_PROPERTY: &str = "ro.build.version.release";

/// Enumerates attached devices through `adb`
#[derive(Clone)]
pub struct DeviceRegistry {
    runner: Arc<dyn ProcessRunner>,
    adb: Adb,
}

impl DeviceRegistry {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &DeviceConfig) -> Self {
        Self {
            runner,
            adb: Adb::from_config(config),
        }
    }

    /// Verify the device tool is installed; returns its version banner
    pub async fn check_available(&self) -> Result<String> {
        match self.runner.run(self.adb.version()).await {
            Ok(output) if output.status.success() => Ok(output
                .stdout
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()),
            Ok(output) => Err(Error::ToolUnavailable(format!(
                "{} version exited with {:?}",
                self.adb.path(),
                output.status
            ))),
            Err(e) => Err(Error::ToolUnavailable(format!("{}: {e}", self.adb.path()))),
        }
    }

    /// Ids of devices in the `device` (online) state.
    ///
    /// A failing enumeration is logged and reported as "no devices".
    pub async fn list_devices(&self) -> Vec<String> {
        match self.runner.run(self.adb.devices()).await {
            Ok(output) if output.status.success() => parse_device_list(&output.stdout),
            Ok(output) => {
                tracing::error!(
                    "Device enumeration exited with {:?}: {}",
                    output.status,
                    output.stderr.trim()
                );
                Vec::new()
            }
            Err(e) => {
                tracing::error!("Device enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Resolve model and OS version; degrades to [`Device::unknown`] on any failure
    pub async fn describe(&self, device_id: &str) -> Device {
        let (model, version) = tokio::join!(
            self.get_property(device_id, MODEL_PROPERTY),
            self.get_property(device_id, OS_VERSION_PROPERTY)
        );

        match (model, version) {
            (Ok(model), Ok(version)) => Device::new(device_id, &model, &version),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Could not describe device {}: {}", device_id, e);
                Device::unknown(device_id)
            }
        }
    }

    async fn get_property(&self, device_id: &str, property: &str) -> Result<String> {
        let output = self.runner.run(self.adb.getprop(device_id, property)).await?;
        if !output.status.success() {
            return Err(Error::device_unavailable(
                device_id,
                ProcessError::ExitCode(output.status.code().unwrap_or(-1)),
            ));
        }
        Ok(output.stdout.trim().to_string())
    }
}

/// Parse `adb devices` output, keeping only online entries.
///
/// ```text
/// List of devices attached
/// emulator-5554	device
/// R58M42ABCDE	unauthorized
/// ```
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let id = columns.next()?;
            let state = columns.next()?;
            (state == "device").then(|| id.to_string())
        })
        .collect()
}
