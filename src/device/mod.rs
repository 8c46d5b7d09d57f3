//! Device discovery and metadata

pub mod adb;
pub mod registry;

pub use adb::Adb;
pub use registry::DeviceRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Phone,
    Emulator,
    Unknown,
}

impl DeviceClass {
    /// Classify a device from its serial; emulators are always named `emulator-<port>`
    pub fn from_id(device_id: &str) -> Self {
        if device_id.starts_with("emulator") {
            DeviceClass::Emulator
        } else {
            DeviceClass::Phone
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceClass::Phone => "Phone",
            DeviceClass::Emulator => "Emulator",
            DeviceClass::Unknown => "Device",
        };
        f.write_str(label)
    }
}

/// Snapshot of a device's identity, taken once per connection cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub model: String,
    pub os_version: String,
    pub class: DeviceClass,
    pub display_name: String,
}

impl Device {
    pub fn new(id: &str, model: &str, os_version: &str) -> Self {
        let class = DeviceClass::from_id(id);
        let display_name = if model.is_empty() {
            format!("{class} - {}...", short_id(id))
        } else {
            format!("{class} - {model}")
        };

        Self {
            id: id.to_string(),
            model: model.to_string(),
            os_version: os_version.to_string(),
            class,
            display_name,
        }
    }

    /// Placeholder used when the device could not be queried
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            model: "Unknown".to_string(),
            os_version: "Unknown".to_string(),
            class: DeviceClass::Unknown,
            display_name: format!("{} - {}...", DeviceClass::Unknown, short_id(id)),
        }
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}
