use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::EngineError;

/// One evaluable component of a device. Only `id` and `name` are read by the
/// engine; everything else is carried along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Asset {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// The device under evaluation. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_name: String,
    pub device_assets: Vec<Asset>,
}

impl Device {
    /// Build a device, rejecting an empty asset list or repeated asset ids.
    pub fn new(device_name: impl Into<String>, device_assets: Vec<Asset>) -> Result<Self, EngineError> {
        let device = Self {
            device_name: device_name.into(),
            device_assets,
        };
        device.validate()?;
        Ok(device)
    }

    /// Results are keyed by asset id, so ids must be unique.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.device_assets.is_empty() {
            return Err(EngineError::InvalidInput("no assets found in device".into()));
        }
        let mut seen = HashSet::with_capacity(self.device_assets.len());
        for asset in &self.device_assets {
            if !seen.insert(asset.id.as_str()) {
                return Err(EngineError::InvalidInput(format!("duplicate asset id '{}'", asset.id)));
            }
        }
        Ok(())
    }

    pub fn asset(&self, index: usize) -> Option<&Asset> {
        self.device_assets.get(index)
    }

    pub fn asset_count(&self) -> usize {
        self.device_assets.len()
    }
}

fn default_device_name() -> String {
    "Unknown Device".to_string()
}

/// Uploaded device description: `{"device_name": ..., "assets": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpload {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl DeviceUpload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::InvalidInput(format!("invalid device file: {}", e)))
    }

    pub fn into_device(self) -> Result<Device, EngineError> {
        Device::new(self.device_name, self.assets)
    }
}
