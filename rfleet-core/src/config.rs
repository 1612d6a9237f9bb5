//! Fleet inventory: which devices exist and how to reach them.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{FleetError, Result};
use crate::fanout::FanoutConfig;
use crate::rest::RestOptions;
use crate::transport::{Credentials, DeviceTarget};

/// One device entry of the inventory file.
#[derive(Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    password: Option<SecretString>,
    /// Environment variable holding the password, preferred over `password`.
    #[serde(default)]
    pub password_env: Option<String>,
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_env", &self.password_env)
            .finish()
    }
}

impl DeviceConfig {
    fn to_target(&self) -> Result<DeviceTarget> {
        let password = match (&self.password_env, &self.password) {
            (Some(var), _) => Some(SecretString::from(std::env::var(var).map_err(|_| {
                FleetError::invalid_argument(format!(
                    "device {}: environment variable {var} is not set",
                    self.name
                ))
            })?)),
            (None, Some(password)) => Some(password.clone()),
            (None, None) => None,
        };
        let credentials = match (&self.username, password) {
            (Some(user), Some(password)) => Some(Credentials::with_secret(user, password)),
            (Some(user), None) => Some(Credentials::new(user, "")),
            (None, Some(_)) => {
                return Err(FleetError::invalid_argument(format!(
                    "device {}: password given without username",
                    self.name
                )));
            }
            (None, None) => None,
        };
        Ok(DeviceTarget::new(&self.name, &self.url, credentials))
    }
}

/// Inventory file contents.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub rest: RestOptions,
}

impl FleetConfig {
    /// Load and validate an inventory from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FleetError::invalid_argument(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: FleetConfig = serde_json::from_str(raw)
            .map_err(|e| FleetError::invalid_argument(format!("invalid inventory: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(FleetError::invalid_argument("device with empty name"));
            }
            if device.url.trim().is_empty() {
                return Err(FleetError::invalid_argument(format!(
                    "device {} has no url",
                    device.name
                )));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(FleetError::invalid_argument(format!(
                    "device {} listed twice",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// All devices, in inventory order.
    pub fn targets(&self) -> Result<Vec<DeviceTarget>> {
        self.devices.iter().map(DeviceConfig::to_target).collect()
    }

    /// The named devices, in the order given. Unknown names are an error.
    pub fn select(&self, names: &[String]) -> Result<Vec<DeviceTarget>> {
        names
            .iter()
            .map(|name| {
                self.devices
                    .iter()
                    .find(|d| &d.name == name)
                    .ok_or_else(|| FleetError::not_found(format!("device {name} not in inventory")))
                    .and_then(DeviceConfig::to_target)
            })
            .collect()
    }
}
