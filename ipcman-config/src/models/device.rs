use ipcman_model::{ConnectionDescriptor, Credentials, DeviceFeature, DeviceId};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_time_zone() -> String {
    "UTC".to_string()
}

/// Statically configured device.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub id: i64,
    /// Base URL such as `http://192.168.1.108`.
    pub address: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// IANA name of the zone the device clock runs in.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    /// Defaults to the device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Feature names, e.g. `camera`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("time_zone", &self.time_zone)
            .field("seed", &self.seed)
            .field("features", &self.features)
            .finish()
    }
}

impl DeviceConfig {
    pub fn descriptor(&self) -> Result<ConnectionDescriptor, ConfigError> {
        let descriptor = ConnectionDescriptor::new(
            DeviceId(self.id),
            &self.address,
            Credentials::new(self.username.clone(), self.password.clone()),
            &self.time_zone,
            self.seed.unwrap_or(self.id),
        )
        .map_err(|source| ConfigError::Device {
            id: self.id,
            source,
        })?;
        Ok(descriptor.with_features(DeviceFeature::from_names(
            self.features.iter().map(String::as_str),
        )))
    }
}
